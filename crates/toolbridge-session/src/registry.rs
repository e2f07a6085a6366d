//! Session id to transport registry.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
};

use serde_json::Value;
use uuid::Uuid;

use crate::transport::SessionTransport;

/// Session registry error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

type SessionMap = HashMap<String, Arc<SessionTransport>>;

/// Maps session ids to live transports.
///
/// Lookups are synchronous and never suspend. A transport removes itself
/// from the registry, by its own id, the moment it closes.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionMap> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionMap> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `requested`, or create a transport with a fresh id.
    ///
    /// A supplied id that is not registered is never adopted; the new
    /// transport always gets its own id. Returns the transport and whether
    /// it was created by this call.
    pub fn get_or_create(&self, requested: Option<&str>) -> (Arc<SessionTransport>, bool) {
        if let Some(existing) = requested.and_then(|id| self.read().get(id).cloned()) {
            return (existing, false);
        }

        let transport = Arc::new(SessionTransport::new(Uuid::new_v4().to_string()));

        let sessions: Weak<RwLock<SessionMap>> = Arc::downgrade(&self.sessions);
        let this: Weak<SessionTransport> = Arc::downgrade(&transport);
        transport.on_close(move |id| {
            let Some(sessions) = sessions.upgrade() else {
                return;
            };
            let mut map = sessions.write().unwrap_or_else(PoisonError::into_inner);
            let same = map
                .get(id)
                .is_some_and(|held| std::ptr::eq(Arc::as_ptr(held), this.as_ptr()));
            if same {
                map.remove(id);
            }
        });

        self.write()
            .insert(transport.id().to_string(), Arc::clone(&transport));

        tracing::info!(
            session_id = %transport.id(),
            requested = requested.unwrap_or(""),
            "Session created"
        );
        (transport, true)
    }

    /// Look up an existing session.
    ///
    /// # Errors
    /// Returns `NotFound` if the id is unknown or its transport has closed.
    pub fn get(&self, session_id: &str) -> Result<Arc<SessionTransport>, SessionError> {
        self.read()
            .get(session_id)
            .filter(|t| !t.is_closed())
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Deregister a session and close its transport.
    ///
    /// # Errors
    /// Returns `NotFound` if the id is unknown.
    pub fn remove(&self, session_id: &str) -> Result<(), SessionError> {
        let transport = self
            .write()
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        transport.close();
        tracing::info!(session_id, "Session terminated");
        Ok(())
    }

    /// Close every session. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.write().drain().map(|(_, t)| t).collect();
        for transport in &drained {
            transport.close();
        }
        drained.len()
    }

    /// Push `message` to every live session's notification streams.
    ///
    /// Returns the number of streams that received it.
    pub fn notify_all(&self, message: &Value) -> usize {
        let live: Vec<_> = self.read().values().cloned().collect();
        live.iter().map(|t| t.notify(message.clone())).sum()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids of live sessions.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }
}
