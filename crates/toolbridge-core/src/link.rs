//! The single authoritative connection to the remote agent.

use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{BridgeError, protocol::AgentInfo};

/// One accepted agent connection.
///
/// Frames pushed with [`LinkHandle::send`] are written to the socket, in
/// order, by whatever task owns the receiving end of the channel.
#[derive(Debug)]
pub struct LinkHandle {
    id: Uuid,
    outbound: mpsc::UnboundedSender<String>,
    live: AtomicBool,
    agent: RwLock<Option<AgentInfo>>,
}

impl LinkHandle {
    /// Create a handle writing into `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            outbound,
            live: AtomicBool::new(true),
            agent: RwLock::new(None),
        })
    }

    /// Connection identifier, for logging.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the connection still accepts frames.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Flag the connection as gone.
    pub fn mark_dead(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Record the host details from the agent's handshake.
    pub fn set_agent_info(&self, info: AgentInfo) {
        *self.agent.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Host details from the agent's handshake, if it sent one.
    #[must_use]
    pub fn agent_info(&self) -> Option<AgentInfo> {
        self.agent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send(&self, frame: String) -> Result<(), BridgeError> {
        if !self.live.load(Ordering::Acquire) {
            return Err(BridgeError::LinkAbsent);
        }
        self.outbound.send(frame).map_err(|_| {
            self.mark_dead();
            BridgeError::LinkAbsent
        })
    }
}

/// Slot holding at most one authoritative [`LinkHandle`].
#[derive(Debug, Default)]
pub struct BridgeLink {
    current: RwLock<Option<Arc<LinkHandle>>>,
}

impl BridgeLink {
    /// Create an empty link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle`, replacing any previous holder.
    ///
    /// The displaced handle is returned but not notified.
    pub fn attach(&self, handle: Arc<LinkHandle>) -> Option<Arc<LinkHandle>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
    }

    /// Clear the link if `handle` is still the current holder.
    ///
    /// Returns `false` (and leaves the link untouched) when a newer
    /// connection has already superseded `handle`.
    pub fn detach(&self, handle: &Arc<LinkHandle>) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(held) if Arc::ptr_eq(held, handle) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a handle is installed and reports itself live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.current().is_some_and(|h| h.is_live())
    }

    /// The current holder, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<LinkHandle>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Host details announced by the current holder.
    #[must_use]
    pub fn agent_info(&self) -> Option<AgentInfo> {
        self.current().and_then(|h| h.agent_info())
    }

    /// Queue a frame on the current connection.
    ///
    /// # Errors
    /// Returns `LinkAbsent` if nothing is attached or the connection is gone.
    pub fn send(&self, frame: String) -> Result<(), BridgeError> {
        let handle = self.current().ok_or(BridgeError::LinkAbsent)?;
        handle.send(frame)
    }
}
