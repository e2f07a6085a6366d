//! Per-client session transport.

use std::{
    sync::{
        Mutex, PoisonError, RwLock,
        atomic::{AtomicI64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use futures::{StreamExt, future, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;

/// Capacity of the server-to-client notification channel.
const NOTIFICATION_CAPACITY: usize = 256;

/// Lifecycle of a session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered, no request dispatched yet.
    Created,
    /// At least one request dispatched.
    Active,
    /// Closed; the id is no longer valid.
    Closed,
}

/// Client details negotiated at `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

type CloseCallback = Box<dyn FnOnce(&str) + Send + Sync>;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Long-lived protocol state for one client.
pub struct SessionTransport {
    id: String,
    state: watch::Sender<SessionState>,
    client: RwLock<Option<ClientInfo>>,
    notifications: broadcast::Sender<Value>,
    on_close: Mutex<Option<CloseCallback>>,
    created_at: i64,
    last_seen: AtomicI64,
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SessionTransport {
    /// Create a transport in the `Created` state.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let timestamp = now();
        Self {
            id: id.into(),
            state,
            client: RwLock::new(None),
            notifications,
            on_close: Mutex::new(None),
            created_at: timestamp,
            last_seen: AtomicI64::new(timestamp),
        }
    }

    /// The id assigned to this transport.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether the transport has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Creation time, Unix epoch seconds.
    #[must_use]
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Time of the last dispatched request, Unix epoch seconds.
    #[must_use]
    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    /// Record a successful dispatch, moving `Created` to `Active`.
    ///
    /// Returns `false` if the transport has already closed.
    pub fn activate(&self) -> bool {
        let mut open = true;
        self.state.send_if_modified(|state| match state {
            SessionState::Created => {
                *state = SessionState::Active;
                true
            }
            SessionState::Active => false,
            SessionState::Closed => {
                open = false;
                false
            }
        });
        if open {
            self.last_seen.store(now(), Ordering::Relaxed);
        }
        open
    }

    /// Record the client details sent at `initialize`.
    pub fn set_client_info(&self, info: ClientInfo) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Client details, once initialized.
    #[must_use]
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install the callback run once when the transport closes.
    ///
    /// The callback receives this transport's own id.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + Sync + 'static,
    {
        *self.on_close.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
    }

    /// Close the transport and run its close callback.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let closed = self.state.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        if !closed {
            return false;
        }

        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(&self.id);
        }
        tracing::debug!(session_id = %self.id, "Session transport closed");
        true
    }

    /// Push a notification to every open stream of this session.
    ///
    /// Returns the number of streams that received it.
    pub fn notify(&self, message: Value) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.notifications.send(message).unwrap_or(0)
    }

    /// Stream of notifications, ending when the transport closes.
    #[must_use]
    pub fn notification_stream(&self) -> BoxStream<'static, Value> {
        let mut state_rx = self.state.subscribe();
        let closed = async move {
            loop {
                if *state_rx.borrow_and_update() == SessionState::Closed {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        };

        BroadcastStream::new(self.notifications.subscribe())
            .filter_map(|res| future::ready(res.ok()))
            .take_until(closed)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use serde_json::json;

    use super::*;

    #[test]
    fn test_lifecycle() {
        let transport = SessionTransport::new("s1");
        assert_eq!(transport.state(), SessionState::Created);

        assert!(transport.activate());
        assert_eq!(transport.state(), SessionState::Active);
        assert!(transport.activate());

        assert!(transport.close());
        assert_eq!(transport.state(), SessionState::Closed);
        assert!(!transport.activate());
        assert!(!transport.close());
    }

    #[test]
    fn test_close_callback_runs_once_with_own_id() {
        let transport = SessionTransport::new("own-id");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(String::new()));

        let (c, s) = (Arc::clone(&calls), Arc::clone(&seen));
        transport.on_close(move |id| {
            c.fetch_add(1, Ordering::SeqCst);
            *s.lock().unwrap() = id.to_string();
        });

        transport.close();
        transport.close();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), "own-id");
    }

    #[tokio::test]
    async fn test_notification_stream_ends_on_close() {
        let transport = SessionTransport::new("s2");
        let mut stream = transport.notification_stream();

        assert_eq!(transport.notify(json!({"method": "notifications/message"})), 1);
        assert_eq!(
            stream.next().await.unwrap(),
            json!({"method": "notifications/message"})
        );

        transport.close();
        assert!(stream.next().await.is_none());
        assert_eq!(transport.notify(json!({})), 0);
    }

    #[tokio::test]
    async fn test_stream_waits_for_notification() {
        let transport = SessionTransport::new("s4");
        let mut stream = transport.notification_stream();

        let mut next = tokio_test::task::spawn(stream.next());
        tokio_test::assert_pending!(next.poll());
        transport.notify(json!({"seq": 1}));
        assert_eq!(tokio_test::assert_ready!(next.poll()), Some(json!({"seq": 1})));
    }

    #[test]
    fn test_client_info() {
        let transport = SessionTransport::new("s3");
        assert!(transport.client_info().is_none());
        transport.set_client_info(ClientInfo {
            name: "inspector".to_string(),
            version: Some("0.9".to_string()),
            protocol_version: None,
        });
        assert_eq!(transport.client_info().unwrap().name, "inspector");
    }
}
