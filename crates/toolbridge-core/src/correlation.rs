//! Registry of in-flight bridge requests awaiting a reply.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use tokio::{
    sync::oneshot,
    task::AbortHandle,
    time::{Instant, sleep_until},
};

use crate::BridgeError;

/// Outcome delivered to a pending request.
pub type Settlement = Result<Value, BridgeError>;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Opaque token pairing a request with its reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing id, e.g. one read off the wire.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id: wall-clock millis plus a process-wide sequence.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{millis}-{seq}"))
    }

    /// The id as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct PendingEntry {
    tx: oneshot::Sender<Settlement>,
    timeout: Duration,
    timer: AbortHandle,
}

/// In-flight requests keyed by correlation id.
///
/// Every entry leaves the map exactly once: through [`settle`], through its
/// own deadline timer ([`expire`]), or through [`fail_all`]/[`cancel`].
/// Whichever path removes the entry under the lock is the one that settles
/// it; later attempts find nothing and do nothing.
///
/// [`settle`]: CorrelationRegistry::settle
/// [`expire`]: CorrelationRegistry::expire
/// [`fail_all`]: CorrelationRegistry::fail_all
/// [`cancel`]: CorrelationRegistry::cancel
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    pending: Arc<Mutex<HashMap<CorrelationId, PendingEntry>>>,
}

impl CorrelationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id` and start its deadline timer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `DuplicateId` if `id` is already in flight.
    pub fn register(&self, id: CorrelationId, timeout: Duration) -> Result<PendingReply, BridgeError> {
        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(BridgeError::DuplicateId(id.0));
        }

        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let registry = self.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            registry.expire(&timer_id);
        })
        .abort_handle();

        pending.insert(id.clone(), PendingEntry { tx, timeout, timer });
        drop(pending);

        Ok(PendingReply { id, rx })
    }

    /// Resolve `id` with `outcome` and forget it.
    ///
    /// Unknown ids are ignored. Returns whether an entry was settled.
    pub fn settle(&self, id: &CorrelationId, outcome: Settlement) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            return false;
        };
        entry.timer.abort();
        let _ = entry.tx.send(outcome);
        true
    }

    /// Reject `id` with `Timeout` if it is still in flight.
    pub fn expire(&self, id: &CorrelationId) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            return false;
        };
        tracing::debug!(%id, timeout_ms = entry.timeout.as_millis(), "Bridge request expired");
        let _ = entry.tx.send(Err(BridgeError::Timeout {
            id: id.0.clone(),
            after: entry.timeout,
        }));
        true
    }

    /// Drop `id` without settling it; its waiter sees `LinkAbsent`.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        let Some(entry) = self.lock().remove(id) else {
            return false;
        };
        entry.timer.abort();
        true
    }

    /// Reject every in-flight request with `error`.
    ///
    /// Returns the number of requests rejected.
    pub fn fail_all(&self, error: &BridgeError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.timer.abort();
            let _ = entry.tx.send(Err(error.clone()));
        }
        count
    }

    /// Whether `id` is still awaiting settlement.
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Awaitable result slot returned by [`CorrelationRegistry::register`].
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingReply {
    /// The id this reply is waiting on.
    #[must_use]
    pub const fn id(&self) -> &CorrelationId {
        &self.id
    }
}

impl Future for PendingReply {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(BridgeError::LinkAbsent)))
    }
}
