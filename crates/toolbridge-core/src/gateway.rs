//! Gateway relaying tool requests to the remote agent.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::Value;

use crate::{
    BridgeError,
    correlation::{CorrelationId, CorrelationRegistry},
    link::{BridgeLink, LinkHandle},
    protocol::{AgentInfo, AgentMessage, BridgeAction, BridgeParams, BridgeRequest},
};

/// Timeout applied when the caller does not pick one.
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_millis(15_000);

/// How an inbound frame from the agent was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Registration handshake; host details recorded on the handle.
    Registered(AgentInfo),
    /// Reply matched and settled a pending request.
    Settled(CorrelationId),
    /// Reply for an id that is no longer (or never was) in flight.
    Unmatched(CorrelationId),
    /// JSON without an id or handshake marker.
    Unrecognized,
    /// Not JSON.
    Malformed(String),
}

/// Snapshot of the bridge for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub agent: Option<AgentInfo>,
    pub in_flight: usize,
}

/// Issues correlated requests over the [`BridgeLink`].
///
/// One gateway exists per process and is shared behind an `Arc` by the
/// bridge endpoint (which feeds it connections and inbound frames) and by
/// the tool that relays calls through it.
pub struct BridgeGateway {
    link: BridgeLink,
    registry: CorrelationRegistry,
    default_timeout: Duration,
}

impl Default for BridgeGateway {
    fn default() -> Self {
        Self::new(DEFAULT_BRIDGE_TIMEOUT)
    }
}

impl BridgeGateway {
    /// Create a gateway with no agent attached.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            link: BridgeLink::new(),
            registry: CorrelationRegistry::new(),
            default_timeout,
        }
    }

    /// The underlying link slot.
    #[must_use]
    pub const fn link(&self) -> &BridgeLink {
        &self.link
    }

    /// The in-flight request registry.
    #[must_use]
    pub const fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    /// Timeout used by [`invoke`](Self::invoke) when none is given.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Make `handle` the authoritative connection.
    pub fn attach(&self, handle: Arc<LinkHandle>) {
        let id = handle.id();
        if let Some(previous) = self.link.attach(handle) {
            tracing::warn!(
                link_id = %id,
                superseded = %previous.id(),
                "Bridge agent reconnected, superseding previous link"
            );
        } else {
            tracing::info!(link_id = %id, "Bridge agent attached");
        }
    }

    /// Handle the end of `handle`'s connection.
    ///
    /// If it was still authoritative the link is cleared and every request
    /// in flight is rejected with `LinkAbsent`. A superseded handle changes
    /// nothing. Returns whether the link was cleared.
    pub fn link_lost(&self, handle: &Arc<LinkHandle>) -> bool {
        handle.mark_dead();
        if !self.link.detach(handle) {
            tracing::debug!(link_id = %handle.id(), "Superseded bridge link closed");
            return false;
        }
        let failed = self.registry.fail_all(&BridgeError::LinkAbsent);
        tracing::info!(link_id = %handle.id(), failed, "Bridge agent detached");
        true
    }

    /// Send `action` to the agent and wait for its reply.
    ///
    /// # Errors
    /// - `BridgeUnavailable` when no agent is connected; nothing is registered.
    /// - `Timeout` when no reply arrives within `timeout` (default 15s).
    /// - `Remote` carrying the agent's error payload verbatim.
    /// - `LinkAbsent` when the agent disconnects while the request is in flight.
    pub async fn invoke(
        &self,
        action: BridgeAction,
        params: BridgeParams,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        if !self.link.is_live() {
            return Err(BridgeError::BridgeUnavailable);
        }

        let timeout = timeout.unwrap_or(self.default_timeout);
        let id = CorrelationId::generate();
        let frame = serde_json::to_string(&BridgeRequest {
            id: id.as_str().to_owned(),
            action,
            params,
        })?;

        let reply = self.registry.register(id.clone(), timeout)?;
        if self.link.send(frame).is_err() {
            self.registry.cancel(&id);
            return Err(BridgeError::BridgeUnavailable);
        }
        tracing::debug!(%id, %action, timeout_ms = timeout.as_millis(), "Bridge request sent");

        reply.await
    }

    /// Liveness round-trip to the agent.
    ///
    /// # Errors
    /// Same as [`invoke`](Self::invoke).
    pub async fn ping(&self, timeout: Option<Duration>) -> Result<Value, BridgeError> {
        self.invoke(BridgeAction::Ping, BridgeParams::default(), timeout)
            .await
    }

    /// Route one text frame received on `handle`.
    pub fn handle_inbound(&self, handle: &LinkHandle, text: &str) -> InboundOutcome {
        let message = match AgentMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(link_id = %handle.id(), "Malformed bridge frame: {e}");
                return InboundOutcome::Malformed(e.to_string());
            }
        };

        match message {
            AgentMessage::Register(info) => {
                tracing::info!(
                    link_id = %handle.id(),
                    hostname = info.hostname.as_deref().unwrap_or("?"),
                    platform = info.platform.as_deref().unwrap_or("?"),
                    "Bridge agent registered"
                );
                handle.set_agent_info(info.clone());
                InboundOutcome::Registered(info)
            }
            AgentMessage::Reply { id, outcome } => {
                let id = CorrelationId::new(id);
                if self.registry.settle(&id, outcome.map_err(BridgeError::Remote)) {
                    InboundOutcome::Settled(id)
                } else {
                    tracing::debug!(%id, "Dropping reply for unknown request");
                    InboundOutcome::Unmatched(id)
                }
            }
            AgentMessage::Unrecognized(_) => InboundOutcome::Unrecognized,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            connected: self.link.is_live(),
            agent: self.link.agent_info(),
            in_flight: self.registry.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::{sync::mpsc, time::Instant};

    use super::*;

    fn connect(gateway: &BridgeGateway) -> (Arc<LinkHandle>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LinkHandle::new(tx);
        gateway.attach(Arc::clone(&handle));
        (handle, rx)
    }

    async fn next_request(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let frame = rx.recv().await.unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_invoke_without_link_fails_fast() {
        let gateway = BridgeGateway::default();
        let res = gateway
            .invoke(BridgeAction::Exec, BridgeParams::command("ls"), None)
            .await;
        assert!(matches!(res, Err(BridgeError::BridgeUnavailable)));
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn test_exec_round_trip() {
        let gateway = Arc::new(BridgeGateway::default());
        let (handle, mut rx) = connect(&gateway);

        let gw = Arc::clone(&gateway);
        let call = tokio::spawn(async move {
            gw.invoke(
                BridgeAction::Exec,
                BridgeParams::command("echo hi"),
                Some(Duration::from_millis(1000)),
            )
            .await
        });

        let request = next_request(&mut rx).await;
        assert_eq!(request["action"], "exec");
        assert_eq!(request["command"], "echo hi");
        let id = request["id"].as_str().unwrap().to_string();

        let reply = json!({"id": id, "result": {"stdout": "hi\n"}}).to_string();
        assert_eq!(
            gateway.handle_inbound(&handle, &reply),
            InboundOutcome::Settled(CorrelationId::new(id))
        );

        assert_eq!(call.await.unwrap().unwrap(), json!({"stdout": "hi\n"}));
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exec_times_out_without_reply() {
        let gateway = Arc::new(BridgeGateway::default());
        let (handle, mut rx) = connect(&gateway);

        let started = Instant::now();
        let gw = Arc::clone(&gateway);
        let call = tokio::spawn(async move {
            gw.invoke(
                BridgeAction::Exec,
                BridgeParams::command("sleep 10"),
                Some(Duration::from_millis(1000)),
            )
            .await
        });

        let request = next_request(&mut rx).await;
        let res = call.await.unwrap();
        assert!(matches!(res, Err(BridgeError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(1000));

        let late = json!({"id": request["id"], "result": "late"}).to_string();
        assert!(matches!(
            gateway.handle_inbound(&handle, &late),
            InboundOutcome::Unmatched(_)
        ));
    }

    #[tokio::test]
    async fn test_remote_error_is_passed_through() {
        let gateway = Arc::new(BridgeGateway::default());
        let (handle, mut rx) = connect(&gateway);

        let gw = Arc::clone(&gateway);
        let call = tokio::spawn(async move {
            gw.invoke(BridgeAction::ReadFile, BridgeParams::path("C:/nope"), None)
                .await
        });

        let request = next_request(&mut rx).await;
        let reply = json!({"id": request["id"], "error": {"code": "ENOENT"}}).to_string();
        gateway.handle_inbound(&handle, &reply);

        match call.await.unwrap() {
            Err(BridgeError::Remote(v)) => assert_eq!(v, json!({"code": "ENOENT"})),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replies_matched_out_of_order() {
        let gateway = Arc::new(BridgeGateway::default());
        let (handle, mut rx) = connect(&gateway);

        let mut calls = Vec::new();
        for n in 0..3 {
            let gw = Arc::clone(&gateway);
            calls.push(tokio::spawn(async move {
                gw.invoke(BridgeAction::Exec, BridgeParams::command(format!("echo {n}")), None)
                    .await
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(next_request(&mut rx).await);
        }
        for request in requests.iter().rev() {
            let reply = json!({"id": request["id"], "result": request["command"]}).to_string();
            gateway.handle_inbound(&handle, &reply);
        }

        let mut results = Vec::new();
        for call in calls {
            results.push(call.await.unwrap().unwrap());
        }
        results.sort_by_key(ToString::to_string);
        assert_eq!(results, vec![json!("echo 0"), json!("echo 1"), json!("echo 2")]);
    }

    #[tokio::test]
    async fn test_foreign_reply_does_not_disturb_pending() {
        let gateway = Arc::new(BridgeGateway::default());
        let (handle, mut rx) = connect(&gateway);

        let gw = Arc::clone(&gateway);
        let call = tokio::spawn(async move { gw.ping(None).await });
        let request = next_request(&mut rx).await;

        assert!(matches!(
            gateway.handle_inbound(&handle, r#"{"id":"someone-else","result":1}"#),
            InboundOutcome::Unmatched(_)
        ));
        assert!(matches!(
            gateway.handle_inbound(&handle, "garbage"),
            InboundOutcome::Malformed(_)
        ));
        assert_eq!(gateway.registry().len(), 1);

        let reply = json!({"id": request["id"], "result": "pong"}).to_string();
        gateway.handle_inbound(&handle, &reply);
        assert_eq!(call.await.unwrap().unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_link_loss_rejects_in_flight() {
        let gateway = Arc::new(BridgeGateway::default());
        let (handle, mut rx) = connect(&gateway);

        let gw = Arc::clone(&gateway);
        let call = tokio::spawn(async move { gw.ping(None).await });
        let _ = next_request(&mut rx).await;

        assert!(gateway.link_lost(&handle));
        assert!(matches!(call.await.unwrap(), Err(BridgeError::LinkAbsent)));
        assert!(!gateway.status().connected);
    }

    #[tokio::test]
    async fn test_stale_link_loss_keeps_newer_agent() {
        let gateway = Arc::new(BridgeGateway::default());
        let (old, _old_rx) = connect(&gateway);
        let (new, mut new_rx) = connect(&gateway);

        let gw = Arc::clone(&gateway);
        let call = tokio::spawn(async move { gw.ping(None).await });
        let request = next_request(&mut new_rx).await;

        assert!(!gateway.link_lost(&old));
        assert!(gateway.status().connected);
        assert_eq!(gateway.registry().len(), 1);

        let reply = json!({"id": request["id"], "result": "pong"}).to_string();
        gateway.handle_inbound(&new, &reply);
        assert_eq!(call.await.unwrap().unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_register_records_agent_info() {
        let gateway = BridgeGateway::default();
        let (handle, _rx) = connect(&gateway);

        let outcome = gateway.handle_inbound(
            &handle,
            r#"{"type":"register","hostname":"workstation","platform":"darwin"}"#,
        );
        assert!(matches!(outcome, InboundOutcome::Registered(_)));

        let status = gateway.status();
        assert!(status.connected);
        assert_eq!(status.agent.unwrap().platform.as_deref(), Some("darwin"));
        assert_eq!(status.in_flight, 0);
    }
}
