//! Core of the tool bridge.
//!
//! This crate provides the pieces that relay tool calls to a remote agent:
//! - `BridgeLink` - The single authoritative duplex connection
//! - `CorrelationRegistry` - In-flight requests keyed by correlation id
//! - `BridgeGateway` - Issue a request, await the matching reply or a timeout
//! - Bridge wire protocol types

pub mod correlation;
pub mod error;
pub mod gateway;
pub mod link;
pub mod protocol;

pub use correlation::{CorrelationId, CorrelationRegistry, PendingReply};
pub use error::BridgeError;
pub use gateway::{BridgeGateway, BridgeStatus, DEFAULT_BRIDGE_TIMEOUT, InboundOutcome};
pub use link::{BridgeLink, LinkHandle};
pub use protocol::{AgentInfo, AgentMessage, BridgeAction, BridgeParams, BridgeRequest};
