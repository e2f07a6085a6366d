//! Session transports for protocol clients.
//!
//! Provides:
//! - `SessionTransport` - Per-client protocol state and notification channel
//! - `SessionRegistry` - Session id to transport map with close-driven removal

pub mod registry;
pub mod transport;

pub use registry::{SessionError, SessionRegistry};
pub use transport::{ClientInfo, SessionState, SessionTransport};
