//! Protocol client for Miniserver-class home-automation controllers.
//!
//! Talks to a controller over a framed, bidirectional WebSocket transport:
//! capability probing, authentication, structure-document retrieval,
//! telemetry subscription, and decoding of the binary state-update format.
//! The reconnect loop and state fan-out live in `casalink-core`; this crate
//! owns a single connection attempt and everything on the wire.

pub mod auth;
pub mod error;
pub mod probe;
pub mod session;
pub mod transport;
pub mod wire;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use auth::{AuthStrategy, CommandChannel, HashAuth, NoAuth};
pub use error::{DisconnectReason, Error, FailureKind};
pub use probe::{CapabilityProbe, ProbeResult};
pub use session::{CommandResponse, Session, SessionConfig, SessionEvent};
pub use transport::{FrameLimits, Transport, TransportEvent, TransportSink, WsTransport};
pub use wire::{ObjectId, StateUpdate, StateValue};
