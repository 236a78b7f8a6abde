// casalink-core: Supervised connection and reactive state layer between
// casalink-proto and consumers (CLI, integrations).

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod miniserver;
pub mod model;
pub mod policy;
pub mod registry;
mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AuthMethod, MiniserverConfig};
pub use dispatcher::StateDispatcher;
pub use error::CoreError;
pub use miniserver::{ConnectionState, Miniserver};
pub use model::{Control, StateRecord, StructureDoc};
pub use policy::ReconnectPolicy;
pub use registry::ControlRegistry;

// Re-export the wire-level value types consumers see in every accessor.
pub use casalink_proto::{ObjectId, StateUpdate, StateValue};
