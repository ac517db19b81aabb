//! A framesync session: live result synchronization and shared export
//! state for one user of the keyframe retrieval tool.
//!
//! [`Session`] wires the channel registry, the shared view, the request
//! coordinator and the export session together. The embedding shell
//! renders from [`SharedView`] snapshots and reacts to the events
//! published on the session's bus.

pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod export_session;
pub mod router;
pub mod session;
pub mod telemetry;
pub mod view;
pub mod watchdog;

pub use config::{ClientConfig, ConfigError};
pub use coordinator::{RequestCoordinator, SearchRoute};
pub use debounce::{ActionPhase, Debouncer};
pub use error::SessionError;
pub use export_session::{ExportOutcome, ExportSession};
pub use router::{InboundRouter, RouteOutcome};
pub use session::Session;
pub use view::SharedView;
