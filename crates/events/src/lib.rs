//! framesync session event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`SessionEvent`]: every observable change to the view state, plus
//!   user-facing notices, for the rendering shell to react to.

pub mod bus;

pub use bus::{EventBus, Notice, NoticeLevel, SessionEvent};
