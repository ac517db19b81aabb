//! Transport layer for a framesync session.
//!
//! Provides auto-reconnecting WebSocket channels (one per backend
//! endpoint), the typed wire messages they carry, the HTTP search client
//! and query translation.

pub mod api;
pub mod client;
pub mod connection;
pub mod endpoint;
#[cfg(any(test, feature = "test-support"))]
pub mod loopback;
pub mod messages;
pub mod reconnect;
pub mod registry;
pub mod translate;

pub use api::{ApiError, HealthStatus, SearchApi, SearchBackend, TextSearchReply};
pub use client::{ChannelError, Connector, Transport, WsConnector};
pub use connection::{ChannelConnection, ChannelState};
pub use endpoint::Endpoint;
pub use reconnect::ReconnectPolicy;
pub use registry::ChannelRegistry;
pub use translate::{
    translate_or_original, GoogleTranslator, NoopTranslator, TranslateError, Translator,
};
