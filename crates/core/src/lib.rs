pub mod config;
pub mod error;
pub mod host;
pub mod message;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use host::Host;
pub use message::{
    CommandEnvelope, ControlFrame, EventEnvelope, Inbound, Outbound, ResponseEnvelope,
};
pub use paths::Paths;
pub use types::{now_ms, ConnectionState, SessionKind, TabId, WindowId};
