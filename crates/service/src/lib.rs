pub mod emitter;
pub mod router;
pub mod service;

use skylink_core::Outbound;
use skylink_transport::Transport;

pub use emitter::{ContentEvent, Emitter, PageAnalysis};
pub use router::Router;
pub use service::BridgeService;

/// Where responses and events leave the process.
pub trait OutboundSink: Send + Sync {
    /// `true` if the message was queued for transmission.
    fn send(&self, message: &Outbound) -> bool;
}

impl OutboundSink for Transport {
    fn send(&self, message: &Outbound) -> bool {
        Transport::send(self, message)
    }
}
