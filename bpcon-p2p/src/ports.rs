use async_trait::async_trait;

use bpcon_common::utils::NodeId;

use crate::message::NetworkError;

/// Request/response delivery of opaque frames between group members.
///
/// Each call is isolated: one peer failing never affects another call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `frame` to `peer` and waits for its reply. `Ok(None)` means the
    /// peer processed the frame but had nothing to say.
    async fn request(&self, peer: &NodeId, frame: Vec<u8>) -> Result<Option<Vec<u8>>, NetworkError>;
}

/// Inbound side of a transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, from: &NodeId, frame: Vec<u8>) -> Option<Vec<u8>>;
}
