use serde::{Deserialize, Serialize};
use thiserror::Error;

use bpcon_common::{
    env::{consensus::types::Ballot, vote_data::SignedMessage},
    utils::{time::current_time_millis, NodeId},
};

/// 1a: a proposer opens `ballot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase1a {
    pub timestamp: u64,
    pub ballot: Ballot,
}

impl Phase1a {
    pub fn new(ballot: Ballot) -> Self {
        Self { timestamp: current_time_millis(), ballot }
    }
}

/// 1c: the proposer asks acceptors to adopt `value` (an encoded envelope),
/// proving a 1b quorum with the signed votes in `proofs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase1c {
    pub timestamp: u64,
    pub ballot: Ballot,
    pub value: String,
    pub proofs: Vec<SignedMessage>,
}

impl Phase1c {
    pub fn new(ballot: Ballot, value: String, proofs: Vec<SignedMessage>) -> Self {
        Self { timestamp: current_time_millis(), ballot, value, proofs }
    }
}

/// Everything two group members say to each other.
///
/// 1b and 2b bodies are signed `VoteRecord` / `CommitAck` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaxosMessage {
    Phase1a(Phase1a),
    Phase1b(SignedMessage),
    Phase1c(Phase1c),
    Phase2b(SignedMessage),
}

impl PaxosMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        bincode::serialize(self).map_err(|e| NetworkError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        bincode::deserialize(bytes).map_err(|e| NetworkError::SerializationError(e.to_string()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaxosMessage::Phase1a(_) => "1a",
            PaxosMessage::Phase1b(_) => "1b",
            PaxosMessage::Phase1c(_) => "1c",
            PaxosMessage::Phase2b(_) => "2b",
        }
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to send message to peer {0}")]
    SendError(String),
    #[error("Peer {0} not found")]
    PeerNotFound(String),
    #[error("Peer {0} unreachable")]
    Unreachable(String),
    #[error("Request to peer {0} timed out")]
    Timeout(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl NetworkError {
    pub fn unreachable(peer: &NodeId) -> Self {
        NetworkError::Unreachable(peer.0.clone())
    }
}
