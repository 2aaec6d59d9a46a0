use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    auth::Authenticator,
    env::consensus::types::Ballot,
    error::Result,
    utils::{time::current_time_millis, NodeId},
};

/// Highest ballot at which an acceptor adopted a given value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorVote {
    pub ballot: Ballot,
    pub value: Vec<u8>,
}

/// Body of a 1b message: an acceptor's answer to a 1a for `ballot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub timestamp: u64,
    pub ballot: Ballot,
    pub max_voted_ballot: Ballot,
    pub max_voted_value: Option<Vec<u8>>,
    pub prior_votes: Vec<PriorVote>,
}

impl VoteRecord {
    pub fn new(ballot: Ballot, max_voted_ballot: Ballot, max_voted_value: Option<Vec<u8>>, prior_votes: Vec<PriorVote>) -> Self {
        Self {
            timestamp: current_time_millis(),
            ballot,
            max_voted_ballot,
            max_voted_value,
            prior_votes,
        }
    }

    /// The voter has not voted at `ballot` or above.
    pub fn accepts(&self) -> bool {
        self.max_voted_ballot < self.ballot
    }
}

/// Body of a 2b message: an acceptor adopted `value` at `ballot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAck {
    pub timestamp: u64,
    pub ballot: Ballot,
    pub value: Vec<u8>,
}

impl CommitAck {
    pub fn new(ballot: Ballot, value: Vec<u8>) -> Self {
        Self { timestamp: current_time_millis(), ballot, value }
    }
}

/// A `(peerId, message, signature)` triple. The signature covers `payload`,
/// which is the bincode form of the signed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub signer: NodeId,
    pub payload: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl SignedMessage {
    pub fn sign<T: Serialize>(signer: NodeId, record: &T, auth: &dyn Authenticator) -> Result<Self> {
        let payload = bincode::serialize(record)?;
        let signature = auth.sign(&payload)?;
        Ok(Self { signer, payload, signature })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}
