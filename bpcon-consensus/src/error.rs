use thiserror::Error;

use bpcon_common::{
    env::{consensus::types::Ballot, proposal::CommandError, value::ValueCodecError},
    error::BpconError,
    utils::NodeId,
};

/// What a proposing client gets back when its value was not committed.
#[derive(Debug, Error)]
pub enum ProposeError {
    #[error("malformed proposal: {0}")]
    MalformedProposal(#[from] CommandError),

    #[error("ballot #{0} is still in progress")]
    RoundInProgress(Ballot),

    #[error("ballot #{ballot}: 1b quorum not reached")]
    QuorumNotReached {
        ballot: Ballot,
        resync_hint: Option<NodeId>,
    },

    #[error("ballot #{0}: 1b quorum accepted but 2b quorum failed")]
    CommitQuorumFailed(Ballot),

    #[error("ballot #{0} timed out")]
    Timeout(Ballot),

    #[error(transparent)]
    Internal(#[from] BpconError),
}

impl ProposeError {
    /// Peer that reported a newer ballot, when a rejecting quorum agreed on one.
    pub fn resync_hint(&self) -> Option<&NodeId> {
        match self {
            ProposeError::QuorumNotReached { resync_hint, .. } => resync_hint.as_ref(),
            _ => None,
        }
    }
}

/// Why an acceptor dropped a 1c. Only ever logged; the proposer sees a
/// missing reply.
#[derive(Debug, Error)]
pub enum AcceptorError {
    #[error("signature verification failed: {verified} valid proofs, {required} required")]
    VerificationFailed { verified: usize, required: usize },

    #[error("too many signatures: {count} proofs for a group of {group}")]
    TooManyProofs { count: usize, group: usize },

    #[error("ballot #{ballot} is below promised ballot #{promised}")]
    StaleBallot { ballot: Ballot, promised: Ballot },

    #[error("malformed value: {0}")]
    MalformedValue(#[from] ValueCodecError),

    #[error("malformed command: {0}")]
    MalformedCommand(#[from] CommandError),

    #[error("state update failed: {0}")]
    Apply(#[source] BpconError),

    #[error(transparent)]
    Internal(#[from] BpconError),
}
