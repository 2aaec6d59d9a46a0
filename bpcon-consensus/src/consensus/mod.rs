//! Ballot bookkeeping.
//!
//! `QuorumTracker` counts one round's votes; `ConsensusEngine` owns the
//! node's ballot state and moves rounds through their phases. Neither
//! touches the network.

mod engine;
pub mod quorum;

pub use engine::{CommittedValue, ConsensusEngine, RoundStart, VoteOutcome};
pub use quorum::QuorumTracker;
