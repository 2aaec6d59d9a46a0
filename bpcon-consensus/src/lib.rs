pub mod cluster;
pub mod config;
pub mod consensus;
pub mod env;
pub mod error;

pub use cluster::builder::ClusterBuilder;
pub use cluster::core::Cluster;
pub use cluster::proposals::CommitReceipt;
pub use config::ConsensusConfig;
pub use consensus::{ConsensusEngine, QuorumTracker};
pub use env::runtime::{KvStore, StateApplier};
pub use error::{AcceptorError, ProposeError};
