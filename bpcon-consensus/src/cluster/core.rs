use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bpcon_common::{
    auth::Authenticator,
    env::consensus::types::{Ballot, RoundState},
    utils::NodeId,
};
use bpcon_p2p::{Broadcaster, PeerDirectory, Transport};

use crate::{config::ConsensusConfig, consensus::ConsensusEngine, env::runtime::StateApplier};

/// Ballot state of a node at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotSnapshot {
    pub max_bal: Ballot,
    pub max_voted_ballot: Ballot,
    pub max_voted_value: Option<Vec<u8>>,
    pub state: RoundState,
}

/// One group member: proposer for its own clients, acceptor for everyone
/// else.
///
/// Engine and directory sit behind std locks that are only held for the
/// duration of a single transition, never across an `.await`.
pub struct Cluster {
    pub local_id: NodeId,
    pub(crate) engine: Mutex<ConsensusEngine>,
    pub(crate) peers: Arc<RwLock<PeerDirectory>>,
    pub(crate) auth: Arc<dyn Authenticator>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) applier: Arc<dyn StateApplier>,
    pub(crate) config: ConsensusConfig,
}

impl Cluster {
    pub fn new(
        local_id: NodeId,
        auth: Arc<dyn Authenticator>,
        peers: PeerDirectory,
        transport: Arc<dyn Transport>,
        applier: Arc<dyn StateApplier>,
        config: ConsensusConfig,
    ) -> Self {
        Cluster {
            engine: Mutex::new(ConsensusEngine::new(local_id.clone(), config.max_prior_votes)),
            local_id,
            peers: Arc::new(RwLock::new(peers)),
            auth,
            broadcaster: Broadcaster::new(transport, config.request_timeout()),
            applier,
            config,
        }
    }

    pub(crate) fn engine(&self) -> MutexGuard<'_, ConsensusEngine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn peers(&self) -> RwLockReadGuard<'_, PeerDirectory> {
        self.peers.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Membership changes happen outside of rounds.
    pub fn peers_mut(&self) -> RwLockWriteGuard<'_, PeerDirectory> {
        self.peers.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn applier(&self) -> &Arc<dyn StateApplier> {
        &self.applier
    }

    pub fn round_state(&self) -> RoundState {
        self.engine().state()
    }

    pub fn last_outcome(&self) -> Option<(Ballot, RoundState)> {
        self.engine().last_outcome()
    }

    pub fn ballot_snapshot(&self) -> BallotSnapshot {
        let engine = self.engine();
        BallotSnapshot {
            max_bal: engine.max_bal(),
            max_voted_ballot: engine.max_voted_ballot(),
            max_voted_value: engine.max_voted_value().map(<[u8]>::to_vec),
            state: engine.state(),
        }
    }

    pub fn get_status(&self) -> (String, i64, i64, String) {
        let snapshot = self.ballot_snapshot();
        (
            self.local_id.0.clone(),
            snapshot.max_bal.0,
            snapshot.max_voted_ballot.0,
            snapshot.state.to_string(),
        )
    }
}
