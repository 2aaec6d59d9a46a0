use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use bpcon_common::{
    env::{
        consensus::types::{Ballot, RoundState},
        vote_data::{CommitAck, PriorVote, SignedMessage, VoteRecord},
    },
    utils::NodeId,
};
use bpcon_p2p::message::Phase1a;

use super::quorum::QuorumTracker;
use crate::error::{AcceptorError, ProposeError};

/// How a new round has to be driven.
#[derive(Debug)]
pub enum RoundStart {
    /// No remote peers: the value is already decided at `ballot`.
    Local { ballot: Ballot },
    /// Send `prepare` to every remote peer and feed the replies back in.
    Broadcast { ballot: Ballot, prepare: Phase1a },
}

/// Result of feeding a 1b into the engine.
#[derive(Debug)]
pub enum VoteOutcome {
    Pending,
    /// The 1b majority accepted. `own_vote` is the proposer's own 1b for the
    /// ballot, taken before it adopted `value`.
    Accepted {
        ballot: Ballot,
        value: Vec<u8>,
        proofs: Vec<SignedMessage>,
        own_vote: VoteRecord,
    },
    Rejected {
        ballot: Ballot,
        resync_hint: Option<NodeId>,
    },
}

impl VoteOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, VoteOutcome::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedValue {
    pub ballot: Ballot,
    pub value: Vec<u8>,
    pub commits: usize,
}

#[derive(Debug)]
struct ActiveRound {
    ballot: Ballot,
    value: Vec<u8>,
    state: RoundState,
    tracker: QuorumTracker,
}

/// Ballot state machine for one node, playing both proposer and acceptor.
///
/// Holds no I/O. The cluster driver feeds it decoded messages and sends
/// whatever it hands back, so every transition can be exercised directly.
#[derive(Debug)]
pub struct ConsensusEngine {
    local: NodeId,
    max_bal: Ballot,
    max_vbal: Ballot,
    max_vval: Option<Vec<u8>>,
    // value -> highest ballot it was adopted at
    prior_votes: BTreeMap<Vec<u8>, Ballot>,
    max_prior_votes: usize,
    round: Option<ActiveRound>,
    last_outcome: Option<(Ballot, RoundState)>,
}

impl ConsensusEngine {
    pub fn new(local: NodeId, max_prior_votes: usize) -> Self {
        Self {
            local,
            max_bal: Ballot::NONE,
            max_vbal: Ballot::NONE,
            max_vval: None,
            prior_votes: BTreeMap::new(),
            max_prior_votes,
            round: None,
            last_outcome: None,
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    pub fn max_bal(&self) -> Ballot {
        self.max_bal
    }

    pub fn max_voted_ballot(&self) -> Ballot {
        self.max_vbal
    }

    pub fn max_voted_value(&self) -> Option<&[u8]> {
        self.max_vval.as_deref()
    }

    pub fn prior_votes(&self) -> Vec<PriorVote> {
        self.prior_votes
            .iter()
            .map(|(value, ballot)| PriorVote { ballot: *ballot, value: value.clone() })
            .collect()
    }

    /// `Idle` unless a round is in flight.
    pub fn state(&self) -> RoundState {
        self.round.as_ref().map(|r| r.state).unwrap_or(RoundState::Idle)
    }

    pub fn active_ballot(&self) -> Option<Ballot> {
        self.round.as_ref().map(|r| r.ballot)
    }

    /// Terminal state of the most recent round.
    pub fn last_outcome(&self) -> Option<(Ballot, RoundState)> {
        self.last_outcome
    }

    pub fn tracker(&self) -> Option<&QuorumTracker> {
        self.round.as_ref().map(|r| &r.tracker)
    }

    fn observe(&mut self, ballot: Ballot) {
        if ballot > self.max_bal {
            self.max_bal = ballot;
        }
    }

    fn remember_vote(&mut self, ballot: Ballot, value: Vec<u8>) {
        let entry = self.prior_votes.entry(value).or_insert(ballot);
        if ballot > *entry {
            *entry = ballot;
        }
        while self.prior_votes.len() > self.max_prior_votes {
            let Some(oldest) = self
                .prior_votes
                .iter()
                .min_by_key(|(_, ballot)| **ballot)
                .map(|(value, _)| value.clone())
            else {
                break;
            };
            self.prior_votes.remove(&oldest);
        }
    }

    fn adopt(&mut self, ballot: Ballot, value: Vec<u8>) {
        self.max_bal = ballot;
        self.max_vbal = ballot;
        self.max_vval = Some(value.clone());
        self.remember_vote(ballot, value);
    }

    fn finish(&mut self, state: RoundState) -> Option<ActiveRound> {
        let round = self.round.take()?;
        self.last_outcome = Some((round.ballot, state));
        Some(round)
    }

    // ---------------------------------------------------------------
    // proposer
    // ---------------------------------------------------------------

    /// Opens a round for `value` one above the highest ballot this node has
    /// voted at or seen, so a failed round's number is never reused.
    pub fn begin_round(&mut self, value: Vec<u8>, remote_peers: usize) -> Result<RoundStart, ProposeError> {
        if let Some(round) = &self.round {
            return Err(ProposeError::RoundInProgress(round.ballot));
        }

        let ballot = self.max_vbal.max(self.max_bal).next();
        self.max_bal = ballot;

        if remote_peers == 0 {
            info!("👤 no peers in group, deciding ballot #{} locally", ballot);
            return Ok(RoundStart::Local { ballot });
        }

        self.round = Some(ActiveRound {
            ballot,
            value,
            state: RoundState::Awaiting1b,
            tracker: QuorumTracker::new(ballot, remote_peers),
        });
        Ok(RoundStart::Broadcast { ballot, prepare: Phase1a::new(ballot) })
    }

    /// Counts a verified 1b from `voter` and decides the round as soon as
    /// one side reaches the threshold.
    pub fn on_phase1b(&mut self, voter: &NodeId, vote: &VoteRecord, proof: SignedMessage) -> VoteOutcome {
        let Some(round) = self.round.as_mut() else {
            debug!("1b from {} with no round in flight, dropping", voter);
            return VoteOutcome::Pending;
        };
        if round.state != RoundState::Awaiting1b || vote.ballot != round.ballot {
            warn!(
                "⚠️ got bad 1b msg from {}: ballot #{} while {} for #{}",
                voter, vote.ballot, round.state, round.ballot
            );
            return VoteOutcome::Pending;
        }

        if !round.tracker.record_vote(voter.clone(), vote.max_voted_ballot, proof) {
            debug!("duplicate 1b from {} for ballot #{}", voter, vote.ballot);
            return VoteOutcome::Pending;
        }
        self.observe(vote.max_voted_ballot);
        self.decide_phase1()
    }

    /// Called once every 1b has arrived or failed. Rounds that never
    /// reached a decision end as rejected with no hint.
    pub fn conclude_phase1(&mut self, ballot: Ballot) -> VoteOutcome {
        if self.round.as_ref().map(|r| (r.ballot, r.state)) != Some((ballot, RoundState::Awaiting1b)) {
            return VoteOutcome::Pending;
        }
        match self.decide_phase1() {
            VoteOutcome::Pending => {
                self.finish(RoundState::Rejected);
                VoteOutcome::Rejected { ballot, resync_hint: None }
            }
            decided => decided,
        }
    }

    fn decide_phase1(&mut self) -> VoteOutcome {
        let Some(round) = self.round.as_ref() else {
            return VoteOutcome::Pending;
        };
        if !round.tracker.has_ballot1_majority() {
            return VoteOutcome::Pending;
        }

        let ballot = round.ballot;
        if round.tracker.accepted_by_majority() {
            let own_vote = VoteRecord::new(ballot, self.max_vbal, self.max_vval.clone(), self.prior_votes());
            let proofs = round.tracker.all_vote_proofs();
            let value = round.value.clone();

            self.adopt(ballot, value.clone());
            if let Some(round) = self.round.as_mut() {
                round.state = RoundState::Awaiting2b;
            }
            VoteOutcome::Accepted { ballot, value, proofs, own_vote }
        } else {
            let resync_hint = round.tracker.pick_rejecting_peer();
            self.finish(RoundState::Rejected);
            VoteOutcome::Rejected { ballot, resync_hint }
        }
    }

    /// Counts a verified 2b. Returns the decided value once the commit
    /// threshold is met.
    pub fn on_phase2b(&mut self, voter: &NodeId, ack: &CommitAck) -> Option<CommittedValue> {
        let round = self.round.as_mut()?;
        if round.state != RoundState::Awaiting2b || ack.ballot != round.ballot || ack.value != round.value {
            warn!("⚠️ got bad 2b msg from {} for ballot #{}", voter, ack.ballot);
            return None;
        }
        if !round.tracker.record_commit(voter, ack.ballot) {
            return None;
        }
        self.decide_phase2()
    }

    /// Called once every 2b has arrived or failed.
    pub fn conclude_phase2(&mut self, ballot: Ballot) -> Option<CommittedValue> {
        if self.round.as_ref().map(|r| (r.ballot, r.state)) != Some((ballot, RoundState::Awaiting2b)) {
            return None;
        }
        let committed = self.decide_phase2();
        if committed.is_none() {
            self.finish(RoundState::Rejected);
        }
        committed
    }

    fn decide_phase2(&mut self) -> Option<CommittedValue> {
        if !self.round.as_ref()?.tracker.has_commit_majority() {
            return None;
        }
        let round = self.finish(RoundState::Committed)?;
        Some(CommittedValue {
            ballot: round.ballot,
            value: round.value,
            commits: round.tracker.commits(),
        })
    }

    /// Drops the round for `ballot` if it is still in flight. The tracker
    /// goes with it.
    pub fn abort_round(&mut self, ballot: Ballot, outcome: RoundState) -> bool {
        if self.active_ballot() != Some(ballot) {
            return false;
        }
        self.finish(outcome);
        true
    }

    /// Settles a round decided without peers. The value is adopted only when
    /// the store took it.
    pub fn conclude_local(&mut self, ballot: Ballot, applied: Option<Vec<u8>>) {
        match applied {
            Some(value) => {
                self.adopt(ballot, value);
                self.last_outcome = Some((ballot, RoundState::Committed));
            }
            None => self.last_outcome = Some((ballot, RoundState::Rejected)),
        }
    }

    // ---------------------------------------------------------------
    // acceptor
    // ---------------------------------------------------------------

    /// Answers a 1a with the local vote state.
    pub fn on_phase1a(&mut self, ballot: Ballot) -> VoteRecord {
        self.observe(ballot);
        VoteRecord::new(ballot, self.max_vbal, self.max_vval.clone(), self.prior_votes())
    }

    /// Adopts a verified 1c value unless a higher ballot was promised since.
    pub fn on_phase1c(&mut self, ballot: Ballot, value: Vec<u8>) -> Result<(), AcceptorError> {
        self.check_phase1c(ballot)?;
        self.adopt(ballot, value);
        Ok(())
    }

    /// Whether a 1c for `ballot` may still be adopted.
    pub fn check_phase1c(&self, ballot: Ballot) -> Result<(), AcceptorError> {
        if self.max_bal > ballot {
            return Err(AcceptorError::StaleBallot { ballot, promised: self.max_bal });
        }
        Ok(())
    }
}
