use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;

use bpcon_common::{
    env::{consensus::types::Ballot, vote_data::SignedMessage},
    utils::NodeId,
};

/// Vote and commit tally for exactly one ballot round.
///
/// The threshold is `floor(peer_count / 2)` where `peer_count` is the number
/// of remote peers. Acceptors check 1c proofs against a different threshold
/// (`PeerDirectory::quorum_size`), so the two must not be merged.
#[derive(Debug, Clone)]
pub struct QuorumTracker {
    ballot: Ballot,
    peer_count: usize,
    quorum: usize,
    acceptors: usize,
    rejectors: usize,
    commits: usize,
    // voter -> (max voted ballot it reported, signed 1b)
    votes: BTreeMap<NodeId, (Ballot, SignedMessage)>,
    committed_by: HashSet<NodeId>,
    // higher ballot reported by rejectors -> how many reported it
    higher_ballots: BTreeMap<Ballot, usize>,
}

impl QuorumTracker {
    pub fn new(ballot: Ballot, peer_count: usize) -> Self {
        Self {
            ballot,
            peer_count,
            quorum: peer_count / 2,
            acceptors: 0,
            rejectors: 0,
            commits: 0,
            votes: BTreeMap::new(),
            committed_by: HashSet::new(),
            higher_ballots: BTreeMap::new(),
        }
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    pub fn peer_count(&self) -> usize {
        self.peer_count
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn acceptors(&self) -> usize {
        self.acceptors
    }

    pub fn rejectors(&self) -> usize {
        self.rejectors
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Records a 1b vote. A second vote from the same voter is ignored.
    /// Returns whether the vote was counted.
    pub fn record_vote(&mut self, voter: NodeId, seen_ballot: Ballot, msg: SignedMessage) -> bool {
        if self.votes.contains_key(&voter) {
            return false;
        }
        self.votes.insert(voter, (seen_ballot, msg));

        if seen_ballot < self.ballot {
            self.acceptors += 1;
        } else {
            self.rejectors += 1;
            *self.higher_ballots.entry(seen_ballot).or_insert(0) += 1;
        }
        true
    }

    pub fn has_ballot1_majority(&self) -> bool {
        self.acceptors >= self.quorum || self.rejectors >= self.quorum
    }

    /// Ties go to acceptance.
    pub fn accepted_by_majority(&self) -> bool {
        self.acceptors >= self.rejectors
    }

    /// A peer to resync from, once a quorum has reported the same higher
    /// ballot. Picked at random among the peers that reported it.
    pub fn pick_rejecting_peer(&self) -> Option<NodeId> {
        let (&ballot, _) = self
            .higher_ballots
            .iter()
            .filter(|(_, count)| **count >= self.quorum)
            .max_by_key(|(_, count)| **count)?;

        let candidates: Vec<&NodeId> = self
            .votes
            .iter()
            .filter(|(_, (seen, _))| *seen == ballot)
            .map(|(voter, _)| voter)
            .collect();
        candidates.choose(&mut rand::thread_rng()).map(|id| (*id).clone())
    }

    /// Counts a 2b for this ballot, once per voter.
    pub fn record_commit(&mut self, voter: &NodeId, ballot: Ballot) -> bool {
        if ballot != self.ballot || !self.committed_by.insert(voter.clone()) {
            return false;
        }
        self.commits += 1;
        true
    }

    pub fn has_commit_majority(&self) -> bool {
        self.commits >= self.quorum
    }

    /// Every recorded 1b, to prove the quorum to 1c recipients.
    pub fn all_vote_proofs(&self) -> Vec<SignedMessage> {
        self.votes.values().map(|(_, msg)| msg.clone()).collect()
    }
}
