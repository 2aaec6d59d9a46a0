use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use bpcon_common::{
    env::{
        consensus::types::{Ballot, RoundState},
        proposal::Command,
        value::encode_value,
        vote_data::{CommitAck, SignedMessage, VoteRecord},
    },
    error::BpconError,
    utils::NodeId,
};
use bpcon_p2p::{
    broadcast::spawn_drain,
    message::{Phase1a, Phase1c},
    PaxosMessage, PeerReply,
};

use crate::{
    cluster::core::Cluster,
    consensus::{CommittedValue, RoundStart, VoteOutcome},
    error::ProposeError,
};

/// A value the group committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub ballot: Ballot,
    pub command: Command,
    /// 2b acknowledgments counted before the round closed. Zero when the
    /// node had no peers and decided alone.
    pub commits: usize,
}

/// Clears the engine's round if the driving future goes away early,
/// whether by the round deadline or by the caller dropping it.
struct RoundGuard<'a> {
    cluster: &'a Cluster,
    ballot: Ballot,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        if self.cluster.engine().abort_round(self.ballot, RoundState::TimedOut) {
            debug!("ballot #{} discarded before it concluded", self.ballot);
        }
    }
}

impl Cluster {
    /// Runs one ballot round for `raw` (`P,key,value` or `D,key,`) and
    /// resolves once the group committed it or the round failed.
    pub async fn propose(&self, raw: &str) -> Result<CommitReceipt, ProposeError> {
        let command = Command::parse(raw).map_err(|e| {
            warn!("⚠️ rejecting malformed proposal {:?}: {}", raw, e);
            ProposeError::from(e)
        })?;
        let value = command.to_bytes();
        let remote = self.peers().all_peer_addresses();

        let start = self.engine().begin_round(value.clone(), remote.len());
        let start = start.map_err(|e| {
            warn!("⚠️ {}", e);
            e
        })?;

        match start {
            RoundStart::Local { ballot } => {
                if let Err(e) = self.applier.apply(&value, ballot) {
                    self.engine().conclude_local(ballot, None);
                    warn!("❌ ballot #{} could not be applied locally: {}", ballot, e);
                    return Err(e.into());
                }
                self.engine().conclude_local(ballot, Some(value));
                tracing::info!(target: "consensus", "EVENT:COMMIT ballot={} value={} commits=0", ballot, command);
                Ok(CommitReceipt { ballot, command, commits: 0 })
            }
            RoundStart::Broadcast { ballot, prepare } => {
                info!("🚀 proposing {} at ballot #{} to {} peers", command, ballot, remote.len());
                tracing::info!(target: "consensus", "EVENT:PROPOSE ballot={} value={} proposer={}", ballot, command, self.local_id);

                let _guard = RoundGuard { cluster: self, ballot };
                let round = self.run_round(ballot, prepare, &remote);
                let result = match tokio::time::timeout(self.config.round_timeout(), round).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("⏱️ ballot #{} timed out after {:?}", ballot, self.config.round_timeout());
                        tracing::info!(target: "consensus", "EVENT:TIMEOUT ballot={}", ballot);
                        Err(ProposeError::Timeout(ballot))
                    }
                };

                result.map(|commits| CommitReceipt { ballot, command, commits })
            }
        }
    }

    async fn run_round(&self, ballot: Ballot, prepare: Phase1a, peers: &[NodeId]) -> Result<usize, ProposeError> {
        let frame = PaxosMessage::Phase1a(prepare)
            .to_bytes()
            .map_err(|e| BpconError::Network(e.to_string()))?;
        tracing::info!(target: "consensus", "EVENT:SEND_1A ballot={} peers={}", ballot, peers.len());

        let mut outcome = VoteOutcome::Pending;
        let (report, in_flight) = self
            .broadcaster
            .broadcast(frame, peers, |reply| {
                outcome = self.on_vote_reply(reply);
                if outcome.is_pending() {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            })
            .await;
        report.log("1a");
        // 1a requests still out are no longer needed
        drop(in_flight);

        if outcome.is_pending() {
            outcome = self.engine().conclude_phase1(ballot);
        }

        match outcome {
            VoteOutcome::Accepted { value, proofs, own_vote, .. } => {
                self.run_commit(ballot, value, proofs, own_vote, peers).await
            }
            VoteOutcome::Rejected { resync_hint, .. } => {
                match &resync_hint {
                    Some(peer) => info!("❌ 1b failure: ballot #{} rejected, {} is ahead", ballot, peer),
                    None => info!("❌ 1b failure: quorum1 not acquired for ballot #{}", ballot),
                }
                tracing::info!(target: "consensus", "EVENT:REJECT ballot={} phase=1b", ballot);
                Err(ProposeError::QuorumNotReached { ballot, resync_hint })
            }
            VoteOutcome::Pending => Err(ProposeError::QuorumNotReached { ballot, resync_hint: None }),
        }
    }

    async fn run_commit(
        &self,
        ballot: Ballot,
        value: Vec<u8>,
        mut proofs: Vec<SignedMessage>,
        own_vote: VoteRecord,
        peers: &[NodeId],
    ) -> Result<usize, ProposeError> {
        // acceptors count the proposer among the group
        proofs.push(SignedMessage::sign(self.local_id.clone(), &own_vote, self.auth.as_ref())?);

        let propose = Phase1c::new(ballot, encode_value(&value), proofs);
        let proof_count = propose.proofs.len();
        let frame = PaxosMessage::Phase1c(propose)
            .to_bytes()
            .map_err(|e| BpconError::Network(e.to_string()))?;
        info!("📨 1: quorum accepts ballot #{}, sending 1c with {} proofs", ballot, proof_count);
        tracing::info!(target: "consensus", "EVENT:SEND_1C ballot={} proofs={}", ballot, proof_count);

        let mut committed = None;
        let (report, in_flight) = self
            .broadcaster
            .broadcast(frame, peers, |reply| {
                committed = self.on_commit_reply(reply);
                if committed.is_some() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await;
        report.log("1c");
        spawn_drain("1c", in_flight);

        match committed.or_else(|| self.engine().conclude_phase2(ballot)) {
            Some(CommittedValue { value, commits, .. }) => {
                self.applier.apply(&value, ballot)?;
                info!("✅ 2: quorum accepts, ballot #{} committed with {} acks", ballot, commits);
                tracing::info!(target: "consensus", "EVENT:COMMIT ballot={} commits={}", ballot, commits);
                Ok(commits)
            }
            None => {
                warn!("❌ 2b failure: quorum1 accepts ballot #{} but quorum2 failed", ballot);
                tracing::info!(target: "consensus", "EVENT:REJECT ballot={} phase=2b", ballot);
                Err(ProposeError::CommitQuorumFailed(ballot))
            }
        }
    }

    /// Unwraps a peer's reply and checks it is signed by that peer.
    fn verified_reply(&self, reply: PeerReply) -> Option<PaxosMessage> {
        let PeerReply { peer, result, .. } = reply;
        let bytes = match result {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("no answer from {}", peer);
                return None;
            }
            Err(e) => {
                debug!("{} did not answer: {}", peer, e);
                return None;
            }
        };

        let message = match PaxosMessage::from_bytes(&bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("⚠️ got bad reply from {}: {}", peer, e);
                return None;
            }
        };
        let signed = match &message {
            PaxosMessage::Phase1b(signed) | PaxosMessage::Phase2b(signed) => signed,
            other => {
                warn!("⚠️ unexpected {} reply from {}", other.label(), peer);
                return None;
            }
        };
        if signed.signer != peer {
            warn!("⚠️ reply from {} claims to be signed by {}", peer, signed.signer);
            return None;
        }

        let verified = self.peers().verify(signed);
        match verified {
            Some(true) => Some(message),
            Some(false) => {
                warn!("⚠️ bad signature on {} from {}", message.label(), peer);
                None
            }
            None => {
                warn!("⚠️ {} replied but is not a group member", peer);
                None
            }
        }
    }

    fn on_vote_reply(&self, reply: PeerReply) -> VoteOutcome {
        let peer = reply.peer.clone();
        let Some(PaxosMessage::Phase1b(signed)) = self.verified_reply(reply) else {
            return VoteOutcome::Pending;
        };
        let vote: VoteRecord = match signed.decode() {
            Ok(vote) => vote,
            Err(e) => {
                warn!("⚠️ undecodable 1b from {}: {}", peer, e);
                return VoteOutcome::Pending;
            }
        };

        debug!("< 1b from {}: ballot #{}, maxVBal #{}", peer, vote.ballot, vote.max_voted_ballot);
        tracing::info!(target: "consensus", "EVENT:RECEIVE_VOTE ballot={} voter={} max_vbal={}", vote.ballot, peer, vote.max_voted_ballot);
        self.engine().on_phase1b(&peer, &vote, signed)
    }

    fn on_commit_reply(&self, reply: PeerReply) -> Option<CommittedValue> {
        let peer = reply.peer.clone();
        let Some(PaxosMessage::Phase2b(signed)) = self.verified_reply(reply) else {
            return None;
        };
        let ack: CommitAck = match signed.decode() {
            Ok(ack) => ack,
            Err(e) => {
                warn!("⚠️ undecodable 2b from {}: {}", peer, e);
                return None;
            }
        };

        debug!("< 2b from {}: ballot #{}", peer, ack.ballot);
        self.engine().on_phase2b(&peer, &ack)
    }
}
