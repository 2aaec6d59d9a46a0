use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use bpcon_common::{
    env::{
        proposal::Command,
        value::decode_value,
        vote_data::{CommitAck, SignedMessage, VoteRecord},
    },
    utils::NodeId,
};
use bpcon_p2p::{
    message::{Phase1a, Phase1c},
    MessageHandler, PaxosMessage,
};

use crate::{cluster::core::Cluster, error::AcceptorError};

#[async_trait]
impl MessageHandler for Cluster {
    async fn on_message(&self, from: &NodeId, frame: Vec<u8>) -> Option<Vec<u8>> {
        let message = match PaxosMessage::from_bytes(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("⚠️ got bad input from peer {}: {}", from, e);
                return None;
            }
        };

        let label = message.label();
        debug!("< {} from {}", label, from);
        let reply = match message {
            PaxosMessage::Phase1a(prepare) => self.handle_prepare(from, prepare),
            PaxosMessage::Phase1c(propose) => self.handle_propose(from, propose),
            PaxosMessage::Phase1b(_) | PaxosMessage::Phase2b(_) => {
                debug!("unsolicited {} from {}, dropping", label, from);
                return None;
            }
        };

        match reply.map(|reply| reply.to_bytes()) {
            Ok(Ok(bytes)) => Some(bytes),
            Ok(Err(e)) => {
                warn!("⚠️ could not encode reply to {}: {}", from, e);
                None
            }
            Err(e) => {
                warn!("⚠️ dropping {} from {}: {}", label, from, e);
                None
            }
        }
    }
}

impl Cluster {
    /// 1a: promise the ballot (if it is the highest seen) and report what
    /// this node voted for so far.
    pub(crate) fn handle_prepare(&self, from: &NodeId, prepare: Phase1a) -> Result<PaxosMessage, AcceptorError> {
        let vote = self.engine().on_phase1a(prepare.ballot);
        let signed = SignedMessage::sign(self.local_id.clone(), &vote, self.auth.as_ref())?;

        debug!("> 1b to {}: ballot #{}, maxVBal #{}", from, vote.ballot, vote.max_voted_ballot);
        tracing::info!(target: "consensus", "EVENT:VOTE ballot={} voter={} max_vbal={} accepts={}", vote.ballot, self.local_id, vote.max_voted_ballot, vote.accepts());
        Ok(PaxosMessage::Phase1b(signed))
    }

    /// 1c: once the proof batch shows a signed quorum, apply the value, adopt
    /// it, and acknowledge with a signed 2b.
    pub(crate) fn handle_propose(&self, from: &NodeId, propose: Phase1c) -> Result<PaxosMessage, AcceptorError> {
        let verified = self.verify_proofs(&propose)?;
        debug!("signature verification succeeded: {} proofs for ballot #{}", verified, propose.ballot);

        let value = decode_value(&propose.value)?;
        let command = Command::from_bytes(&value)?;

        {
            // held until adoption so no 1a can slip in after the check
            let mut engine = self.engine();
            engine.check_phase1c(propose.ballot)?;
            self.applier.apply(&value, propose.ballot).map_err(AcceptorError::Apply)?;
            engine.on_phase1c(propose.ballot, value.clone())?;
        }

        info!("📥 accepted {} at ballot #{} from {}", command, propose.ballot, from);
        tracing::info!(target: "consensus", "EVENT:ACCEPT_1C ballot={} value={} proposer={}", propose.ballot, command, from);

        let ack = CommitAck::new(propose.ballot, value);
        let signed = SignedMessage::sign(self.local_id.clone(), &ack, self.auth.as_ref())?;
        Ok(PaxosMessage::Phase2b(signed))
    }

    /// Counts proofs that are distinct, accepting 1b votes for this very
    /// ballot and carry a valid member signature.
    fn verify_proofs(&self, propose: &Phase1c) -> Result<usize, AcceptorError> {
        let peers = self.peers();
        if propose.proofs.len() > peers.num_peers() {
            return Err(AcceptorError::TooManyProofs {
                count: propose.proofs.len(),
                group: peers.num_peers(),
            });
        }

        let mut signers = HashSet::new();
        let relevant: Vec<SignedMessage> = propose
            .proofs
            .iter()
            .filter(|proof| signers.insert(proof.signer.clone()))
            .filter(|proof| {
                matches!(
                    proof.decode::<VoteRecord>(),
                    Ok(vote) if vote.ballot == propose.ballot && vote.accepts()
                )
            })
            .cloned()
            .collect();

        let verified = peers.verify_signed_batch(&relevant);
        let required = peers.quorum_size();
        if verified < required {
            return Err(AcceptorError::VerificationFailed { verified, required });
        }
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bpcon_common::{
        auth::{ed25519::Ed25519Authenticator, Authenticator},
        env::{
            consensus::types::Ballot,
            value::{encode_value, ValueCodecError},
        },
    };
    use bpcon_p2p::{InMemoryNetwork, PeerDirectory};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use super::*;
    use crate::{env::runtime::StateApplier, ClusterBuilder, KvStore};

    struct Member {
        id: NodeId,
        auth: Arc<Ed25519Authenticator>,
    }

    fn member(name: &str) -> Member {
        Member {
            id: NodeId::from(name),
            auth: Arc::new(Ed25519Authenticator::new(SigningKey::generate(&mut OsRng))),
        }
    }

    /// An acceptor that knows `others` plus a store to look at.
    fn acceptor(others: &[&Member]) -> (Cluster, Arc<KvStore>) {
        let store = Arc::new(KvStore::new());
        (acceptor_with(others, store.clone()), store)
    }

    fn acceptor_with(others: &[&Member], applier: Arc<dyn StateApplier>) -> Cluster {
        let me = member("acceptor");
        let mut directory = PeerDirectory::new(me.id.clone(), &me.auth.public_key(), "").unwrap();
        for other in others {
            assert!(directory.add_peer(other.id.clone(), &other.auth.public_key_hex(), ""));
        }
        ClusterBuilder::new()
            .with_node_id(me.id.clone())
            .with_auth(me.auth.clone())
            .with_directory(directory)
            .with_transport(Arc::new(InMemoryNetwork::new().endpoint(me.id)))
            .with_applier(applier)
            .build()
            .unwrap()
    }

    struct BrokenStore;

    impl StateApplier for BrokenStore {
        fn apply(&self, _raw_value: &[u8], _ballot: Ballot) -> bpcon_common::error::Result<()> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    fn proof(member: &Member, ballot: Ballot) -> SignedMessage {
        let vote = VoteRecord::new(ballot, Ballot::NONE, None, vec![]);
        SignedMessage::sign(member.id.clone(), &vote, member.auth.as_ref()).unwrap()
    }

    fn propose(ballot: Ballot, raw: &str, proofs: Vec<SignedMessage>) -> Phase1c {
        Phase1c::new(ballot, encode_value(raw.as_bytes()), proofs)
    }

    #[test]
    fn test_prepare_is_answered_with_signed_vote() {
        let proposer = member("proposer");
        let (cluster, _) = acceptor(&[&proposer]);

        let reply = cluster.handle_prepare(&proposer.id, Phase1a::new(Ballot(2))).unwrap();
        let PaxosMessage::Phase1b(signed) = reply else {
            panic!("expected a 1b");
        };
        assert_eq!(cluster.peers().verify(&signed), Some(true));

        let vote: VoteRecord = signed.decode().unwrap();
        assert_eq!(vote.ballot, Ballot(2));
        assert!(vote.accepts());
        assert_eq!(cluster.ballot_snapshot().max_bal, Ballot(2));
    }

    #[test]
    fn test_propose_with_quorum_is_applied_and_acked() {
        let a = member("a");
        let b = member("b");
        let c = member("c");
        let (cluster, store) = acceptor(&[&a, &b, &c]);
        assert_eq!(cluster.peers().quorum_size(), 2);

        let msg = propose(Ballot(0), "P,k,v", vec![proof(&a, Ballot(0)), proof(&b, Ballot(0))]);
        let reply = cluster.handle_propose(&a.id, msg).unwrap();

        let PaxosMessage::Phase2b(signed) = reply else {
            panic!("expected a 2b");
        };
        let ack: CommitAck = signed.decode().unwrap();
        assert_eq!(ack.ballot, Ballot(0));
        assert_eq!(ack.value, b"P,k,v");
        assert_eq!(store.get("k").as_deref(), Some("v"));
        assert_eq!(cluster.ballot_snapshot().max_voted_ballot, Ballot(0));
    }

    #[test]
    fn test_propose_below_quorum_is_dropped() {
        let a = member("a");
        let b = member("b");
        let c = member("c");
        let (cluster, store) = acceptor(&[&a, &b, &c]);

        // the same signer twice counts once
        let msg = propose(Ballot(0), "P,k,v", vec![proof(&a, Ballot(0)), proof(&a, Ballot(0))]);
        let err = cluster.handle_propose(&a.id, msg).unwrap_err();
        assert!(matches!(err, AcceptorError::VerificationFailed { verified: 1, required: 2 }));

        // votes for another ballot do not prove this one
        let msg = propose(Ballot(1), "P,k,v", vec![proof(&a, Ballot(0)), proof(&b, Ballot(0))]);
        assert!(matches!(
            cluster.handle_propose(&a.id, msg),
            Err(AcceptorError::VerificationFailed { verified: 0, .. })
        ));

        assert!(store.is_empty());
    }

    #[test]
    fn test_oversized_proof_batch_is_dropped() {
        let a = member("a");
        let (cluster, _) = acceptor(&[&a]);

        let proofs = vec![proof(&a, Ballot(0)); 3];
        let err = cluster.handle_propose(&a.id, propose(Ballot(0), "P,k,v", proofs)).unwrap_err();
        assert!(matches!(err, AcceptorError::TooManyProofs { count: 3, group: 2 }));
    }

    #[test]
    fn test_propose_for_stale_ballot_is_dropped() {
        let a = member("a");
        let b = member("b");
        let (cluster, store) = acceptor(&[&a, &b]);

        cluster.handle_prepare(&b.id, Phase1a::new(Ballot(5))).unwrap();

        let msg = propose(Ballot(3), "P,k,v", vec![proof(&a, Ballot(3)), proof(&b, Ballot(3))]);
        let err = cluster.handle_propose(&a.id, msg).unwrap_err();
        assert!(matches!(err, AcceptorError::StaleBallot { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_apply_leaves_vote_state_untouched() {
        let a = member("a");
        let b = member("b");
        let c = member("c");
        let cluster = acceptor_with(&[&a, &b, &c], Arc::new(BrokenStore));

        let msg = propose(Ballot(0), "P,k,v", vec![proof(&a, Ballot(0)), proof(&b, Ballot(0))]);
        let err = cluster.handle_propose(&a.id, msg).unwrap_err();
        assert!(matches!(err, AcceptorError::Apply(_)));

        let snapshot = cluster.ballot_snapshot();
        assert_eq!(snapshot.max_voted_ballot, Ballot::NONE);
        assert_eq!(snapshot.max_voted_value, None);

        // the next 1b must not report a value the store never took
        let PaxosMessage::Phase1b(signed) = cluster.handle_prepare(&b.id, Phase1a::new(Ballot(1))).unwrap() else {
            panic!("expected a 1b");
        };
        let vote: VoteRecord = signed.decode().unwrap();
        assert_eq!(vote.max_voted_ballot, Ballot::NONE);
        assert_eq!(vote.max_voted_value, None);
    }

    #[test]
    fn test_value_holding_separator_is_applied() {
        let a = member("a");
        let b = member("b");
        let (cluster, store) = acceptor(&[&a, &b]);

        let msg = propose(Ballot(0), "P,k,a<>b", vec![proof(&a, Ballot(0)), proof(&b, Ballot(0))]);
        assert!(matches!(cluster.handle_propose(&a.id, msg), Ok(PaxosMessage::Phase2b(_))));
        assert_eq!(store.get("k").as_deref(), Some("a<>b"));
    }

    #[test]
    fn test_oversized_envelope_is_dropped() {
        let a = member("a");
        let b = member("b");
        let (cluster, store) = acceptor(&[&a, &b]);

        let proofs = vec![proof(&a, Ballot(0)), proof(&b, Ballot(0))];
        let msg = Phase1c::new(Ballot(0), "1099511627776<>0".to_string(), proofs);
        let err = cluster.handle_propose(&a.id, msg).unwrap_err();
        assert!(matches!(err, AcceptorError::MalformedValue(ValueCodecError::TooLong { .. })));
        assert!(store.is_empty());
        assert_eq!(cluster.ballot_snapshot().max_voted_ballot, Ballot::NONE);
    }

    #[tokio::test]
    async fn test_garbage_frames_get_no_reply() {
        let a = member("a");
        let (cluster, _) = acceptor(&[&a]);

        assert_eq!(cluster.on_message(&a.id, vec![0xde, 0xad, 0xbe, 0xef]).await, None);

        let unsolicited = PaxosMessage::Phase2b(proof(&a, Ballot(0))).to_bytes().unwrap();
        assert_eq!(cluster.on_message(&a.id, unsolicited).await, None);

        let prepare = PaxosMessage::Phase1a(Phase1a::new(Ballot(0))).to_bytes().unwrap();
        let reply = cluster.on_message(&a.id, prepare).await.unwrap();
        assert!(matches!(PaxosMessage::from_bytes(&reply), Ok(PaxosMessage::Phase1b(_))));
    }
}
