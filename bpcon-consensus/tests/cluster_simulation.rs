use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bpcon_common::{
    auth::{ed25519::Ed25519Authenticator, Authenticator},
    env::consensus::types::{Ballot, RoundState},
    utils::NodeId,
};
use bpcon_consensus::{Cluster, ClusterBuilder, ConsensusConfig, KvStore, ProposeError, StateApplier};
use bpcon_p2p::{InMemoryNetwork, MessageHandler, NetworkError, PeerDirectory, Transport};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

struct Group {
    network: InMemoryNetwork,
    ids: Vec<NodeId>,
    nodes: Vec<Arc<Cluster>>,
    stores: Vec<Arc<KvStore>>,
}

impl Group {
    /// `size` nodes that all know each other, wired through one hub.
    fn new(size: usize, config: ConsensusConfig) -> Self {
        let network = InMemoryNetwork::new();
        let members: Vec<(NodeId, Arc<Ed25519Authenticator>)> = (0..size)
            .map(|i| {
                let auth = Ed25519Authenticator::new(SigningKey::generate(&mut OsRng));
                (NodeId::from(format!("node{i}")), Arc::new(auth))
            })
            .collect();

        let mut nodes = Vec::new();
        let mut stores = Vec::new();
        for (id, auth) in &members {
            let mut directory = PeerDirectory::new(id.clone(), &auth.public_key(), "").unwrap();
            for (other, other_auth) in members.iter().filter(|(other, _)| other != id) {
                assert!(directory.add_peer(other.clone(), &other_auth.public_key_hex(), ""));
            }

            let store = Arc::new(KvStore::new());
            let cluster = ClusterBuilder::new()
                .with_node_id(id.clone())
                .with_auth(auth.clone())
                .with_directory(directory)
                .with_transport(Arc::new(network.endpoint(id.clone())))
                .with_applier(store.clone())
                .with_config(config.clone())
                .build()
                .unwrap();

            let cluster = Arc::new(cluster);
            let handler: Arc<dyn MessageHandler> = cluster.clone();
            network.register(id.clone(), &handler);
            nodes.push(cluster);
            stores.push(store);
        }

        Group {
            network,
            ids: members.into_iter().map(|(id, _)| id).collect(),
            nodes,
            stores,
        }
    }

    fn set_reachable(&self, nodes: &[usize], reachable: bool) {
        for &i in nodes {
            self.network.set_reachable(&self.ids[i], reachable);
        }
    }

    fn set_latency(&self, nodes: &[usize], latency: Duration) {
        for &i in nodes {
            self.network.set_latency(&self.ids[i], latency);
        }
    }

    fn holding(&self, key: &str, value: &str) -> usize {
        self.stores.iter().filter(|s| s.get(key).as_deref() == Some(value)).count()
    }
}

/// Lets background 1c deliveries finish.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_healthy_group_commits() {
    // 1. Six nodes, five remote peers from node0's point of view
    let group = Group::new(6, ConsensusConfig::default());

    // 2. Propose
    let receipt = group.nodes[0].propose("P,k1,v1").await.unwrap();
    assert_eq!(receipt.ballot, Ballot(0));
    assert!(receipt.commits >= 2);
    assert_eq!(group.stores[0].get("k1").as_deref(), Some("v1"));
    assert_eq!(group.nodes[0].round_state(), RoundState::Idle);
    assert_eq!(group.nodes[0].last_outcome(), Some((Ballot(0), RoundState::Committed)));

    // 3. Every acceptor ends up with the value
    settle().await;
    assert_eq!(group.holding("k1", "v1"), 6);

    // 4. The next proposal from another node moves to the next ballot
    let receipt = group.nodes[3].propose("D,k1,").await.unwrap();
    assert_eq!(receipt.ballot, Ballot(1));
    settle().await;
    assert!(group.stores.iter().all(|s| s.get("k1").is_none()));
}

#[tokio::test]
async fn test_minority_of_acceptors_still_commits() {
    let group = Group::new(6, ConsensusConfig::default());
    group.set_reachable(&[3, 4, 5], false);

    let receipt = group.nodes[0].propose("P,k,v").await.unwrap();
    assert_eq!(receipt.commits, 2);

    settle().await;
    assert_eq!(group.holding("k", "v"), 3);
    for i in 3..6 {
        assert!(group.stores[i].is_empty());
    }
}

#[tokio::test]
async fn test_rejecting_quorum_returns_resync_hint() {
    let group = Group::new(6, ConsensusConfig::default());

    // 1. node2 commits ballot 0 while node0 is cut off
    group.set_reachable(&[0], false);
    group.nodes[2].propose("P,k,first").await.unwrap();
    settle().await;
    group.set_reachable(&[0], true);

    // 2. node0 only reaches nodes that already voted at ballot 0
    group.set_reachable(&[3, 4, 5], false);
    let err = group.nodes[0].propose("P,k,second").await.unwrap_err();
    let ProposeError::QuorumNotReached { ballot, resync_hint } = err else {
        panic!("expected QuorumNotReached");
    };
    assert_eq!(ballot, Ballot(0));
    let hint = resync_hint.expect("a rejecting quorum names a peer");
    assert!(hint == group.ids[1] || hint == group.ids[2]);
    assert_eq!(group.nodes[0].last_outcome(), Some((Ballot(0), RoundState::Rejected)));
    assert_eq!(group.stores[0].get("k"), None);

    // 3. Having seen ballot 0, node0 retries above it and wins
    let receipt = group.nodes[0].propose("P,k,second").await.unwrap();
    assert_eq!(receipt.ballot, Ballot(1));
    settle().await;
    assert_eq!(group.holding("k", "second"), 3);
}

struct CountingTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn request(&self, peer: &NodeId, _frame: Vec<u8>) -> Result<Option<Vec<u8>>, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NetworkError::unreachable(peer))
    }
}

#[tokio::test]
async fn test_single_node_applies_without_network() {
    let auth = Arc::new(Ed25519Authenticator::new(SigningKey::generate(&mut OsRng)));
    let transport = Arc::new(CountingTransport { calls: AtomicUsize::new(0) });
    let store = Arc::new(KvStore::new());

    let node = ClusterBuilder::new()
        .with_node_id(NodeId::from("solo"))
        .with_auth(auth)
        .with_transport(transport.clone())
        .with_applier(store.clone())
        .build()
        .unwrap();
    assert_eq!(node.peers().num_peers(), 1);

    let receipt = node.propose("P,k,v").await.unwrap();
    assert_eq!(receipt.commits, 0);
    assert_eq!(store.get("k").as_deref(), Some("v"));

    let receipt = node.propose("P,k,w").await.unwrap();
    assert_eq!(receipt.ballot, Ballot(1));
    assert_eq!(store.get("k").as_deref(), Some("w"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_second_proposal_while_round_pending() {
    let group = Group::new(3, ConsensusConfig::default());
    group.set_latency(&[1, 2], Duration::from_millis(300));

    let proposer = group.nodes[0].clone();
    let first = tokio::spawn(async move { proposer.propose("P,a,1").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(group.nodes[0].round_state(), RoundState::Awaiting1b);
    let err = group.nodes[0].propose("P,b,2").await.unwrap_err();
    assert!(matches!(err, ProposeError::RoundInProgress(Ballot(0))));

    let receipt = first.await.unwrap().unwrap();
    assert_eq!(receipt.ballot, Ballot(0));
    assert_eq!(group.stores[0].get("a").as_deref(), Some("1"));
    assert_eq!(group.stores[0].get("b"), None);
}

#[tokio::test]
async fn test_timed_out_round_resets_engine() {
    let config = ConsensusConfig::default().with_round_timeout(Duration::from_millis(200));
    let group = Group::new(3, config);
    group.set_latency(&[1, 2], Duration::from_secs(2));

    // 1. No reply can land before the round deadline
    let err = group.nodes[0].propose("P,k,late").await.unwrap_err();
    assert!(matches!(err, ProposeError::Timeout(Ballot(0))));
    assert_eq!(group.nodes[0].round_state(), RoundState::Idle);
    assert_eq!(group.nodes[0].last_outcome(), Some((Ballot(0), RoundState::TimedOut)));

    // 2. Peers recover and the next proposal goes through
    group.set_latency(&[1, 2], Duration::ZERO);
    let receipt = group.nodes[0].propose("P,k,on-time").await.unwrap();
    assert_eq!(receipt.ballot, Ballot(1));
    assert_eq!(group.stores[0].get("k").as_deref(), Some("on-time"));
}

#[tokio::test]
async fn test_malformed_proposal_is_refused_without_a_round() {
    let group = Group::new(3, ConsensusConfig::default());

    for raw in ["", "P,k", "X,k,v", "P,,v", "P,k,v,extra"] {
        let err = group.nodes[0].propose(raw).await.unwrap_err();
        assert!(matches!(err, ProposeError::MalformedProposal(_)), "{raw:?} gave {err}");
    }
    assert_eq!(group.nodes[0].last_outcome(), None);
    assert_eq!(group.nodes[1].ballot_snapshot().max_bal, Ballot::NONE);
}

#[tokio::test]
async fn test_value_with_envelope_separator_replicates() {
    let group = Group::new(3, ConsensusConfig::default());

    let receipt = group.nodes[0].propose("P,k,a<>b").await.unwrap();
    assert_eq!(receipt.command.value, "a<>b");

    settle().await;
    assert_eq!(group.holding("k", "a<>b"), 3);
    for node in &group.nodes[1..] {
        assert_eq!(node.ballot_snapshot().max_voted_ballot, Ballot(0));
    }
}

struct ReadOnlyStore;

impl StateApplier for ReadOnlyStore {
    fn apply(&self, _raw_value: &[u8], _ballot: Ballot) -> bpcon_common::error::Result<()> {
        Err(std::io::Error::other("read-only").into())
    }
}

#[tokio::test]
async fn test_single_node_apply_failure_is_not_recorded_as_commit() {
    let auth = Arc::new(Ed25519Authenticator::new(SigningKey::generate(&mut OsRng)));
    let node = ClusterBuilder::new()
        .with_node_id(NodeId::from("solo"))
        .with_auth(auth)
        .with_transport(Arc::new(CountingTransport { calls: AtomicUsize::new(0) }))
        .with_applier(Arc::new(ReadOnlyStore))
        .build()
        .unwrap();

    let err = node.propose("P,k,v").await.unwrap_err();
    assert!(matches!(err, ProposeError::Internal(_)));
    assert_eq!(node.last_outcome(), Some((Ballot(0), RoundState::Rejected)));
    assert_eq!(node.ballot_snapshot().max_voted_ballot, Ballot::NONE);
    assert_eq!(node.ballot_snapshot().max_voted_value, None);
}
