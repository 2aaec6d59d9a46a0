use std::{collections::BTreeMap, sync::Arc, time::Duration};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tracing::{info, warn};

use bpcon_common::{
    auth::{ed25519::Ed25519Authenticator, Authenticator},
    error::Result,
    utils::NodeId,
};
use bpcon_consensus::{Cluster, ClusterBuilder, CommitReceipt, ConsensusConfig, KvStore, ProposeError};
use bpcon_p2p::{InMemoryNetwork, MessageHandler, PeerDirectory};

/// The request sequence the demo replays against the group.
pub const DEMO_REQUESTS: [&str; 6] = [
    "P,0,hello0",
    "P,test,value",
    "P,test0,value0",
    "P,test2,value2",
    "P,test,value3",
    "D,test2,",
];

const SETTLE: Duration = Duration::from_millis(20);

pub struct DemoNode {
    pub id: NodeId,
    pub cluster: Arc<Cluster>,
    pub store: Arc<KvStore>,
}

pub struct DemoReport {
    pub outcomes: Vec<(String, std::result::Result<CommitReceipt, ProposeError>)>,
    pub stores: Vec<(NodeId, BTreeMap<String, String>)>,
}

impl DemoReport {
    pub fn committed(&self) -> usize {
        self.outcomes.iter().filter(|(_, outcome)| outcome.is_ok()).count()
    }
}

/// Spins up `peers + 1` nodes with fresh keys on one in-memory hub.
pub fn spawn_group(peers: usize, config: &ConsensusConfig) -> Result<(InMemoryNetwork, Vec<DemoNode>)> {
    let network = InMemoryNetwork::new();
    let members: Vec<(NodeId, Arc<Ed25519Authenticator>)> = (0..=peers)
        .map(|i| {
            let id = NodeId::from(format!("wss://127.0.0.1:{}", 9000 + i));
            (id, Arc::new(Ed25519Authenticator::new(SigningKey::generate(&mut OsRng))))
        })
        .collect();

    let mut nodes = Vec::with_capacity(members.len());
    for (id, auth) in &members {
        let mut directory = PeerDirectory::new(id.clone(), &auth.public_key(), "")?;
        for (other, other_auth) in members.iter().filter(|(other, _)| other != id) {
            directory.add_peer(other.clone(), &other_auth.public_key_hex(), "");
        }

        let store = Arc::new(KvStore::new());
        let cluster = Arc::new(
            ClusterBuilder::new()
                .with_node_id(id.clone())
                .with_auth(auth.clone())
                .with_directory(directory)
                .with_transport(Arc::new(network.endpoint(id.clone())))
                .with_applier(store.clone())
                .with_config(config.clone())
                .build()?,
        );
        let handler: Arc<dyn MessageHandler> = cluster.clone();
        network.register(id.clone(), &handler);

        nodes.push(DemoNode { id: id.clone(), cluster, store });
    }
    Ok((network, nodes))
}

/// Replays `DEMO_REQUESTS` through the first node and collects every
/// node's store afterwards.
pub async fn run_demo(peers: usize, config: ConsensusConfig) -> Result<DemoReport> {
    let (_network, nodes) = spawn_group(peers, &config)?;
    let proposer = &nodes[0];
    info!("🌐 demo group of {} nodes, proposing from {}", nodes.len(), proposer.id);

    let mut outcomes = Vec::with_capacity(DEMO_REQUESTS.len());
    for request in DEMO_REQUESTS {
        let outcome = proposer.cluster.propose(request).await;
        match &outcome {
            Ok(receipt) => info!("✅ {} -> ballot #{} ({} acks)", request, receipt.ballot, receipt.commits),
            Err(e) => match e.resync_hint() {
                Some(peer) => warn!("❌ {} -> {} (resync from {})", request, e, peer),
                None => warn!("❌ {} -> {}", request, e),
            },
        }
        outcomes.push((request.to_string(), outcome));

        // acceptors past the commit quorum get their 1c in the background;
        // one that sees the next ballot first would drop this one as stale
        tokio::time::sleep(SETTLE).await;
    }

    let stores = nodes
        .iter()
        .map(|node| {
            let (id, max_bal, max_vbal, state) = node.cluster.get_status();
            info!("📊 {} maxBal={} maxVBal={} state={}", id, max_bal, max_vbal, state);
            (node.id.clone(), node.store.snapshot())
        })
        .collect();

    Ok(DemoReport { outcomes, stores })
}
