use std::{fs, io, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::info;

use bpcon_common::{
    auth::{ed25519::Ed25519Authenticator, Authenticator},
    error::{BpconError, Result},
    utils::NodeId,
};
use bpcon_consensus::{Cluster, ClusterBuilder, ConsensusConfig, StateApplier};
use bpcon_p2p::{
    key_manager::{load_or_generate_signing_key, CredentialStore, FileCredentialStore},
    PeerDirectory, Transport,
};

/// On-disk settings for one group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub address: NodeId,
    pub peers: Vec<NodeId>,
    pub keypair_path: String,
    pub credentials_dir: String,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

/// Everything a `Cluster` needs, resolved from a `NodeConfig`.
pub struct NodeBundle {
    pub address: NodeId,
    pub peers: Vec<NodeId>,
    pub auth: Arc<Ed25519Authenticator>,
    pub directory: PeerDirectory,
    pub consensus: ConsensusConfig,
}

impl NodeConfig {
    pub fn new(address: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            address,
            peers,
            keypair_path: "keys/node.key".to_string(),
            credentials_dir: "keys/peers".to_string(),
            consensus: ConsensusConfig::default(),
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str::<NodeConfig>(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn credential_store(&self) -> io::Result<Arc<dyn CredentialStore>> {
        Ok(Arc::new(FileCredentialStore::new(&self.credentials_dir)?))
    }

    /// Loads (or creates) the signing key and registers every configured
    /// peer whose key file is present.
    pub fn resolve(&self) -> Result<NodeBundle> {
        let key = load_or_generate_signing_key(Path::new(&self.keypair_path))?;
        let auth = Arc::new(Ed25519Authenticator::new(key));

        let mut directory =
            PeerDirectory::new(self.address.clone(), &auth.public_key(), "")?.with_store(self.credential_store()?);
        let loaded = directory.load_group(&self.peers);
        info!("🔑 loaded keys for {}/{} configured peers", loaded, self.peers.len());

        Ok(NodeBundle {
            address: self.address.clone(),
            peers: self.peers.clone(),
            auth,
            directory,
            consensus: self.consensus.clone(),
        })
    }
}

impl NodeBundle {
    pub fn build_cluster(self, transport: Arc<dyn Transport>, applier: Arc<dyn StateApplier>) -> Result<Cluster> {
        ClusterBuilder::new()
            .with_node_id(self.address)
            .with_auth(self.auth)
            .with_directory(self.directory)
            .with_transport(transport)
            .with_applier(applier)
            .with_config(self.consensus)
            .build()
    }

    /// Configured peers that have no registered key.
    pub fn missing_peers(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|peer| **peer != self.address && !self.directory.contains(peer))
            .cloned()
            .collect()
    }
}

/// Registers `address` with `public_key_hex` in the node's credential store.
pub fn add_peer(config: &NodeConfig, address: NodeId, public_key_hex: &str, certificate: &str) -> Result<()> {
    let mut bundle = config.resolve()?;
    if !bundle.directory.add_peer(address.clone(), public_key_hex, certificate) {
        return Err(BpconError::Config(format!("could not add peer {}", address)));
    }
    Ok(())
}
