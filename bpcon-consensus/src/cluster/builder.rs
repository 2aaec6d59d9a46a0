use std::sync::Arc;

use bpcon_common::{
    auth::Authenticator,
    error::{BpconError, Result},
    utils::NodeId,
};
use bpcon_p2p::{PeerDirectory, Transport};

use crate::{
    config::ConsensusConfig,
    env::runtime::{KvStore, StateApplier},
    Cluster,
};

pub struct ClusterBuilder {
    node_id: Option<NodeId>,
    auth: Option<Arc<dyn Authenticator>>,
    directory: Option<PeerDirectory>,
    transport: Option<Arc<dyn Transport>>,
    applier: Option<Arc<dyn StateApplier>>,
    config: ConsensusConfig,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            node_id: None,
            auth: None,
            directory: None,
            transport: None,
            applier: None,
            config: ConsensusConfig::default(),
        }
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_directory(mut self, directory: PeerDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_applier(mut self, applier: Arc<dyn StateApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn with_config(mut self, config: ConsensusConfig) -> Self {
        self.config = config;
        self
    }

    /// Without a directory the node starts as a group of one. Without an
    /// applier it gets a fresh `KvStore`.
    pub fn build(self) -> Result<Cluster> {
        let node_id = self.node_id.ok_or_else(|| BpconError::Config("missing node_id".into()))?;
        let auth = self.auth.ok_or_else(|| BpconError::Config("missing auth".into()))?;
        let transport = self.transport.ok_or_else(|| BpconError::Config("missing transport".into()))?;

        let directory = match self.directory {
            Some(directory) => {
                if directory.local_id() != &node_id {
                    return Err(BpconError::Config(format!(
                        "directory belongs to {}, not {}",
                        directory.local_id(),
                        node_id
                    )));
                }
                directory
            }
            None => PeerDirectory::new(node_id.clone(), &auth.public_key(), "")?,
        };
        let applier = self
            .applier
            .unwrap_or_else(|| Arc::new(KvStore::new()) as Arc<dyn StateApplier>);

        Ok(Cluster::new(node_id, auth, directory, transport, applier, self.config))
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
