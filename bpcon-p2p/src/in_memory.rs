use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use async_trait::async_trait;

use bpcon_common::utils::NodeId;

use crate::{
    message::NetworkError,
    ports::{MessageHandler, Transport},
};

#[derive(Default)]
struct HubState {
    handlers: HashMap<NodeId, Weak<dyn MessageHandler>>,
    down: HashSet<NodeId>,
    latency: HashMap<NodeId, Duration>,
}

/// In-process stand-in for the socket layer. Nodes register a handler and
/// talk through `InMemoryTransport` endpoints. Reachability and latency can
/// be changed per node to simulate partitions and slow peers.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `handler` for `id`. The hub keeps only a weak reference,
    /// so a node that is dropped simply stops answering.
    pub fn register(&self, id: NodeId, handler: &Arc<dyn MessageHandler>) {
        self.state().handlers.insert(id, Arc::downgrade(handler));
    }

    pub fn endpoint(&self, local: NodeId) -> InMemoryTransport {
        InMemoryTransport { local, network: self.clone() }
    }

    /// An unreachable node can neither send nor receive.
    pub fn set_reachable(&self, id: &NodeId, reachable: bool) {
        let mut state = self.state();
        if reachable {
            state.down.remove(id);
        } else {
            state.down.insert(id.clone());
        }
    }

    /// Delay applied before a request reaches `id`.
    pub fn set_latency(&self, id: &NodeId, latency: Duration) {
        self.state().latency.insert(id.clone(), latency);
    }

    pub fn registered(&self) -> Vec<NodeId> {
        self.state().handlers.keys().cloned().collect()
    }
}

#[derive(Clone)]
pub struct InMemoryTransport {
    local: NodeId,
    network: InMemoryNetwork,
}

impl InMemoryTransport {
    pub fn local_id(&self) -> &NodeId {
        &self.local
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn request(&self, peer: &NodeId, frame: Vec<u8>) -> Result<Option<Vec<u8>>, NetworkError> {
        let (handler, latency) = {
            let state = self.network.state();
            if state.down.contains(&self.local) || state.down.contains(peer) {
                return Err(NetworkError::unreachable(peer));
            }
            let handler = state
                .handlers
                .get(peer)
                .ok_or_else(|| NetworkError::PeerNotFound(peer.0.clone()))?
                .clone();
            (handler, state.latency.get(peer).copied().unwrap_or_default())
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let handler = handler.upgrade().ok_or_else(|| NetworkError::SendError(peer.0.clone()))?;
        Ok(handler.on_message(&self.local, frame).await)
    }
}
