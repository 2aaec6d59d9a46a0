//! Concurrent fan-out of one frame to many peers.
//!
//! Every peer gets its own request future with its own timeout. Replies are
//! handed to the caller as they arrive, so a proposer can stop listening as
//! soon as it has the quorum it needs.

use std::{
    collections::BTreeMap,
    ops::ControlFlow,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use tracing::{debug, info};

use bpcon_common::utils::NodeId;

use crate::{message::NetworkError, ports::Transport};

/// Outcome of one peer's request.
#[derive(Debug)]
pub struct PeerReply {
    pub peer: NodeId,
    pub latency: Duration,
    pub result: Result<Option<Vec<u8>>, NetworkError>,
}

/// Requests that were still in flight when the caller stopped listening.
pub type ReplyStream = FuturesUnordered<BoxFuture<'static, PeerReply>>;

/// Per-peer latency map. `None` marks a peer whose request failed.
#[derive(Debug, Clone, Default)]
pub struct LatencyReport {
    pub latencies: BTreeMap<NodeId, Option<Duration>>,
    pub total: usize,
}

impl LatencyReport {
    pub fn new(total: usize) -> Self {
        Self { latencies: BTreeMap::new(), total }
    }

    pub fn record(&mut self, reply: &PeerReply) {
        let latency = reply.result.as_ref().ok().map(|_| reply.latency);
        self.latencies.insert(reply.peer.clone(), latency);
    }

    pub fn good_peers(&self) -> usize {
        self.latencies.values().filter(|l| l.is_some()).count()
    }

    pub fn log(&self, label: &str) {
        info!("📡 [{}] Peers: {}/{}", label, self.good_peers(), self.total);
        debug!("📡 [{}] Peer Latencies: {:?}", label, self.latencies);
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self { transport, request_timeout }
    }

    /// Starts one request per peer without awaiting any of them.
    pub fn fan_out(&self, frame: Vec<u8>, peers: &[NodeId]) -> ReplyStream {
        peers
            .iter()
            .map(|peer| {
                let transport = Arc::clone(&self.transport);
                let frame = frame.clone();
                let peer = peer.clone();
                let timeout = self.request_timeout;

                async move {
                    let start = Instant::now();
                    let result = match tokio::time::timeout(timeout, transport.request(&peer, frame)).await {
                        Ok(result) => result,
                        Err(_) => Err(NetworkError::Timeout(peer.0.clone())),
                    };
                    if let Err(e) = &result {
                        debug!("send to peer {} failed: {}", peer, e);
                    }
                    PeerReply { peer, latency: start.elapsed(), result }
                }
                .boxed()
            })
            .collect()
    }

    /// Sends `frame` to every peer concurrently and feeds each reply to
    /// `on_reply` as it lands. Returning `ControlFlow::Break` stops listening;
    /// the requests still in flight are returned untouched.
    pub async fn broadcast<F>(&self, frame: Vec<u8>, peers: &[NodeId], mut on_reply: F) -> (LatencyReport, ReplyStream)
    where
        F: FnMut(PeerReply) -> ControlFlow<()>,
    {
        let mut report = LatencyReport::new(peers.len());
        let mut pending = self.fan_out(frame, peers);

        while let Some(reply) = pending.next().await {
            report.record(&reply);
            if on_reply(reply).is_break() {
                break;
            }
        }

        (report, pending)
    }
}

/// Lets the remaining requests of a broadcast finish on their own.
pub fn spawn_drain(label: &'static str, mut pending: ReplyStream) {
    if pending.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let mut delivered = 0usize;
        let mut failed = 0usize;
        while let Some(reply) = pending.next().await {
            match reply.result {
                Ok(_) => delivered += 1,
                Err(_) => failed += 1,
            }
        }
        debug!("📡 [{}] late deliveries: {} ok, {} failed", label, delivered, failed);
    });
}
