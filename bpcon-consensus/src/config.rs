use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and retention knobs for one consensus node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Deadline for a whole ballot round, 1a through 2b.
    pub round_timeout_ms: u64,
    /// Deadline for a single peer request.
    pub request_timeout_ms: u64,
    /// Prior votes each acceptor keeps and reports in its 1b.
    pub max_prior_votes: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            round_timeout_ms: 3_000,
            request_timeout_ms: 1_000,
            max_prior_votes: 64,
        }
    }
}

impl ConsensusConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
