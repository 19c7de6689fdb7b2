//! Node configuration.

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topology::NodeId;
use crate::wire::DEFAULT_MAX_FRAME_LEN;

/// How long a follower waits on the coordinator before declaring it dead.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on every other peer RPC (fan-out, election, backup update).
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Consistency strategy, fixed for the lifetime of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ConsistencyMode {
    Sequential,
    Quorum,
    ReadYourWrite,
}

impl ConsistencyMode {
    /// Peer round trips a coordinator waits through, one after another, to
    /// answer a client request: the backup update, then the quorum fan-out
    /// or the sync pull and push.
    pub fn coordinator_rpc_stages(self) -> u32 {
        match self {
            ConsistencyMode::Sequential => 1,
            ConsistencyMode::Quorum => 2,
            ConsistencyMode::ReadYourWrite => 3,
        }
    }
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyMode::Sequential => write!(f, "sequential"),
            ConsistencyMode::Quorum => write!(f, "quorum"),
            ConsistencyMode::ReadYourWrite => write!(f, "read_your_write"),
        }
    }
}

/// What a follower does when its forward fails while it is already running
/// an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ElectionPolicy {
    /// Fail the request with a retryable `ElectionInProgress`.
    Fail,
    /// Wait for the running election, then retry against its outcome.
    #[default]
    Wait,
}

/// How a Sequential-mode follower handles POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FollowerWritePolicy {
    /// Forward the POST verbatim to the coordinator.
    #[default]
    Forward,
    /// Ask the coordinator for an id and store the article locally.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's position in `peers`.
    pub node_id: NodeId,
    /// Addresses of every replica, this node included, in id order.
    pub peers: Vec<String>,
    pub mode: ConsistencyMode,
    pub forward_timeout: Duration,
    pub rpc_timeout: Duration,
    pub election_policy: ElectionPolicy,
    pub follower_writes: FollowerWritePolicy,
    pub max_frame_len: u64,
}

impl NodeConfig {
    pub fn new(node_id: NodeId, peers: Vec<String>, mode: ConsistencyMode) -> Self {
        Self {
            node_id,
            peers,
            mode,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            election_policy: ElectionPolicy::default(),
            follower_writes: FollowerWritePolicy::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_election_policy(mut self, policy: ElectionPolicy) -> Self {
        self.election_policy = policy;
        self
    }

    pub fn with_follower_writes(mut self, policy: FollowerWritePolicy) -> Self {
        self.follower_writes = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one peer address is required (include self)".into(),
            ));
        }
        if self.node_id >= self.peers.len() {
            return Err(Error::InvalidConfig(format!(
                "node id {} out of range for {} peers",
                self.node_id,
                self.peers.len()
            )));
        }
        if self.forward_timeout.is_zero() || self.rpc_timeout.is_zero() {
            return Err(Error::InvalidConfig("timeouts must be non-zero".into()));
        }
        // A live coordinator must always answer a forward before the
        // follower gives up on it, or the follower elects a second one.
        let budget = self.coordinator_budget();
        if self.forward_timeout <= budget {
            return Err(Error::InvalidConfig(format!(
                "forward timeout {:?} must exceed {:?} ({} x rpc timeout {:?} in {} mode)",
                self.forward_timeout,
                budget,
                self.mode.coordinator_rpc_stages(),
                self.rpc_timeout,
                self.mode
            )));
        }
        Ok(())
    }

    /// Longest a coordinator can spend on peer calls for one client request.
    pub fn coordinator_budget(&self) -> Duration {
        self.rpc_timeout * self.mode.coordinator_rpc_stages()
    }

    /// How long a nominator waits for the nominee's ACK. The nominee tells
    /// every other replica one at a time before acking.
    pub fn nominate_timeout(&self, view_len: usize) -> Duration {
        let calls = u32::try_from(view_len.saturating_sub(1)).unwrap_or(u32::MAX);
        self.rpc_timeout.saturating_mul(calls.max(1))
    }

    /// Address this node listens on.
    pub fn listen_addr(&self) -> Option<&str> {
        self.peers.get(self.node_id).map(String::as_str)
    }
}
