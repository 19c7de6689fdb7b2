use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{ConsistencyMode, ElectionPolicy, FollowerWritePolicy, NodeConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replicated bulletin board", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one replica.
    Node(NodeArgs),
    /// Post an article or a reply through any replica.
    Post(PostArgs),
    /// Print the board as seen through a replica.
    Read(TargetArgs),
    /// Force every replica to converge.
    Sync(TargetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// This node's position in --peer.
    #[arg(long)]
    pub id: usize,

    /// Every replica's address, this node included, in the same order on all nodes.
    #[arg(long = "peer", value_delimiter = ',', required = true)]
    pub peers: Vec<String>,

    #[arg(long, value_enum, default_value_t = ConsistencyMode::Sequential)]
    pub mode: ConsistencyMode,

    /// Milliseconds to wait on the coordinator before starting an election.
    #[arg(long, default_value_t = 10_000)]
    pub forward_timeout_ms: u64,

    /// Milliseconds to wait on any other peer call. The forward timeout
    /// must exceed this times the coordinator's round trips per request.
    #[arg(long, default_value_t = 3_000)]
    pub rpc_timeout_ms: u64,

    /// What to do when the coordinator fails again mid-election.
    #[arg(long, value_enum, default_value_t = ElectionPolicy::Wait)]
    pub election_policy: ElectionPolicy,

    /// How a Sequential follower handles POST.
    #[arg(long, value_enum, default_value_t = FollowerWritePolicy::Forward)]
    pub follower_writes: FollowerWritePolicy,
}

impl NodeArgs {
    pub fn into_config(self) -> NodeConfig {
        NodeConfig::new(self.id, self.peers, self.mode)
            .with_forward_timeout(Duration::from_millis(self.forward_timeout_ms))
            .with_rpc_timeout(Duration::from_millis(self.rpc_timeout_ms))
            .with_election_policy(self.election_policy)
            .with_follower_writes(self.follower_writes)
    }
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Replica to talk to.
    #[arg(long, default_value = "127.0.0.1:5001")]
    pub server: String,

    /// Give up after this many milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PostArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long)]
    pub user: String,

    #[arg(long, default_value = "")]
    pub title: String,

    #[arg(long)]
    pub content: String,

    /// Id of the article being replied to; 0 posts a new thread.
    #[arg(long, default_value_t = 0)]
    pub parent: u64,
}
