//! Replicated bulletin board.
//!
//! A fixed set of replicas serves one shared board of articles and replies.
//! One replica coordinates: it assigns article ids and runs the configured
//! consistency strategy. Followers forward client requests to it and, when
//! it stops answering, elect its backup in its place.
//!
//! # Consistency modes
//!
//! - **Sequential**: the coordinator alone stores new articles; followers
//!   read their own, possibly stale, store.
//! - **Quorum**: writes and reads go to a random majority; reads return the
//!   freshest map seen.
//! - **Read-Your-Write**: every write is followed by a full sync, so a read
//!   at any replica sees it.
//!
//! # Modules
//!
//! - [`wire`]: frame codec shared by replicas and clients
//! - [`protocol`]: request codes and payloads
//! - [`node`]: replica state and request routing
//! - [`consistency`]: coordinator-side strategies
//! - [`election`]: forwarding and failover
//! - [`runtime`]: listener loop and node spawning
//! - [`client`]: client for POST / READ / SYNC

pub mod article;
pub mod cli;
pub mod client;
pub mod config;
pub mod consistency;
pub mod election;
pub mod error;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod runtime;
pub mod store;
pub mod topology;
pub mod wire;

pub use article::{Article, ArticleMap, NewArticle};
pub use client::BoardClient;
pub use config::{ConsistencyMode, ElectionPolicy, FollowerWritePolicy, NodeConfig};
pub use error::{Error, Result};
pub use node::{Node, NodeStatus};
pub use runtime::{spawn_node, NodeHandle, Server};
pub use topology::{NodeId, Role};
