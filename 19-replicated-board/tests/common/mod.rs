//! Test harness: a cluster of real replicas on localhost.
#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use replicated_board::{
    spawn_node, BoardClient, ConsistencyMode, NewArticle, NodeConfig, NodeHandle, NodeStatus,
};
use tokio::net::TcpListener;

/// Short enough to keep failover tests fast, long enough for loopback.
/// The forward timeout outlasts three RPC timeouts, the longest a
/// Read-Your-Write coordinator can spend on one request.
pub const FORWARD_TIMEOUT: Duration = Duration::from_millis(1000);
pub const RPC_TIMEOUT: Duration = Duration::from_millis(200);

/// Cluster of replicas. A slot is `None` once its node has been stopped, or
/// when it was started as a black hole.
pub struct TestCluster {
    pub addrs: Vec<String>,
    handles: Vec<Option<NodeHandle>>,
    /// Listeners bound but never accepted from: connects succeed, replies never come.
    black_holes: Vec<TcpListener>,
}

impl TestCluster {
    pub async fn spawn(n: usize, mode: ConsistencyMode) -> Result<Self> {
        Self::spawn_with(n, mode, |config| config).await
    }

    /// Spawns `n` replicas, letting the caller adjust each config.
    pub async fn spawn_with<F>(n: usize, mode: ConsistencyMode, tweak: F) -> Result<Self>
    where
        F: Fn(NodeConfig) -> NodeConfig,
    {
        Self::build(n, mode, &[], tweak).await
    }

    /// Like [`spawn`](Self::spawn), but the nodes listed in `silent` never
    /// answer anything.
    pub async fn spawn_with_black_holes(
        n: usize,
        mode: ConsistencyMode,
        silent: &[usize],
    ) -> Result<Self> {
        Self::build(n, mode, silent, |config| config).await
    }

    async fn build<F>(n: usize, mode: ConsistencyMode, silent: &[usize], tweak: F) -> Result<Self>
    where
        F: Fn(NodeConfig) -> NodeConfig,
    {
        // Bind everything first so every node knows every address up front.
        let mut listeners = Vec::with_capacity(n);
        for _ in 0..n {
            listeners.push(TcpListener::bind("127.0.0.1:0").await?);
        }
        let addrs = listeners
            .iter()
            .map(|listener| listener.local_addr().map(|addr| addr.to_string()))
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut handles = Vec::with_capacity(n);
        let mut black_holes = Vec::new();
        for (id, listener) in listeners.into_iter().enumerate() {
            if silent.contains(&id) {
                black_holes.push(listener);
                handles.push(None);
                continue;
            }
            let config = NodeConfig::new(id, addrs.clone(), mode)
                .with_forward_timeout(FORWARD_TIMEOUT)
                .with_rpc_timeout(RPC_TIMEOUT);
            let handle = spawn_node(listener, tweak(config))
                .with_context(|| format!("failed to spawn node {id}"))?;
            handles.push(Some(handle));
        }

        Ok(Self {
            addrs,
            handles,
            black_holes,
        })
    }

    pub fn client(&self, id: usize) -> BoardClient {
        BoardClient::new(self.addrs[id].clone()).with_timeout(Duration::from_secs(10))
    }

    pub fn handle(&self, id: usize) -> &NodeHandle {
        match &self.handles[id] {
            Some(handle) => handle,
            None => panic!("node {id} is not running"),
        }
    }

    pub async fn status(&self, id: usize) -> NodeStatus {
        self.handle(id).node().status().await
    }

    /// Stops a node; its port refuses connections afterwards.
    pub async fn kill(&mut self, id: usize) -> Result<()> {
        if let Some(handle) = self.handles[id].take() {
            handle.shutdown().await?;
        }
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        for handle in self.handles.iter_mut().filter_map(Option::take) {
            handle.shutdown().await?;
        }
        self.black_holes.clear();
        Ok(())
    }
}

pub fn article(user: &str, content: &str) -> NewArticle {
    NewArticle::new(0, "title", content, user)
}
