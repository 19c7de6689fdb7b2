//! Listener loop and per-connection handling.
//!
//! Every accepted connection gets its own task, which reads exactly one
//! request frame, dispatches it to the shared [`Node`], writes one reply and
//! closes. Requests on different connections run concurrently; a handler
//! that forwards or fans out never blocks the accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::wire::{error_body, read_frame, write_reply};

pub struct Server {
    listener: TcpListener,
    node: Arc<Node>,
}

impl Server {
    pub fn new(listener: TcpListener, config: NodeConfig) -> Result<Self> {
        Ok(Self {
            listener,
            node: Arc::new(Node::new(config)?),
        })
    }

    /// Binds the address at `config.peers[config.node_id]`.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let addr = config
            .listen_addr()
            .ok_or_else(|| Error::InvalidConfig("no listen address".into()))?;
        let listener = TcpListener::bind(addr).await?;
        Self::new(listener, config)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, node } = self;
        tokio::pin!(shutdown);

        info!(
            node = node.id(),
            mode = %node.mode(),
            addr = ?listener.local_addr().ok(),
            "replica listening"
        );
        loop {
            select! {
                _ = &mut shutdown => {
                    info!(node = node.id(), "replica shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(node = node.id(), peer = %peer, "accepted connection");
                        spawn_connection_handler(stream, peer, &node);
                    }
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
            }
        }
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, node: &Arc<Node>) {
    let node = Arc::clone(node);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, &node).await {
            warn!(node = node.id(), peer = %peer, error = %err, "connection closed with error");
        }
    });
}

async fn handle_connection(mut stream: TcpStream, node: &Node) -> Result<()> {
    let frame = match read_frame(&mut stream, node.config().max_frame_len).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!(node = node.id(), "connection closed before a request");
            return Ok(());
        }
        Err(err @ Error::FrameTooLarge { .. }) => {
            write_reply(&mut stream, &error_body(&err.to_string())).await?;
            return Err(err);
        }
        Err(err) => return Err(err),
    };
    let reply = node.dispatch(frame).await;
    write_reply(&mut stream, &reply).await
}

/// A replica running on a background task.
pub struct NodeHandle {
    addr: SocketAddr,
    node: Arc<Node>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl NodeHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Stops accepting connections and waits for the listener to close.
    ///
    /// Handlers already running finish on their own.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(Error::Io(std::io::Error::other(err))),
        }
    }
}

/// Starts a replica on an already-bound listener.
///
/// Binding first lets callers pick port 0 and learn every address before
/// any node starts.
pub fn spawn_node(listener: TcpListener, config: NodeConfig) -> Result<NodeHandle> {
    let server = Server::new(listener, config)?;
    let addr = server.local_addr()?;
    let node = server.node();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(server.run_until(async move {
        let _ = shutdown_rx.await;
    }));
    Ok(NodeHandle {
        addr,
        node,
        shutdown_tx,
        task,
    })
}
