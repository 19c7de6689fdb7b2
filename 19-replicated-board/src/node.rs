//! A single replica: its state and the request router.
//!
//! All mutable state (store, id counter, peer view, election flag) lives in
//! one [`NodeState`] behind a single async mutex. Handlers take the lock for
//! short, synchronous updates and always release it before touching the
//! network, so a slow peer can never stall unrelated requests.
//!
//! The coordinator-side strategies live in [`crate::consistency`] and the
//! forwarding/election logic in [`crate::election`]; both are `impl Node`
//! blocks over the state defined here.

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::article::{Article, ArticleMap, NewArticle};
use crate::config::{ConsistencyMode, FollowerWritePolicy, NodeConfig};
use crate::error::Result;
use crate::peer::{decode_id_reply, PeerClient};
use crate::protocol::{encode_id, Request, WritePayload, ACK};
use crate::store::ArticleStore;
use crate::topology::{NodeId, Peer, PeerView, Role};
use crate::wire::{error_body, Frame};

/// Everything a node mutates, guarded together.
#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) view: PeerView,
    pub(crate) store: ArticleStore,
    /// Highest article id this node has assigned or seen.
    pub(crate) last_id: u64,
    pub(crate) electing: bool,
}

impl NodeState {
    fn new(view: PeerView) -> Self {
        Self {
            view,
            store: ArticleStore::new(),
            last_id: 0,
            electing: false,
        }
    }

    pub(crate) fn is_coordinator(&self, id: NodeId) -> bool {
        self.view.coordinator().id == id
    }

    fn role(&self, id: NodeId) -> Role {
        if self.is_coordinator(id) {
            Role::Coordinator
        } else if self.electing {
            Role::Electing
        } else {
            Role::Follower
        }
    }

    pub(crate) fn assign_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    /// Raises the id counter so a later promotion never reuses `id`.
    pub(crate) fn observe_id(&mut self, id: u64) {
        self.last_id = self.last_id.max(id);
    }

    pub(crate) fn store_article(&mut self, article: Article) {
        self.observe_id(article.id);
        self.store.put(article);
    }

    pub(crate) fn merge(&mut self, articles: ArticleMap) {
        if let Some(id) = crate::article::max_id(&articles) {
            self.observe_id(id);
        }
        self.store.merge(articles);
    }
}

/// Snapshot of a node's state.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub mode: ConsistencyMode,
    pub role: Role,
    pub coordinator: NodeId,
    pub backup: NodeId,
    pub peers: Vec<NodeId>,
    pub last_id: u64,
    pub articles: ArticleMap,
}

pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) config: NodeConfig,
    pub(crate) state: Mutex<NodeState>,
    /// Held for the whole of an election this node initiates.
    pub(crate) election_gate: Mutex<()>,
    /// Held for the whole of a Read-Your-Write sync.
    pub(crate) sync_gate: Mutex<()>,
    pub(crate) peers: PeerClient,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let view = PeerView::new(config.peers.clone())?;
        Ok(Self {
            id: config.node_id,
            peers: PeerClient::new(config.max_frame_len),
            state: Mutex::new(NodeState::new(view)),
            election_gate: Mutex::new(()),
            sync_gate: Mutex::new(()),
            config,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn mode(&self) -> ConsistencyMode {
        self.config.mode
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub async fn is_coordinator(&self) -> bool {
        self.state.lock().await.is_coordinator(self.id)
    }

    pub async fn role(&self) -> Role {
        self.state.lock().await.role(self.id)
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.state.lock().await;
        NodeStatus {
            node_id: self.id,
            mode: self.config.mode,
            role: state.role(self.id),
            coordinator: state.view.coordinator().id,
            backup: state.view.backup().id,
            peers: state.view.ids(),
            last_id: state.last_id,
            articles: state.store.all(),
        }
    }

    pub(crate) async fn coordinator(&self) -> Peer {
        self.state.lock().await.view.coordinator().clone()
    }

    /// Handles one request frame and returns the reply body.
    ///
    /// Never fails: errors become `ERROR: ...` bodies so the connection
    /// still gets exactly one reply.
    pub async fn dispatch(&self, frame: Frame) -> Vec<u8> {
        match self.route(&frame).await {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    node = self.id,
                    kind = frame.kind,
                    retryable = err.is_retryable(),
                    error = %err,
                    "request failed"
                );
                error_body(&err.to_string())
            }
        }
    }

    async fn route(&self, frame: &Frame) -> Result<Vec<u8>> {
        let request = Request::decode(frame)?;
        debug!(node = self.id, kind = ?request.kind(), "dispatching request");
        match request {
            Request::Post(article) => self.handle_post(frame, article).await,
            Request::Read => self.handle_read(frame).await,
            request @ (Request::Sync | Request::GetId) => {
                if self.is_coordinator().await {
                    self.coordinate(&request).await
                } else {
                    self.forward(&request, frame).await
                }
            }
            Request::Write(payload) => {
                self.apply_write(payload).await;
                Ok(ACK.to_vec())
            }
            Request::ReadData => self.read_local().await,
            Request::BackupUpdate(id) => {
                self.state.lock().await.observe_id(id);
                debug!(node = self.id, id, "backup counter updated");
                Ok(ACK.to_vec())
            }
            Request::Nominate { dead, nominator } => {
                self.handle_nominate(dead, nominator).await?;
                Ok(ACK.to_vec())
            }
            Request::NewLeader { leader, dead } => {
                self.handle_new_leader(leader, dead).await?;
                Ok(ACK.to_vec())
            }
        }
    }

    async fn handle_post(&self, frame: &Frame, article: NewArticle) -> Result<Vec<u8>> {
        if self.is_coordinator().await {
            return self.coordinate_post(article).await;
        }
        match (self.config.mode, self.config.follower_writes) {
            (ConsistencyMode::Sequential, FollowerWritePolicy::Local) => {
                self.post_with_coordinator_id(article).await
            }
            _ => self.forward(&Request::Post(article), frame).await,
        }
    }

    async fn handle_read(&self, frame: &Frame) -> Result<Vec<u8>> {
        // Sequential followers answer from their own, possibly stale, store.
        if self.config.mode == ConsistencyMode::Sequential {
            return self.read_local().await;
        }
        if self.is_coordinator().await {
            self.coordinate_read().await
        } else {
            self.forward(&Request::Read, frame).await
        }
    }

    /// Sequential follower write: the coordinator only hands out the id.
    async fn post_with_coordinator_id(&self, article: NewArticle) -> Result<Vec<u8>> {
        let request = Request::GetId;
        let body = self.forward(&request, &request.encode()?).await?;
        let id = decode_id_reply(&body)?;
        self.state.lock().await.store_article(article.with_id(id));
        debug!(node = self.id, id, "stored article under coordinator-issued id");
        Ok(ACK.to_vec())
    }

    async fn apply_write(&self, payload: WritePayload) {
        let mut state = self.state.lock().await;
        match payload {
            WritePayload::Single(article) => {
                debug!(node = self.id, id = article.id, "applying replicated article");
                state.store_article(article);
            }
            WritePayload::Bulk(articles) => {
                debug!(node = self.id, count = articles.len(), "applying synced store");
                state.merge(articles);
            }
        }
    }

    pub(crate) async fn read_local(&self) -> Result<Vec<u8>> {
        let articles = self.state.lock().await.store.all();
        Ok(serde_json::to_vec(&articles)?)
    }

    pub(crate) async fn coordinate_get_id(&self) -> Result<Vec<u8>> {
        let id = self.next_article_id().await;
        Ok(encode_id(id))
    }
}
