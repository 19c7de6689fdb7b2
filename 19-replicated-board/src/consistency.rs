//! Coordinator-side consistency strategies.
//!
//! | mode            | POST                                   | READ                      |
//! |-----------------|----------------------------------------|---------------------------|
//! | Sequential      | store locally                          | local store               |
//! | Quorum          | r_WRITE to a random majority           | freshest of a majority    |
//! | Read-Your-Write | store locally, then sync every replica | local store               |
//!
//! Every id assignment is followed by a best-effort BACKUPDATE so the
//! backup can continue numbering if it is promoted.

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::article::{max_id, Article, ArticleMap, NewArticle};
use crate::config::ConsistencyMode;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::protocol::{Request, ACK, NOTHING, SUNK};
use crate::topology::Peer;

impl Node {
    /// Runs a client request on the coordinator.
    pub(crate) async fn coordinate(&self, request: &Request) -> Result<Vec<u8>> {
        match request {
            Request::Post(article) => self.coordinate_post(article.clone()).await,
            Request::Read => self.coordinate_read().await,
            Request::Sync => {
                self.sync().await?;
                Ok(SUNK.to_vec())
            }
            Request::GetId => self.coordinate_get_id().await,
            other => Err(Error::MalformedPayload(format!(
                "{:?} is not a client request",
                other.kind()
            ))),
        }
    }

    pub(crate) async fn coordinate_post(&self, article: NewArticle) -> Result<Vec<u8>> {
        match self.config.mode {
            ConsistencyMode::Sequential => self.post_sequential(article).await,
            ConsistencyMode::Quorum => self.post_quorum(article).await,
            ConsistencyMode::ReadYourWrite => self.post_read_your_write(article).await,
        }
    }

    pub(crate) async fn coordinate_read(&self) -> Result<Vec<u8>> {
        match self.config.mode {
            ConsistencyMode::Quorum => self.read_quorum().await,
            ConsistencyMode::Sequential | ConsistencyMode::ReadYourWrite => {
                self.read_local().await
            }
        }
    }

    /// Assigns the next id without storing anything (r_GET_ID).
    pub(crate) async fn next_article_id(&self) -> u64 {
        let (id, backup) = {
            let mut state = self.state.lock().await;
            (state.assign_id(), state.view.backup().clone())
        };
        self.update_backup(&backup, id).await;
        id
    }

    async fn update_backup(&self, backup: &Peer, last_id: u64) {
        if backup.id == self.id {
            return;
        }
        if let Err(err) = self
            .peers
            .backup_update(&backup.addr, last_id, self.config.rpc_timeout)
            .await
        {
            warn!(
                node = self.id,
                backup = backup.id,
                last_id,
                error = %err,
                "backup update failed"
            );
        }
    }

    /// Assigns an id and stores the article locally under one lock.
    async fn store_new(&self, article: NewArticle) -> (Article, Peer) {
        let mut state = self.state.lock().await;
        if article.parent != 0 && state.store.get(article.parent).is_none() {
            debug!(node = self.id, parent = article.parent, "reply to an unseen article");
        }
        let article = article.with_id(state.assign_id());
        state.store.put(article.clone());
        (article, state.view.backup().clone())
    }

    async fn post_sequential(&self, article: NewArticle) -> Result<Vec<u8>> {
        let (article, backup) = self.store_new(article).await;
        self.update_backup(&backup, article.id).await;
        info!(node = self.id, id = article.id, "article posted");
        Ok(ACK.to_vec())
    }

    async fn post_quorum(&self, article: NewArticle) -> Result<Vec<u8>> {
        let (article, backup, targets) = {
            let mut state = self.state.lock().await;
            let article = article.with_id(state.assign_id());
            let targets = sample_majority(state.view.peers());
            (article, state.view.backup().clone(), targets)
        };
        self.update_backup(&backup, article.id).await;

        let results = join_all(
            targets
                .iter()
                .map(|peer| self.write_to(peer, article.clone())),
        )
        .await;

        let mut acked = 0;
        for (peer, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => acked += 1,
                Err(err) => warn!(
                    node = self.id,
                    peer = peer.id,
                    id = article.id,
                    error = %err,
                    "quorum write failed"
                ),
            }
        }
        if acked < targets.len() {
            return Err(Error::QuorumUnreachable {
                needed: targets.len(),
                acked,
            });
        }
        info!(node = self.id, id = article.id, replicas = acked, "article posted to quorum");
        Ok(ACK.to_vec())
    }

    async fn read_quorum(&self) -> Result<Vec<u8>> {
        let targets = {
            let state = self.state.lock().await;
            sample_majority(state.view.peers())
        };
        let results = join_all(targets.iter().map(|peer| self.read_from(peer))).await;

        let mut maps = Vec::with_capacity(targets.len());
        for (peer, result) in targets.iter().zip(results) {
            match result {
                Ok(map) => maps.push(map),
                Err(err) => {
                    warn!(node = self.id, peer = peer.id, error = %err, "quorum read failed")
                }
            }
        }
        if maps.len() < targets.len() {
            return Err(Error::QuorumUnreachable {
                needed: targets.len(),
                acked: maps.len(),
            });
        }
        match freshest(maps) {
            Some(map) => Ok(serde_json::to_vec(&map)?),
            None => Ok(NOTHING.to_vec()),
        }
    }

    async fn post_read_your_write(&self, article: NewArticle) -> Result<Vec<u8>> {
        let _sync = self.sync_gate.lock().await;
        let (article, backup) = self.store_new(article).await;
        self.update_backup(&backup, article.id).await;
        self.sync_locked().await?;
        info!(node = self.id, id = article.id, "article posted and synced");
        Ok(ACK.to_vec())
    }

    /// Brings every replica up to the union of all stores.
    pub(crate) async fn sync(&self) -> Result<()> {
        let _sync = self.sync_gate.lock().await;
        self.sync_locked().await
    }

    async fn sync_locked(&self) -> Result<()> {
        let peers = self.state.lock().await.view.peers().to_vec();

        // Pull. Later peers in view order win on duplicate ids.
        let pulls = join_all(peers.iter().map(|peer| self.read_from(peer))).await;
        let mut merged = ArticleMap::new();
        for (peer, pulled) in peers.iter().zip(pulls) {
            let articles = pulled.map_err(|err| Error::SyncFailed {
                addr: peer.addr.clone(),
                reason: err.to_string(),
            })?;
            merged.extend(articles);
        }
        if merged.is_empty() {
            debug!(node = self.id, "nothing to sync");
            return Ok(());
        }
        self.state.lock().await.merge(merged.clone());

        // Push.
        let limit = self.config.rpc_timeout;
        let pushes = join_all(peers.iter().filter(|peer| peer.id != self.id).map(|peer| {
            let articles = merged.clone();
            async move { (peer, self.peers.write_all(&peer.addr, articles, limit).await) }
        }))
        .await;
        for (peer, result) in pushes {
            if let Err(err) = result {
                warn!(node = self.id, peer = peer.id, error = %err, "sync push failed");
                return Err(Error::SyncFailed {
                    addr: peer.addr.clone(),
                    reason: err.to_string(),
                });
            }
        }
        info!(node = self.id, articles = merged.len(), replicas = peers.len(), "sync complete");
        Ok(())
    }

    /// r_WRITE of one article, applied directly when the target is this node.
    async fn write_to(&self, peer: &Peer, article: Article) -> Result<()> {
        if peer.id == self.id {
            self.state.lock().await.store_article(article);
            return Ok(());
        }
        self.peers
            .write_article(&peer.addr, article, self.config.rpc_timeout)
            .await
    }

    /// r_READ of a replica's store, read directly when the target is this node.
    async fn read_from(&self, peer: &Peer) -> Result<ArticleMap> {
        if peer.id == self.id {
            return Ok(self.state.lock().await.store.all());
        }
        self.peers
            .read_store(&peer.addr, self.config.rpc_timeout)
            .await
    }
}

/// Picks `⌊N/2⌋ + 1` distinct peers uniformly at random.
fn sample_majority(peers: &[Peer]) -> Vec<Peer> {
    let majority = peers.len() / 2 + 1;
    let mut rng = rand::thread_rng();
    rand::seq::index::sample(&mut rng, peers.len(), majority.min(peers.len()))
        .into_iter()
        .map(|index| peers[index].clone())
        .collect()
}

/// The non-empty map holding the largest id. Ties go to the earliest map.
fn freshest(maps: Vec<ArticleMap>) -> Option<ArticleMap> {
    let mut best: Option<(u64, ArticleMap)> = None;
    for map in maps {
        let Some(top) = max_id(&map) else { continue };
        if best.as_ref().map_or(true, |(best_top, _)| top > *best_top) {
            best = Some((top, map));
        }
    }
    best.map(|(_, map)| map)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::config::NodeConfig;

    fn peers(n: usize) -> Vec<Peer> {
        (0..n)
            .map(|id| Peer {
                id,
                addr: format!("127.0.0.1:{}", 6000 + id),
            })
            .collect()
    }

    fn map_of(ids: &[u64]) -> ArticleMap {
        ids.iter()
            .map(|&id| (id, NewArticle::new(0, "t", "c", "u").with_id(id)))
            .collect()
    }

    #[test]
    fn majority_sample_is_distinct_and_sized() {
        for n in 1..=7 {
            let sample = sample_majority(&peers(n));
            assert_eq!(sample.len(), n / 2 + 1);
            let distinct: HashSet<_> = sample.iter().map(|peer| peer.id).collect();
            assert_eq!(distinct.len(), sample.len());
        }
    }

    #[test]
    fn freshest_prefers_the_largest_id() {
        let picked = freshest(vec![map_of(&[1, 2]), map_of(&[]), map_of(&[1, 2, 3])]);
        assert_eq!(picked, Some(map_of(&[1, 2, 3])));
    }

    #[test]
    fn freshest_of_empty_maps_is_none() {
        assert_eq!(freshest(vec![map_of(&[]), map_of(&[])]), None);
        assert_eq!(freshest(Vec::new()), None);
    }

    #[test]
    fn freshest_keeps_the_first_on_ties() {
        let mut first = map_of(&[4]);
        first.insert(1, NewArticle::new(0, "first", "c", "u").with_id(1));
        let picked = freshest(vec![first.clone(), map_of(&[4])]).expect("non-empty");
        assert_eq!(picked, first);
    }

    #[tokio::test]
    async fn single_node_quorum_read_of_empty_store_is_nothing() {
        let node = Node::new(NodeConfig::new(
            0,
            vec!["127.0.0.1:1".into()],
            ConsistencyMode::Quorum,
        ))
        .expect("node");
        assert_eq!(node.coordinate_read().await.expect("read"), NOTHING);

        node.coordinate_post(NewArticle::new(0, "T", "C", "U"))
            .await
            .expect("post");
        let body = node.coordinate_read().await.expect("read");
        let map: ArticleMap = serde_json::from_slice(&body).expect("json map");
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn single_node_sync_is_trivial() {
        let node = Node::new(NodeConfig::new(
            0,
            vec!["127.0.0.1:1".into()],
            ConsistencyMode::ReadYourWrite,
        ))
        .expect("node");
        assert_eq!(node.coordinate(&Request::Sync).await.expect("sync"), SUNK);
        node.coordinate_post(NewArticle::new(0, "T", "C", "U"))
            .await
            .expect("post");
        assert_eq!(node.status().await.articles.len(), 1);
    }
}
