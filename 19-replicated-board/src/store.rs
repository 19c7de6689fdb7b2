//! In-memory article storage for a single replica.
//!
//! Each node owns exactly one `ArticleStore`. The store does no locking of
//! its own: the node keeps it inside its state mutex so store mutations,
//! id assignment and peer-view changes are serialized together.

use crate::article::{max_id, Article, ArticleMap};

/// Articles held by one replica, keyed by id.
///
/// `BTreeMap` keeps iteration in id order, which makes the JSON snapshots
/// sent over the wire deterministic and gives "largest id" for free.
#[derive(Debug, Default, Clone)]
pub struct ArticleStore {
    articles: ArticleMap,
}

impl ArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an article, replacing any article with the same id.
    pub fn put(&mut self, article: Article) {
        self.articles.insert(article.id, article);
    }

    /// Returns the article with `id`, or `None` if this replica never saw it.
    ///
    /// The coordinator uses it to notice replies to unseen threads; front
    /// ends embedding a node can use it to look up a single article.
    pub fn get(&self, id: u64) -> Option<&Article> {
        self.articles.get(&id)
    }

    /// Returns a snapshot of every article.
    ///
    /// Clones the map so callers can serialize it after the node lock is
    /// released.
    pub fn all(&self) -> ArticleMap {
        self.articles.clone()
    }

    /// Takes every entry of `other`, replacing local entries with the same
    /// id. Local entries missing from `other` are left alone.
    pub fn merge(&mut self, other: ArticleMap) {
        self.articles.extend(other);
    }

    pub fn max_id(&self) -> Option<u64> {
        max_id(&self.articles)
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}
