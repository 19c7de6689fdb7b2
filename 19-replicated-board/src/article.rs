//! Article records carried on the wire and held in every store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Articles keyed by id. Serializes as a JSON object with string keys,
/// e.g. `{"1": {...}}`.
pub type ArticleMap = BTreeMap<u64, Article>;

/// A post or reply. `parent == 0` marks a root post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: u64,
    pub parent: u64,
    pub title: String,
    pub content: String,
    pub user: String,
}

/// The body of a client POST. The coordinator assigns the id, so any id the
/// client sends (usually `null`) is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArticle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub parent: u64,
    #[serde(default)]
    pub title: String,
    pub content: String,
    pub user: String,
}

impl NewArticle {
    pub fn new(
        parent: u64,
        title: impl Into<String>,
        content: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            parent,
            title: title.into(),
            content: content.into(),
            user: user.into(),
        }
    }

    pub fn with_id(self, id: u64) -> Article {
        Article {
            id,
            parent: self.parent,
            title: self.title,
            content: self.content,
            user: self.user,
        }
    }
}

/// Largest id in a map, if any.
pub fn max_id(articles: &ArticleMap) -> Option<u64> {
    articles.keys().next_back().copied()
}
