//! Client for the board's public operations.

use std::time::Duration;

use crate::article::{ArticleMap, NewArticle};
use crate::error::Result;
use crate::peer::{decode_article_map, PeerClient};
use crate::protocol::Request;
use crate::wire::DEFAULT_MAX_FRAME_LEN;

/// Longer than a forward timeout plus an election, so a client normally
/// sees the replica's own verdict rather than giving up first.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to one replica. Any replica accepts every operation.
#[derive(Debug, Clone)]
pub struct BoardClient {
    addr: String,
    timeout: Duration,
    inner: PeerClient,
}

impl BoardClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_CLIENT_TIMEOUT,
            inner: PeerClient::new(DEFAULT_MAX_FRAME_LEN),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Posts an article or reply; returns the acknowledgement text.
    pub async fn post(&self, article: &NewArticle) -> Result<String> {
        let body = self.call(&Request::Post(article.clone())).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Reads the board. An empty board reads as an empty map.
    pub async fn read(&self) -> Result<ArticleMap> {
        let body = self.call(&Request::Read).await?;
        decode_article_map(&body)
    }

    /// Forces a full sync; returns the acknowledgement text.
    pub async fn sync(&self) -> Result<String> {
        let body = self.call(&Request::Sync).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn call(&self, request: &Request) -> Result<Vec<u8>> {
        self.inner.call(&self.addr, request, self.timeout).await
    }
}
