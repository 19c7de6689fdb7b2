//! Outbound RPCs to other replicas.
//!
//! Every call opens a fresh connection, writes one frame, reads one reply
//! and closes. There is no pooling; the protocol is strictly one request per
//! connection.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::article::{Article, ArticleMap};
use crate::error::{Error, Result};
use crate::protocol::{decode_id, Request, WritePayload, ACK, NOTHING};
use crate::topology::NodeId;
use crate::wire::{error_message, read_reply, write_frame, Frame};

#[derive(Debug, Clone)]
pub struct PeerClient {
    max_frame_len: u64,
}

impl PeerClient {
    pub fn new(max_frame_len: u64) -> Self {
        Self { max_frame_len }
    }

    /// Sends a frame and returns the raw reply body, error replies included.
    ///
    /// `limit` bounds the whole exchange: connect, write and reply.
    pub async fn call_raw(&self, addr: &str, frame: &Frame, limit: Duration) -> Result<Vec<u8>> {
        let exchange = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|source| Error::Unreachable {
                    addr: addr.to_string(),
                    source,
                })?;
            debug!(%addr, kind = frame.kind, bytes = frame.payload.len(), "sending request");
            write_frame(&mut stream, frame).await?;
            read_reply(&mut stream, self.max_frame_len).await
        };
        match timeout(limit, exchange).await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Timeout { addr: addr.to_string() }),
        }
    }

    /// Like [`call_raw`](Self::call_raw) but turns error replies into
    /// `Error::Remote`.
    pub async fn call(&self, addr: &str, request: &Request, limit: Duration) -> Result<Vec<u8>> {
        let body = self.call_raw(addr, &request.encode()?, limit).await?;
        match error_message(&body) {
            Some(message) => Err(Error::Remote(message)),
            None => Ok(body),
        }
    }

    async fn call_expect_ack(&self, addr: &str, request: &Request, limit: Duration) -> Result<()> {
        let body = self.call(addr, request, limit).await?;
        if body != ACK {
            return Err(Error::Remote(format!(
                "expected ACK, got {:?}",
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(())
    }

    /// Pushes one article (Quorum write).
    pub async fn write_article(&self, addr: &str, article: Article, limit: Duration) -> Result<()> {
        let request = Request::Write(WritePayload::Single(article));
        self.call_expect_ack(addr, &request, limit).await
    }

    /// Pushes a whole map (sync push).
    pub async fn write_all(&self, addr: &str, articles: ArticleMap, limit: Duration) -> Result<()> {
        let request = Request::Write(WritePayload::Bulk(articles));
        self.call_expect_ack(addr, &request, limit).await
    }

    /// Pulls a replica's full store.
    pub async fn read_store(&self, addr: &str, limit: Duration) -> Result<ArticleMap> {
        let body = self.call(addr, &Request::ReadData, limit).await?;
        decode_article_map(&body)
    }

    pub async fn backup_update(&self, addr: &str, last_id: u64, limit: Duration) -> Result<()> {
        self.call_expect_ack(addr, &Request::BackupUpdate(last_id), limit)
            .await
    }

    pub async fn nominate(
        &self,
        addr: &str,
        dead: NodeId,
        nominator: NodeId,
        limit: Duration,
    ) -> Result<()> {
        let request = Request::Nominate {
            dead: Some(dead),
            nominator: Some(nominator),
        };
        self.call_expect_ack(addr, &request, limit).await
    }

    pub async fn new_leader(
        &self,
        addr: &str,
        leader: NodeId,
        dead: NodeId,
        limit: Duration,
    ) -> Result<()> {
        let request = Request::NewLeader {
            leader: Some(leader),
            dead: Some(dead),
        };
        self.call_expect_ack(addr, &request, limit).await
    }
}

/// Decodes a READ / r_READ reply. `"Nuthin"` decodes to an empty map.
pub fn decode_article_map(body: &[u8]) -> Result<ArticleMap> {
    if body == NOTHING {
        return Ok(ArticleMap::new());
    }
    Ok(serde_json::from_slice(body)?)
}

/// Decodes an r_GET_ID reply.
pub fn decode_id_reply(body: &[u8]) -> Result<u64> {
    if let Some(message) = error_message(body) {
        return Err(Error::Remote(message));
    }
    decode_id(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::NewArticle;
    use tokio::net::TcpListener;

    #[test]
    fn nothing_decodes_to_empty_map() {
        assert!(decode_article_map(NOTHING).expect("decode").is_empty());
        assert!(decode_article_map(b"{}").expect("decode").is_empty());
    }

    #[test]
    fn id_reply_surfaces_remote_errors() {
        assert_eq!(decode_id_reply(&5u64.to_be_bytes()).expect("id"), 5);
        let err = decode_id_reply(b"ERROR: nope").expect_err("remote error");
        assert!(matches!(err, Error::Remote(msg) if msg == "nope"));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let client = PeerClient::new(1024);
        let err = client
            .read_store(&addr, Duration::from_millis(500))
            .await
            .expect_err("nobody listening");
        assert!(err.is_unreachable(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        // Accepted by the kernel backlog but never answered.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let client = PeerClient::new(1024);
        let article = NewArticle::new(0, "t", "c", "u").with_id(1);
        let err = client
            .write_article(&addr, article, Duration::from_millis(100))
            .await
            .expect_err("no reply");
        assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {err:?}");
        drop(listener);
    }

    #[tokio::test]
    async fn stalled_write_counts_against_the_limit() {
        // The peer accepts but never reads, so a large frame fills the
        // socket buffers and the write itself blocks.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let held = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = PeerClient::new(1024);
        let frame = Frame::new(9, vec![b'x'; 32 << 20]);
        let started = std::time::Instant::now();
        let err = client
            .call_raw(&addr, &frame, Duration::from_millis(200))
            .await
            .expect_err("write never drains");
        assert!(matches!(err, Error::Timeout { .. }), "unexpected error: {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        held.abort();
    }
}
