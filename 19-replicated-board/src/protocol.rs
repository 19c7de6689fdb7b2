//! Request types understood by every replica.
//!
//! Raw frames are decoded exactly once, at the router boundary, into a
//! [`Request`]. Each variant carries the payload shape its handler needs, so
//! handlers never look at type codes or raw bytes again.

use serde::{Deserialize, Serialize};

use crate::article::{Article, ArticleMap, NewArticle};
use crate::error::{Error, Result};
use crate::topology::NodeId;
use crate::wire::{be_u64, Frame};

/// Plain acknowledgement.
pub const ACK: &[u8] = b"ACK";
/// Quorum READ reply when every sampled store was empty.
pub const NOTHING: &[u8] = b"Nuthin";
/// Reply to a completed SYNC.
pub const SUNK: &[u8] = b"Consider yourself sunk";

/// Numeric request codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum RequestKind {
    Post = 1,
    Read = 3,
    Sync = 6,
    GetId = 7,
    Nominate = 8,
    Write = 9,
    ReadData = 10,
    BackupUpdate = 11,
    NewLeader = 12,
}

impl RequestKind {
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        let kind = match code {
            1 => Self::Post,
            3 => Self::Read,
            6 => Self::Sync,
            7 => Self::GetId,
            8 => Self::Nominate,
            9 => Self::Write,
            10 => Self::ReadData,
            11 => Self::BackupUpdate,
            12 => Self::NewLeader,
            _ => return None,
        };
        Some(kind)
    }

    /// Requests a client may send to any replica. These are forwarded to the
    /// coordinator when they land on a follower.
    pub fn is_client_facing(self) -> bool {
        matches!(self, Self::Post | Self::Read | Self::Sync)
    }
}

/// Body of an `r_WRITE`: one article, or a whole map during a sync push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WritePayload {
    Single(Article),
    Bulk(ArticleMap),
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Post(NewArticle),
    Read,
    Sync,
    GetId,
    Write(WritePayload),
    ReadData,
    BackupUpdate(u64),
    Nominate {
        /// Coordinator the nominator gave up on. `None` means "whoever you
        /// currently follow".
        dead: Option<NodeId>,
        nominator: Option<NodeId>,
    },
    NewLeader {
        leader: Option<NodeId>,
        dead: Option<NodeId>,
    },
}

impl Request {
    /// Decodes a raw frame. Unknown codes and malformed payloads are
    /// protocol errors; the caller answers them with an error reply.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let kind = RequestKind::from_code(frame.kind).ok_or(Error::UnknownRequest(frame.kind))?;
        let payload = frame.payload.as_slice();
        let request = match kind {
            RequestKind::Post => Request::Post(serde_json::from_slice(payload)?),
            // READ and SYNC bodies are ignored; older clients send a dummy
            // article with them.
            RequestKind::Read => Request::Read,
            RequestKind::Sync => Request::Sync,
            RequestKind::GetId => Request::GetId,
            RequestKind::Write => Request::Write(serde_json::from_slice(payload)?),
            RequestKind::ReadData => Request::ReadData,
            RequestKind::BackupUpdate => Request::BackupUpdate(decode_id(payload)?),
            RequestKind::Nominate => {
                let (dead, nominator) = decode_id_pair(payload)?;
                Request::Nominate { dead, nominator }
            }
            RequestKind::NewLeader => {
                let (leader, dead) = decode_id_pair(payload)?;
                Request::NewLeader { leader, dead }
            }
        };
        Ok(request)
    }

    /// Encodes the request as a frame.
    pub fn encode(&self) -> Result<Frame> {
        let frame = match self {
            Request::Post(article) => {
                Frame::new(RequestKind::Post.code(), serde_json::to_vec(article)?)
            }
            Request::Read => Frame::new(RequestKind::Read.code(), Vec::new()),
            Request::Sync => Frame::new(RequestKind::Sync.code(), Vec::new()),
            Request::GetId => Frame::new(RequestKind::GetId.code(), Vec::new()),
            Request::Write(payload) => {
                Frame::new(RequestKind::Write.code(), serde_json::to_vec(payload)?)
            }
            Request::ReadData => Frame::new(RequestKind::ReadData.code(), Vec::new()),
            Request::BackupUpdate(id) => {
                Frame::new(RequestKind::BackupUpdate.code(), encode_id(*id))
            }
            Request::Nominate { dead, nominator } => Frame::new(
                RequestKind::Nominate.code(),
                encode_id_pair(*dead, *nominator),
            ),
            Request::NewLeader { leader, dead } => Frame::new(
                RequestKind::NewLeader.code(),
                encode_id_pair(*leader, *dead),
            ),
        };
        Ok(frame)
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Post(_) => RequestKind::Post,
            Request::Read => RequestKind::Read,
            Request::Sync => RequestKind::Sync,
            Request::GetId => RequestKind::GetId,
            Request::Write(_) => RequestKind::Write,
            Request::ReadData => RequestKind::ReadData,
            Request::BackupUpdate(_) => RequestKind::BackupUpdate,
            Request::Nominate { .. } => RequestKind::Nominate,
            Request::NewLeader { .. } => RequestKind::NewLeader,
        }
    }
}

pub fn encode_id(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

pub fn decode_id(payload: &[u8]) -> Result<u64> {
    if payload.len() != 8 {
        return Err(Error::MalformedPayload(format!(
            "expected an 8-byte id, got {} bytes",
            payload.len()
        )));
    }
    Ok(be_u64(payload))
}

fn encode_id_pair(first: Option<NodeId>, second: Option<NodeId>) -> Vec<u8> {
    match (first, second) {
        (None, None) => Vec::new(),
        (first, second) => {
            let mut out = encode_id(first.map_or(u64::MAX, |id| id as u64));
            out.extend(encode_id(second.map_or(u64::MAX, |id| id as u64)));
            out
        }
    }
}

/// Empty payload means both ids are unknown. `u64::MAX` marks one unknown id.
fn decode_id_pair(payload: &[u8]) -> Result<(Option<NodeId>, Option<NodeId>)> {
    match payload.len() {
        0 => Ok((None, None)),
        16 => Ok((node_id(be_u64(&payload[..8]))?, node_id(be_u64(&payload[8..]))?)),
        len => Err(Error::MalformedPayload(format!(
            "expected 0 or 16 bytes of node ids, got {len}"
        ))),
    }
}

fn node_id(raw: u64) -> Result<Option<NodeId>> {
    if raw == u64::MAX {
        return Ok(None);
    }
    NodeId::try_from(raw)
        .map(Some)
        .map_err(|_| Error::MalformedPayload(format!("node id {raw} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: RequestKind, payload: &[u8]) -> Frame {
        Frame::new(kind.code(), payload.to_vec())
    }

    #[test]
    fn decodes_client_post() {
        let body = br#"{"id": null, "parent": 0, "title": "T", "content": "C", "user": "U"}"#;
        let request = Request::decode(&frame(RequestKind::Post, body)).expect("decode post");
        assert_eq!(request, Request::Post(NewArticle::new(0, "T", "C", "U")));
    }

    #[test]
    fn read_ignores_its_body() {
        let body =
            br#"{"id": null, "parent": 0, "title": "dummy", "content": "dummy", "user": "x"}"#;
        assert_eq!(
            Request::decode(&frame(RequestKind::Read, body)).expect("decode read"),
            Request::Read
        );
    }

    #[test]
    fn write_payload_distinguishes_single_from_bulk() {
        let single = br#"{"id": 4, "parent": 1, "title": "", "content": "c", "user": "u"}"#;
        match Request::decode(&frame(RequestKind::Write, single)).expect("single") {
            Request::Write(WritePayload::Single(article)) => assert_eq!(article.id, 4),
            other => panic!("expected single write, got {other:?}"),
        }

        let bulk = br#"{"4": {"id": 4, "parent": 1, "title": "", "content": "c", "user": "u"}}"#;
        match Request::decode(&frame(RequestKind::Write, bulk)).expect("bulk") {
            Request::Write(WritePayload::Bulk(map)) => assert!(map.contains_key(&4)),
            other => panic!("expected bulk write, got {other:?}"),
        }

        match Request::decode(&frame(RequestKind::Write, b"{}")).expect("empty bulk") {
            Request::Write(WritePayload::Bulk(map)) => assert!(map.is_empty()),
            other => panic!("expected empty bulk write, got {other:?}"),
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        // CHOOSE (2) was never served by replicas.
        let err = Request::decode(&Frame::new(2, Vec::new())).expect_err("choose");
        assert!(matches!(err, Error::UnknownRequest(2)));
        let err = Request::decode(&Frame::new(99, Vec::new())).expect_err("unknown");
        assert!(matches!(err, Error::UnknownRequest(99)));
    }

    #[test]
    fn backup_update_needs_eight_bytes() {
        let ok = Request::decode(&frame(RequestKind::BackupUpdate, &7u64.to_be_bytes()));
        assert_eq!(ok.expect("decode"), Request::BackupUpdate(7));
        let err = Request::decode(&frame(RequestKind::BackupUpdate, &[1, 2, 3]));
        assert!(matches!(err, Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn nominate_with_empty_payload_means_current_coordinator() {
        let request = Request::decode(&frame(RequestKind::Nominate, &[])).expect("decode");
        assert_eq!(
            request,
            Request::Nominate {
                dead: None,
                nominator: None
            }
        );
    }

    #[test]
    fn election_requests_roundtrip_ids() {
        let nominate = Request::Nominate {
            dead: Some(0),
            nominator: Some(2),
        };
        let decoded = Request::decode(&nominate.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, nominate);

        let new_leader = Request::NewLeader {
            leader: Some(1),
            dead: None,
        };
        let decoded = Request::decode(&new_leader.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, new_leader);
    }

    #[test]
    fn client_facing_kinds() {
        assert!(RequestKind::Post.is_client_facing());
        assert!(RequestKind::Read.is_client_facing());
        assert!(RequestKind::Sync.is_client_facing());
        assert!(!RequestKind::Write.is_client_facing());
        assert!(!RequestKind::Nominate.is_client_facing());
    }
}
