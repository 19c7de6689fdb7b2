//! Error types for the replicated board.

use std::io;

use thiserror::Error;

use crate::topology::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Transport ===
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed before a reply arrived")]
    ConnectionClosed,

    #[error("peer {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("peer {addr} timed out")]
    Timeout { addr: String },

    // === Protocol ===
    #[error("unknown request type {0}")]
    UnknownRequest(u64),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("remote error: {0}")]
    Remote(String),

    // === Replication ===
    #[error("quorum unreachable: {acked} of {needed} sampled replicas acknowledged")]
    QuorumUnreachable { needed: usize, acked: usize },

    #[error("replica {addr} failed during sync: {reason}")]
    SyncFailed { addr: String, reason: String },

    #[error("an election is already in progress on this node")]
    ElectionInProgress,

    #[error("election failed: nominee {nominee} did not accept ({reason})")]
    ElectionFailed { nominee: NodeId, reason: String },

    #[error("no reachable coordinator after {attempts} attempts")]
    NoCoordinator { attempts: usize },

    // === Config ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Can the caller retry the same request later?
    ///
    /// Replicas log it with every failed request and the CLI adds a retry
    /// hint when it holds.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed
                | Error::Unreachable { .. }
                | Error::Timeout { .. }
                | Error::QuorumUnreachable { .. }
                | Error::SyncFailed { .. }
                | Error::ElectionInProgress
                | Error::NoCoordinator { .. }
        )
    }

    /// True when the remote side could not be reached at all. Seen on a
    /// coordinator forward, this is what starts an election.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Unreachable { .. } | Error::Timeout { .. })
    }
}
