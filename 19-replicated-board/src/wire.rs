//! Binary framing shared by replicas and clients.
//!
//! Requests travel as `type(8B BE) || len(8B BE) || payload`. Replies are a
//! bare `len(8B BE) || body`. One request and one reply per connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

const HEADER_LEN: usize = 16;

/// Default cap on a single payload. Larger announced lengths are rejected
/// before any allocation.
pub const DEFAULT_MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Reply bodies with this prefix carry an error message instead of data.
pub const ERROR_PREFIX: &[u8] = b"ERROR: ";

/// One typed request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Encodes header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.kind.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u64).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Reads one request frame.
///
/// Returns `Ok(None)` if the peer closed the connection before sending a
/// single byte. A connection that closes part way through the header or
/// payload is an `UnexpectedEof` I/O error.
pub async fn read_frame<R>(reader: &mut R, max_len: u64) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed after {filled} header bytes"),
            )
            .into());
        }
        filled += n;
    }

    let kind = be_u64(&header[..8]);
    let len = be_u64(&header[8..]);
    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }

    let payload = read_exact_vec(reader, len).await?;
    Ok(Some(Frame { kind, payload }))
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a length-prefixed reply body.
pub async fn read_reply<R>(reader: &mut R, max_len: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 8];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ConnectionClosed)
        }
        Err(err) => return Err(err.into()),
    }
    let len = u64::from_be_bytes(prefix);
    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }
    read_exact_vec(reader, len).await
}

pub async fn write_reply<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Single buffer so the prefix and body leave in one write.
    let mut encoded = Vec::with_capacity(8 + body.len());
    encoded.extend_from_slice(&(body.len() as u64).to_be_bytes());
    encoded.extend_from_slice(body);
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Builds the body of an error reply.
pub fn error_body(message: &str) -> Vec<u8> {
    let mut body = ERROR_PREFIX.to_vec();
    body.extend_from_slice(message.as_bytes());
    body
}

/// Splits an error reply into its message. `None` for ordinary bodies.
pub fn error_message(body: &[u8]) -> Option<String> {
    body.strip_prefix(ERROR_PREFIX)
        .map(|msg| String::from_utf8_lossy(msg).into_owned())
}

/// Decodes exactly eight big-endian bytes.
pub(crate) fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

async fn read_exact_vec<R>(reader: &mut R, len: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = usize::try_from(len).map_err(|_| Error::FrameTooLarge {
        len,
        max: usize::MAX as u64,
    })?;
    let mut payload = vec![0u8; len];
    // read_exact loops over short reads until the whole payload is in.
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
