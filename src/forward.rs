//! direct-tcpip forwarding
//!
//! A forward goes through three steps: decode the request, dial the target,
//! then relay bytes until either peer stops. The channel is only accepted
//! after the dial succeeded, so unreachable targets never get a channel.

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::dispatch::{RejectReason, Rejection};

/// Errors decoding a direct-tcpip payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload truncated")]
    Truncated,
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Destination and originator of a direct-tcpip channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub dest_host: String,
    pub dest_port: u32,
    pub origin_host: String,
    pub origin_port: u32,
}

impl ForwardRequest {
    pub fn new(
        dest_host: impl Into<String>,
        dest_port: u32,
        origin_host: impl Into<String>,
        origin_port: u32,
    ) -> Self {
        Self {
            dest_host: dest_host.into(),
            dest_port,
            origin_host: origin_host.into(),
            origin_port,
        }
    }

    /// Decode the channel-open extra data.
    ///
    /// Layout: string host, uint32 port, string originator host, uint32
    /// originator port. Anything short, non-utf-8 or with leftover bytes is
    /// refused as a whole.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader { buf: data };
        let request = Self {
            dest_host: reader.string()?,
            dest_port: reader.u32()?,
            origin_host: reader.string()?,
            origin_port: reader.u32()?,
        };
        if !reader.buf.is_empty() {
            return Err(DecodeError::TrailingBytes(reader.buf.len()));
        }
        Ok(request)
    }

    /// Encode into the channel-open extra data layout
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(16 + self.dest_host.len() + self.origin_host.len());
        put_string(&mut out, &self.dest_host);
        out.extend_from_slice(&self.dest_port.to_be_bytes());
        put_string(&mut out, &self.origin_host);
        out.extend_from_slice(&self.origin_port.to_be_bytes());
        out
    }

    /// `host:port` of the destination, as shown in logs and rejections
    pub fn target(&self) -> String {
        format!("{}:{}", self.dest_host, self.dest_port)
    }
}

impl fmt::Display for ForwardRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.origin_host, self.origin_port, self.dest_host, self.dest_port
        )
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Decode a raw payload, mapping failure to a `Prohibited` rejection.
///
/// The russh server decodes direct-tcpip payloads itself before the handler
/// runs, and a payload it cannot decode ends the whole connection. This is
/// for callers holding the raw extra data.
pub fn parse(data: &[u8]) -> Result<ForwardRequest, Rejection> {
    ForwardRequest::decode(data).map_err(|e| {
        debug!(error = %e, "bad direct-tcpip payload");
        Rejection::new(RejectReason::Prohibited, "failed to parse direct-tcpip")
    })
}

/// Dial the destination named by `request`.
///
/// Only the destination fields are used; the originator is informational.
pub async fn connect(request: &ForwardRequest) -> Result<TcpStream, Rejection> {
    let failed = |cause: &dyn fmt::Display| {
        Rejection::new(
            RejectReason::ConnectFailed,
            format!("connection to {} failed: {}", request.target(), cause),
        )
    };

    let port = u16::try_from(request.dest_port).map_err(|_| failed(&"port out of range"))?;
    let stream = TcpStream::connect((request.dest_host.as_str(), port))
        .await
        .map_err(|e| failed(&e))?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Which peer stopped first and ended a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// SSH client side: the channel hit EOF or failed
    Client,
    /// Forward destination: the socket hit EOF or failed
    Target,
}

/// How a relay ended
#[derive(Debug)]
pub struct RelayEnd {
    /// `None` when a copy task died instead of finishing
    pub closed_by: Option<Side>,
    /// Bytes moved by the direction that ended, or its I/O error
    pub result: io::Result<u64>,
}

/// Splice `channel` and `remote` until either direction stops.
///
/// Both copy loops run as separate tasks. The first one to finish, by EOF
/// or error, ends the relay: the other loop is aborted and every half is
/// dropped, which closes the socket. Closing the SSH channel itself is up to
/// the caller.
pub async fn relay<S>(channel: S, remote: TcpStream) -> RelayEnd
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut chan_rx, mut chan_tx) = tokio::io::split(channel);
    let (mut sock_rx, mut sock_tx) = remote.into_split();

    let mut directions = JoinSet::new();
    directions.spawn(async move {
        let result = tokio::io::copy(&mut chan_rx, &mut sock_tx).await;
        let _ = sock_tx.shutdown().await;
        (Side::Client, result)
    });
    directions.spawn(async move {
        let result = tokio::io::copy(&mut sock_rx, &mut chan_tx).await;
        let _ = chan_tx.shutdown().await;
        (Side::Target, result)
    });

    let end = match directions.join_next().await {
        Some(joined) => finish(joined),
        None => unreachable!("relay spawned two directions"),
    };
    directions.shutdown().await;
    end
}

fn finish(joined: Result<(Side, io::Result<u64>), JoinError>) -> RelayEnd {
    match joined {
        Ok((side, result)) => RelayEnd {
            closed_by: Some(side),
            result,
        },
        Err(e) => {
            warn!(error = %e, "relay copy task failed");
            RelayEnd {
                closed_by: None,
                result: Err(io::Error::other(e)),
            }
        }
    }
}
