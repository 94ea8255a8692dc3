//! Loop-back session channels
//!
//! There is no shell behind a session: whatever the client writes comes
//! straight back on the same channel.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

/// Answer to a channel request on a session channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    Failure,
}

/// Only `shell` is acknowledged. No PTY, environment or process is set up.
pub fn reply_to(request: &str) -> Reply {
    match request {
        "shell" => Reply::Success,
        _ => Reply::Failure,
    }
}

/// Copy everything read from `stream` back into it until EOF or error.
///
/// Returns the number of bytes echoed.
pub async fn loopback<S>(stream: S) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut rx, mut tx) = tokio::io::split(stream);
    tokio::io::copy(&mut rx, &mut tx).await
}
