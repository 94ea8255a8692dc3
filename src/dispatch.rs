//! Channel-open routing
//!
//! Every channel-open the client sends is routed here by its declared type
//! before anything is allocated for it. Only two kinds are served: loop-back
//! sessions and direct TCP forwards.

use std::fmt;

use thiserror::Error;

/// Channel kinds this server accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Interactive session, data is looped back
    Session,
    /// `direct-tcpip` port forward
    DirectTcpip,
}

impl ChannelKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Session => "session",
            ChannelKind::DirectTcpip => "direct-tcpip",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a channel open was refused (RFC 4254 §5.1)
///
/// The russh server refuses every open with its own
/// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED`; the code here goes to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Prohibited,
    ConnectFailed,
    UnknownChannelType,
}

impl RejectReason {
    /// Numeric `SSH_OPEN_*` code
    pub fn code(&self) -> u32 {
        match self {
            RejectReason::Prohibited => 1,
            RejectReason::ConnectFailed => 2,
            RejectReason::UnknownChannelType => 3,
        }
    }
}

/// A refused channel open: reason code plus human readable description
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description}")]
pub struct Rejection {
    pub reason: RejectReason,
    pub description: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, description: impl Into<String>) -> Self {
        Self {
            reason,
            description: description.into(),
        }
    }

    pub fn unsupported(kind: &str) -> Self {
        Self::new(
            RejectReason::UnknownChannelType,
            format!("unsupported channel type: {}", kind),
        )
    }
}

/// Route a channel-open by its declared type.
///
/// Pure decision, no I/O: unknown kinds come back as a rejection that cites
/// the offending type string.
pub fn route(kind: &str) -> Result<ChannelKind, Rejection> {
    match kind {
        "session" => Ok(ChannelKind::Session),
        "direct-tcpip" | "direct-forward" => Ok(ChannelKind::DirectTcpip),
        other => Err(Rejection::unsupported(other)),
    }
}
