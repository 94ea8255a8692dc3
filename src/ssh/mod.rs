//! SSH server module
//!
//! Accepts TCP connections, runs the russh handshake on each, and hands
//! authenticated connections to a [`ConnectionHandler`].

mod handler;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use russh::keys::PrivateKey;
use russh::{server, Disconnect};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::auth::Verifier;

pub use handler::ConnectionHandler;

/// SSH server: the listening socket plus what every handshake needs
pub struct SshServer {
    listener: TcpListener,
    config: Arc<server::Config>,
    verifier: Arc<dyn Verifier>,
}

impl SshServer {
    /// Bind the listening socket.
    ///
    /// Failing to bind is fatal for the caller; nothing here retries.
    pub async fn bind(
        addr: SocketAddr,
        host_key: PrivateKey,
        verifier: Arc<dyn Verifier>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {}", addr))?;

        // no deadlines: idle sessions and relays stay open until a peer closes
        let config = server::Config {
            keys: vec![host_key],
            inactivity_timeout: None,
            ..Default::default()
        };

        Ok(Self {
            listener,
            config: Arc::new(config),
            verifier,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    ///
    /// Each connection runs as its own task in a set owned by this future;
    /// dropping the future aborts all of them, which disconnects their
    /// clients.
    pub async fn serve(self) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = ConnectionHandler::new(self.verifier.clone(), peer);
                        connections.spawn(run_connection(self.config.clone(), stream, peer, handler));
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "connection task panicked");
                        }
                    }
                }
            }
        }
    }
}

async fn run_connection(
    config: Arc<server::Config>,
    stream: TcpStream,
    peer: SocketAddr,
    handler: ConnectionHandler,
) {
    info!(%peer, "new connection");
    stream.set_nodelay(true).ok();

    let session = match server::run_stream(config, stream, handler).await {
        Ok(session) => session,
        Err(e) => {
            warn!(%peer, error = ?e, "ssh handshake failed");
            return;
        }
    };

    // russh drives the session on its own task; tie it to this one
    let mut guard = DisconnectOnDrop(Some(session.handle()));

    match session.await {
        Ok(()) => info!(%peer, "connection closed"),
        Err(e) => warn!(%peer, error = ?e, "connection ended with error"),
    }
    guard.0 = None;
}

/// Disconnects the client if the connection task is dropped before the
/// session finished on its own.
struct DisconnectOnDrop(Option<server::Handle>);

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        let Some(handle) = self.0.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = handle
                    .disconnect(
                        Disconnect::ByApplication,
                        "server shutting down".into(),
                        "en".into(),
                    )
                    .await;
            });
        }
    }
}
