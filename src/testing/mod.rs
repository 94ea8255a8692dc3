//! Testing utilities for sshfwd
//!
//! An in-process server on an ephemeral port plus an SSH client to drive it.

mod ssh_client;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use russh::keys::{Algorithm, PrivateKey};
use tokio::task::JoinHandle;

use crate::auth::Verifier;
use crate::ssh::SshServer;

pub use ssh_client::{collect, collect_for, wait_for_close, wait_for_reply, ClientHandler, SshTestClient};

/// Fresh Ed25519 host key that never touches disk
pub fn ephemeral_host_key() -> Result<PrivateKey> {
    PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
        .context("failed to generate key")
}

/// Server running on `127.0.0.1` with an ephemeral port.
///
/// Dropping it aborts the accept loop and with it every connection.
pub struct TestServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(verifier: Arc<dyn Verifier>) -> Result<Self> {
        let addr: SocketAddr = "127.0.0.1:0".parse()?;
        let server = SshServer::bind(addr, ephemeral_host_key()?, verifier).await?;
        let addr = server.local_addr()?;
        let task = tokio::spawn(server.serve());
        Ok(Self { addr, task })
    }

    /// Abort the server and wait until its task is gone
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
