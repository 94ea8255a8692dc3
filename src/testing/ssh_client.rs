//! SSH test client for automated testing
//!
//! Connects with a password, opens session or direct-tcpip channels and
//! collects what comes back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::net::ToSocketAddrs;

/// SSH test client holding one authenticated connection
pub struct SshTestClient {
    handle: Handle<ClientHandler>,
}

impl SshTestClient {
    /// Connect and authenticate with a password, failing if it is rejected
    pub async fn connect(
        addr: impl ToSocketAddrs,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        match Self::try_connect(addr, username, password).await? {
            Some(client) => Ok(client),
            None => bail!("authentication rejected"),
        }
    }

    /// Connect and authenticate, returning `None` when the password is rejected
    pub async fn try_connect(
        addr: impl ToSocketAddrs,
        username: &str,
        password: &str,
    ) -> Result<Option<Self>> {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, addr, ClientHandler)
            .await
            .context("failed to connect")?;

        let auth_result = handle
            .authenticate_password(username, password)
            .await
            .context("password authentication failed")?;

        if !auth_result.success() {
            return Ok(None);
        }
        Ok(Some(Self { handle }))
    }

    /// Open a session channel
    pub async fn open_session(&self) -> Result<Channel<Msg>> {
        self.handle
            .channel_open_session()
            .await
            .context("failed to open session channel")
    }

    /// Ask the server to dial `host:port` and open a channel to it
    pub async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<Channel<Msg>> {
        self.handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .with_context(|| format!("failed to open direct-tcpip to {}:{}", host, port))
    }

    /// Open an x11 channel, a kind the server never serves
    pub async fn open_x11(&self) -> Result<Channel<Msg>> {
        self.handle
            .channel_open_x11("127.0.0.1", 6010)
            .await
            .context("failed to open x11 channel")
    }

    /// Close the connection
    pub async fn close(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "goodbye", "en")
            .await
            .context("failed to disconnect")?;
        Ok(())
    }
}

/// Read channel data until at least `len` bytes arrived, or timeout
pub async fn collect(channel: &mut Channel<Msg>, len: usize, timeout: Duration) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    while output.len() < len {
        match tokio::time::timeout_at(deadline, channel.wait()).await {
            Ok(Some(ChannelMsg::Data { data })) => output.extend_from_slice(&data),
            Ok(Some(ChannelMsg::Eof | ChannelMsg::Close)) | Ok(None) => break,
            Ok(Some(_)) => {}
            Err(_) => bail!("timeout after {} of {} bytes", output.len(), len),
        }
    }

    Ok(output)
}

/// Collect whatever data arrives within `duration`, stopping early on EOF
pub async fn collect_for(channel: &mut Channel<Msg>, duration: Duration) -> Vec<u8> {
    let mut output = Vec::new();
    let deadline = tokio::time::Instant::now() + duration;

    while let Ok(msg) = tokio::time::timeout_at(deadline, channel.wait()).await {
        match msg {
            Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
            Some(ChannelMsg::Eof | ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    output
}

/// Wait for the success/failure reply to a channel request
pub async fn wait_for_reply(channel: &mut Channel<Msg>, timeout: Duration) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match tokio::time::timeout_at(deadline, channel.wait()).await {
            Ok(Some(ChannelMsg::Success)) => return Ok(true),
            Ok(Some(ChannelMsg::Failure)) => return Ok(false),
            Ok(Some(_)) => {}
            Ok(None) => bail!("channel closed before reply"),
            Err(_) => bail!("timeout waiting for reply"),
        }
    }
}

/// Wait until the server closes the channel or the connection goes away
pub async fn wait_for_close(channel: &mut Channel<Msg>, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match tokio::time::timeout_at(deadline, channel.wait()).await {
            Ok(Some(ChannelMsg::Close)) | Ok(None) => return Ok(()),
            Ok(Some(_)) => {}
            Err(_) => bail!("timeout waiting for channel close"),
        }
    }
}

/// Client handler; the channels carry all data
pub struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true) // Accept all keys for local testing
    }
}
