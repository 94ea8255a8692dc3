//! SSH connection handler

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use russh::server::{self, Msg, Session};
use russh::{Channel, ChannelId, Pty, Sig};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::auth::Verifier;
use crate::dispatch::{self, ChannelKind, Rejection};
use crate::forward::{self, ForwardRequest};
use crate::session::{self, Reply};

/// Per-connection SSH handler
///
/// Owns the tasks serving this connection's channels. russh drops the
/// handler when the transport closes, which aborts whatever is still running.
pub struct ConnectionHandler {
    verifier: Arc<dyn Verifier>,
    peer: SocketAddr,
    user: Option<String>,
    channels: HashMap<ChannelId, ChannelKind>,
    tasks: JoinSet<()>,
}

impl ConnectionHandler {
    pub fn new(verifier: Arc<dyn Verifier>, peer: SocketAddr) -> Self {
        Self {
            verifier,
            peer,
            user: None,
            channels: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Number of channels currently open on this connection
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // reap finished channel tasks so the set does not grow forever
        while self.tasks.try_join_next().is_some() {}
        self.tasks.spawn(task);
    }

    /// Route a channel-open by type, logging refusals
    fn admit(&self, kind: &str) -> Option<ChannelKind> {
        match dispatch::route(kind) {
            Ok(kind) => Some(kind),
            Err(rejection) => {
                self.refused(&rejection);
                None
            }
        }
    }

    fn refused(&self, rejection: &Rejection) {
        warn!(
            peer = %self.peer,
            code = rejection.reason.code(),
            reason = %rejection,
            "channel open rejected"
        );
    }

    /// Reply to a channel request. Only session channels ever get a success.
    ///
    /// russh drops the reply when the client did not ask for one, so every
    /// request type goes through here.
    fn answer(&self, channel: ChannelId, request: &str, session: &mut Session) -> Result<()> {
        let reply = match self.channels.get(&channel) {
            Some(ChannelKind::Session) => session::reply_to(request),
            _ => Reply::Failure,
        };
        debug!(peer = %self.peer, channel_id = ?channel, request, ?reply, "channel request");
        match reply {
            Reply::Success => session.channel_success(channel)?,
            Reply::Failure => session.channel_failure(channel)?,
        }
        Ok(())
    }
}

impl server::Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<server::Auth, Self::Error> {
        if self.verifier.verify(user, password) {
            info!(peer = %self.peer, user, "authenticated");
            self.user = Some(user.to_string());
            Ok(server::Auth::Accept)
        } else {
            warn!(peer = %self.peer, user, "password rejected");
            Ok(server::Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(kind) = self.admit("session") else {
            return Ok(false);
        };

        let id = channel.id();
        let handle = session.handle();
        let peer = self.peer;
        info!(%peer, user = ?self.user, channel_id = ?id, "session channel opened");
        self.channels.insert(id, kind);

        self.spawn(async move {
            match session::loopback(channel.into_stream()).await {
                Ok(bytes) => debug!(%peer, channel_id = ?id, bytes, "session finished"),
                Err(e) => debug!(%peer, channel_id = ?id, error = %e, "session failed"),
            }
            let _ = handle.close(id).await;
        });
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(kind) = self.admit("direct-tcpip") else {
            return Ok(false);
        };

        // russh already decoded the extra data into these fields
        let request = ForwardRequest::new(
            host_to_connect,
            port_to_connect,
            originator_address,
            originator_port,
        );

        let remote = match forward::connect(&request).await {
            Ok(remote) => remote,
            Err(rejection) => {
                self.refused(&rejection);
                return Ok(false);
            }
        };

        let id = channel.id();
        let handle = session.handle();
        let peer = self.peer;
        info!(%peer, user = ?self.user, channel_id = ?id, forward = %request, "forwarding");
        self.channels.insert(id, kind);

        self.spawn(async move {
            let end = forward::relay(channel.into_stream(), remote).await;
            match end.result {
                Ok(bytes) => debug!(
                    %peer,
                    channel_id = ?id,
                    closed_by = ?end.closed_by,
                    bytes,
                    "forward finished"
                ),
                Err(e) => debug!(
                    %peer,
                    channel_id = ?id,
                    closed_by = ?end.closed_by,
                    error = %e,
                    "forward failed"
                ),
            }
            let _ = handle.close(id).await;
        });
        Ok(true)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.admit("x11").is_some())
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.admit("forwarded-tcpip").is_some())
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        _channel: Channel<Msg>,
        _socket_path: &str,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.admit("direct-streamlocal@openssh.com").is_some())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(kind) = self.channels.remove(&channel) {
            debug!(peer = %self.peer, channel_id = ?channel, %kind, "channel closed");
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, "shell", session)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, "exec", session)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, "pty-req", session)
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer = %self.peer, subsystem = name, "subsystem requested");
        self.answer(channel, "subsystem", session)
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, "env", session)
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, "x11-req", session)
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, "window-change", session)
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        _signal: Sig,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, "signal", session)
    }

    // russh follows this with its own global-level reply; the channel-level
    // failure is the one clients wait for
    async fn agent_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.answer(channel, "auth-agent-req@openssh.com", session)?;
        Ok(false)
    }
}
