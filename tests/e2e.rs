//! End-to-end integration tests for sshfwd
//!
//! Each test runs a real server on an ephemeral port and drives it with the
//! russh test client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use russh::{ChannelMsg, Sig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use sshfwd::auth::{Credential, Verifier};
use sshfwd::testing::{collect, wait_for_close, wait_for_reply, SshTestClient, TestServer};

const USER: &str = "test";
const PASSWORD: &str = "password";
const TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

async fn start_server() -> Result<TestServer> {
    let verifier: Arc<dyn Verifier> = Arc::new(Credential::new(USER, PASSWORD));
    TestServer::start(verifier).await
}

async fn login(server: &TestServer) -> Result<SshTestClient> {
    SshTestClient::connect(server.addr, USER, PASSWORD).await
}

/// A listener whose accept queue is full and never drained, so any further
/// connect to it hangs until the listener goes away.
///
/// Returns `None` if the kernel keeps completing handshakes anyway.
async fn saturated_listener() -> Result<Option<(TcpListener, Vec<TcpStream>)>> {
    let socket = TcpSocket::new_v4()?;
    socket.bind("127.0.0.1:0".parse()?)?;
    let listener = socket.listen(1)?;
    let addr = listener.local_addr()?;

    let mut queued = Vec::new();
    for _ in 0..16 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(stream) => queued.push(stream?),
            Err(_) => return Ok(Some((listener, queued))),
        }
    }
    Ok(None)
}

/// A port on 127.0.0.1 with nothing listening on it
async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_configured_pair_is_accepted_every_time() -> Result<()> {
    let server = start_server().await?;

    for _ in 0..3 {
        let client = SshTestClient::try_connect(server.addr, USER, PASSWORD).await?;
        let client = client.expect("configured pair should authenticate");
        client.close().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_other_pairs_are_rejected() -> Result<()> {
    let server = start_server().await?;

    for (user, password) in [("test", "wrong"), ("root", "password"), ("", "")] {
        let client = SshTestClient::try_connect(server.addr, user, password).await?;
        assert!(client.is_none(), "{user:?}/{password:?} should be rejected");
    }

    // a rejected attempt does not lock anything out
    login(&server).await?.close().await?;
    Ok(())
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_session_acknowledges_shell_only() -> Result<()> {
    let server = start_server().await?;
    let client = login(&server).await?;
    let mut channel = client.open_session().await?;

    channel
        .request_pty(true, "xterm-256color", 80, 24, 0, 0, &[])
        .await?;
    assert!(!wait_for_reply(&mut channel, TIMEOUT).await?, "pty-req should fail");

    channel.exec(true, "uname -a").await?;
    assert!(!wait_for_reply(&mut channel, TIMEOUT).await?, "exec should fail");

    channel.request_shell(true).await?;
    assert!(wait_for_reply(&mut channel, TIMEOUT).await?, "shell should succeed");

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_other_request_gets_failure() -> Result<()> {
    let server = start_server().await?;
    let client = login(&server).await?;
    let mut channel = client.open_session().await?;

    channel.set_env(true, "LANG", "C").await?;
    assert!(!wait_for_reply(&mut channel, TIMEOUT).await?, "env should fail");

    channel
        .request_x11(true, false, "MIT-MAGIC-COOKIE-1", "00112233", 0)
        .await?;
    assert!(!wait_for_reply(&mut channel, TIMEOUT).await?, "x11-req should fail");

    channel.agent_forward(true).await?;
    assert!(!wait_for_reply(&mut channel, TIMEOUT).await?, "agent forwarding should fail");

    // no reply expected for these; the channel keeps working
    channel.window_change(120, 40, 0, 0).await?;
    channel.signal(Sig::INT).await?;
    channel.data(&b"still echoing"[..]).await?;
    assert_eq!(collect(&mut channel, 13, TIMEOUT).await?, b"still echoing");

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_echoes_input() -> Result<()> {
    let server = start_server().await?;
    let client = login(&server).await?;
    let mut channel = client.open_session().await?;

    channel.request_shell(true).await?;
    assert!(wait_for_reply(&mut channel, TIMEOUT).await?);

    let input = b"ls -la\r\n\x00\xffbinary too";
    channel.data(&input[..]).await?;
    let echoed = collect(&mut channel, input.len(), TIMEOUT).await?;
    assert_eq!(echoed, input);

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_closed_by_client_is_released() -> Result<()> {
    let server = start_server().await?;
    let client = login(&server).await?;

    let channel = client.open_session().await?;
    channel.close().await?;

    // the connection survives and keeps serving new channels
    let mut channel = client.open_session().await?;
    channel.data(&b"still here"[..]).await?;
    assert_eq!(collect(&mut channel, 10, TIMEOUT).await?, b"still here");

    client.close().await?;
    Ok(())
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_forward_relays_both_ways() -> Result<()> {
    let server = start_server().await?;
    let target = TcpListener::bind("127.0.0.1:0").await?;
    let port = target.local_addr()?.port();

    let client = login(&server).await?;
    let mut channel = client.open_direct_tcpip("127.0.0.1", port).await?;
    let (mut socket, _) = tokio::time::timeout(TIMEOUT, target.accept()).await??;

    let request: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    channel.data(&request[..]).await?;
    let mut received = vec![0u8; request.len()];
    tokio::time::timeout(TIMEOUT, socket.read_exact(&mut received)).await??;
    assert_eq!(received, request);

    socket.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await?;
    let response = collect(&mut channel, 19, TIMEOUT).await?;
    assert_eq!(response, b"HTTP/1.0 200 OK\r\n\r\n");

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forward_to_closed_port_is_rejected() -> Result<()> {
    let server = start_server().await?;
    let port = closed_port().await?;

    let client = login(&server).await?;
    let result = client.open_direct_tcpip("127.0.0.1", port).await;
    assert!(result.is_err(), "forward to a closed port should be refused");

    // only the channel failed; the connection carries on
    let mut channel = client.open_session().await?;
    channel.data(&b"ok"[..]).await?;
    assert_eq!(collect(&mut channel, 2, TIMEOUT).await?, b"ok");

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_requests_on_forward_channel_fail() -> Result<()> {
    let server = start_server().await?;
    let target = TcpListener::bind("127.0.0.1:0").await?;
    let port = target.local_addr()?.port();

    let client = login(&server).await?;
    let mut channel = client.open_direct_tcpip("127.0.0.1", port).await?;

    channel.request_shell(true).await?;
    assert!(!wait_for_reply(&mut channel, TIMEOUT).await?, "shell on a forward should fail");
    channel.set_env(true, "LANG", "C").await?;
    assert!(!wait_for_reply(&mut channel, TIMEOUT).await?, "env on a forward should fail");

    client.close().await?;
    Ok(())
}

// The dial runs inside russh's channel-open callback, and russh reads the
// connection's packets on that same task. Until the dial resolves, every
// other channel on the connection waits too.
#[tokio::test(flavor = "multi_thread")]
async fn test_pending_dial_holds_up_its_connection() -> Result<()> {
    let Some((listener, queued)) = saturated_listener().await? else {
        eprintln!("kernel completed every handshake; cannot hold a dial open");
        return Ok(());
    };
    let port = listener.local_addr()?.port();

    let server = start_server().await?;
    let client = login(&server).await?;
    let mut session = client.open_session().await?;
    session.data(&b"before"[..]).await?;
    assert_eq!(collect(&mut session, 6, TIMEOUT).await?, b"before");

    let session_ref = &mut session;
    let (opened, held_up) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(15), client.open_direct_tcpip("127.0.0.1", port)),
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            session_ref.data(&b"during"[..]).await?;
            let during = collect(session_ref, 6, Duration::from_millis(400)).await;

            // refuse the retried SYN so the dial fails
            drop(queued);
            drop(listener);
            anyhow::Ok(during.is_err())
        },
    );

    assert!(held_up?, "sibling session should wait for the dial");
    assert!(opened?.is_err(), "dial to a vanished listener should be refused");

    // the dial resolved; the queued echo comes through
    assert_eq!(collect(&mut session, 6, TIMEOUT).await?, b"during");

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_target_close_releases_channel() -> Result<()> {
    let server = start_server().await?;
    let target = TcpListener::bind("127.0.0.1:0").await?;
    let port = target.local_addr()?.port();

    let client = login(&server).await?;
    let mut channel = client.open_direct_tcpip("127.0.0.1", port).await?;
    let (socket, _) = tokio::time::timeout(TIMEOUT, target.accept()).await??;

    drop(socket);
    wait_for_close(&mut channel, TIMEOUT).await?;

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_close_releases_socket() -> Result<()> {
    let server = start_server().await?;
    let target = TcpListener::bind("127.0.0.1:0").await?;
    let port = target.local_addr()?.port();

    let client = login(&server).await?;
    let channel = client.open_direct_tcpip("127.0.0.1", port).await?;
    let (mut socket, _) = tokio::time::timeout(TIMEOUT, target.accept()).await??;

    channel.close().await?;
    let mut rest = Vec::new();
    let n = tokio::time::timeout(TIMEOUT, socket.read_to_end(&mut rest)).await??;
    assert_eq!(n, 0);

    client.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stalled_forward_stays_open() -> Result<()> {
    let server = start_server().await?;
    let target = TcpListener::bind("127.0.0.1:0").await?;
    let port = target.local_addr()?.port();

    let client = login(&server).await?;
    let mut channel = client.open_direct_tcpip("127.0.0.1", port).await?;
    let (mut socket, _) = tokio::time::timeout(TIMEOUT, target.accept()).await??;

    // nobody talks for a while; nothing times out
    let idle = tokio::time::timeout(Duration::from_millis(500), channel.wait()).await;
    assert!(idle.is_err(), "idle relay should not produce messages: {:?}", idle);

    socket.write_all(b"late").await?;
    assert_eq!(collect(&mut channel, 4, TIMEOUT).await?, b"late");

    client.close().await?;
    Ok(())
}

// ============================================================================
// Unsupported channel kinds
// ============================================================================

// russh sends its own generic refusal for every rejected open; the
// "unsupported channel type: <kind>" description only reaches the server log
// and is checked in the dispatch unit tests.
#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_channel_kind_is_refused() -> Result<()> {
    let server = start_server().await?;
    let client = login(&server).await?;

    assert!(client.open_x11().await.is_err(), "x11 channel should be refused");

    // nothing was allocated and the connection carries on
    let mut channel = client.open_session().await?;
    channel.data(&b"ok"[..]).await?;
    assert_eq!(collect(&mut channel, 2, TIMEOUT).await?, b"ok");

    client.close().await?;
    Ok(())
}

// ============================================================================
// Isolation and teardown
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_connections_do_not_interfere() -> Result<()> {
    let server = start_server().await?;
    let alice = login(&server).await?;
    let bob = login(&server).await?;

    let mut alice_chan = alice.open_session().await?;
    let mut bob_chan = bob.open_session().await?;

    let (a, b) = tokio::join!(
        alice_chan.data(&b"from alice"[..]),
        bob_chan.data(&b"bob says hi"[..]),
    );
    a?;
    b?;

    assert_eq!(collect(&mut alice_chan, 10, TIMEOUT).await?, b"from alice");
    assert_eq!(collect(&mut bob_chan, 11, TIMEOUT).await?, b"bob says hi");

    // nothing else shows up on either channel
    let stray = tokio::time::timeout(Duration::from_millis(200), alice_chan.wait()).await;
    assert!(
        !matches!(stray, Ok(Some(ChannelMsg::Data { .. }))),
        "unexpected data on alice's channel"
    );

    alice.close().await?;
    bob.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_shutdown_drops_connections() -> Result<()> {
    let server = start_server().await?;
    let target = TcpListener::bind("127.0.0.1:0").await?;
    let port = target.local_addr()?.port();

    let client = login(&server).await?;
    let mut session = client.open_session().await?;
    let _forward = client.open_direct_tcpip("127.0.0.1", port).await?;
    let (mut socket, _) = tokio::time::timeout(TIMEOUT, target.accept()).await??;

    server.shutdown().await;

    // connection, session and forward are all gone
    wait_for_close(&mut session, TIMEOUT).await?;
    let mut rest = Vec::new();
    let n = tokio::time::timeout(TIMEOUT, socket.read_to_end(&mut rest)).await??;
    assert_eq!(n, 0);
    Ok(())
}
