//! SSH test client CLI
//!
//! Simple tool for poking a running sshfwd server.
//!
//! Usage:
//!   cargo run --bin sshtest -- echo "hello"
//!   cargo run --bin sshtest -- forward 127.0.0.1:8080 "GET / HTTP/1.0\r\n\r\n"

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sshfwd::testing::{collect_for, wait_for_reply, SshTestClient};

#[derive(Parser, Debug)]
#[command(name = "sshtest", about = "SSH test client for sshfwd")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "localhost:2222")]
    addr: String,

    /// Username
    #[arg(short, long, default_value = "test")]
    user: String,

    /// Password
    #[arg(short, long, default_value = "password")]
    password: String,

    /// How long to wait for output, in milliseconds
    #[arg(short, long, default_value_t = 500)]
    wait: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a session, request a shell, send TEXT and print what comes back
    Echo { text: String },
    /// Open a direct-tcpip channel to TARGET (host:port), send TEXT, print the reply
    Forward { target: String, text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let wait = Duration::from_millis(args.wait);

    eprintln!("connecting to {} as {}...", args.addr, args.user);
    let client = SshTestClient::connect(args.addr.as_str(), &args.user, &args.password).await?;

    let (mut channel, text) = match args.command {
        Command::Echo { text } => {
            let mut channel = client.open_session().await?;
            channel.request_shell(true).await?;
            let accepted = wait_for_reply(&mut channel, wait).await?;
            eprintln!("shell request {}", if accepted { "accepted" } else { "denied" });
            (channel, text)
        }
        Command::Forward { target, text } => {
            let (host, port) = target
                .rsplit_once(':')
                .context("target must be host:port")?;
            let port: u16 = port.parse().context("invalid port")?;
            let channel = client.open_direct_tcpip(host, port).await?;
            eprintln!("forward to {} open", target);
            (channel, text)
        }
    };

    channel.data(text.as_bytes()).await?;
    let output = collect_for(&mut channel, wait).await;

    eprintln!("--- output ({} bytes) ---", output.len());
    print!("{}", String::from_utf8_lossy(&output));
    eprintln!("---");

    client.close().await?;
    eprintln!("disconnected");
    Ok(())
}
