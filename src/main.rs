//! sshfwd - minimal SSH server
//!
//! Accepts one fixed username/password, echoes session input back, and
//! forwards direct-tcpip channels to whatever host:port the client asks for.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use sshfwd::config::{Config, DEFAULT_PORT};
use sshfwd::host_key;
use sshfwd::ssh::SshServer;

#[derive(Parser, Debug)]
#[command(name = "sshfwd", version, about = "Minimal SSH server with TCP forwarding")]
struct Cli {
    /// Port the SSH server listens on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sshfwd=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::with_port(cli.port);

    let key = host_key::load_or_generate(&config.host_key_path)?;
    let verifier = Arc::new(config.credential());

    let server = SshServer::bind(config.listen_addr, key, verifier).await?;
    info!(addr = %server.local_addr()?, user = %config.username, "ssh server listening");

    server.serve().await;
    Ok(())
}
