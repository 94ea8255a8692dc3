//! Host key loading

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use russh::keys::PrivateKey;
use tracing::info;

/// Load the host key at `path`, creating it with `ssh-keygen` first if the
/// file does not exist (RSA, 4096 bits, no passphrase).
pub fn load_or_generate(path: impl AsRef<Path>) -> Result<PrivateKey> {
    let path = path.as_ref();

    if !path.exists() {
        generate(path)?;
    }

    info!("loading host key from {}", path.display());
    russh::keys::load_secret_key(path, None)
        .with_context(|| format!("failed to load host key from {}", path.display()))
}

fn generate(path: &Path) -> Result<()> {
    info!("generating RSA host key at {}", path.display());
    let status = Command::new("ssh-keygen")
        .args(["-t", "rsa", "-b", "4096", "-N", "", "-q", "-f"])
        .arg(path)
        .status()
        .context("failed to run ssh-keygen")?;

    if !status.success() {
        bail!("ssh-keygen exited with {}", status);
    }
    Ok(())
}
