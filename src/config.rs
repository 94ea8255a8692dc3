//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};

use crate::auth::Credential;

/// Default SSH listen port
pub const DEFAULT_PORT: u16 = 2222;

/// Server configuration
///
/// Built once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct Config {
    /// SSH listen address
    pub listen_addr: SocketAddr,
    /// Path to server host key (generated with ssh-keygen if missing)
    pub host_key_path: String,
    /// The only username accepted
    pub username: String,
    /// Password for `username`
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            host_key_path: "id_rsa".to_string(),
            username: "test".to_string(),
            password: "password".to_string(),
        }
    }
}

impl Config {
    /// Default configuration listening on `port` instead of 2222
    pub fn with_port(port: u16) -> Self {
        let mut config = Self::default();
        config.listen_addr.set_port(port);
        config
    }

    /// The credential pair connections are checked against
    pub fn credential(&self) -> Credential {
        Credential::new(&self.username, &self.password)
    }
}
