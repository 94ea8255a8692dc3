//! sshfwd - minimal SSH server with loop-back sessions and TCP forwarding
//!
//! One username/password pair is accepted. `session` channels echo what the
//! client sends; `direct-tcpip` channels dial the requested destination and
//! relay bytes both ways. The binary is in `main.rs`, a test client CLI in
//! `bin/sshtest.rs`.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod forward;
pub mod host_key;
pub mod session;
pub mod ssh;
pub mod testing;
