//! Password verification

use std::fmt;

/// Decides whether a presented username/password pair may log in.
///
/// Called by the connection handler for each password attempt. Attempt
/// limits and rejection delays belong to russh, not to implementors.
pub trait Verifier: Send + Sync {
    fn verify(&self, user: &str, password: &str) -> bool;
}

/// The single accepted username/password pair
#[derive(Clone)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Verifier for Credential {
    fn verify(&self, user: &str, password: &str) -> bool {
        user.as_bytes() == self.username.as_bytes()
            && password.as_bytes() == self.password.as_bytes()
    }
}

// Keep the password out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
