//! SSH authentication configuration
//!
//! The forwarding engine treats this as opaque: whatever is configured
//! here is presented to every tunnel server. Host key verification
//! policy is deliberately not part of it; deployments are expected to
//! front the tunnel servers with their own transport security.

use std::path::PathBuf;

/// How to authenticate against tunnel servers
#[derive(Debug, Clone, Default)]
pub enum AuthMethod {
    /// `none` authentication; for tunnel providers that accept anonymous
    /// clients
    #[default]
    None,
    /// Password authentication
    Password(String),
    /// Public key authentication with a private key file
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Authentication configuration shared by all forwarders
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Username presented to tunnel servers
    pub username: String,
    /// Authentication method
    pub method: AuthMethod,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: whoami::username(),
            method: AuthMethod::None,
        }
    }
}

impl AuthConfig {
    /// Anonymous configuration for a specific username
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            method: AuthMethod::None,
        }
    }
}
