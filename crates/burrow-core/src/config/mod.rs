//! Configuration management for burrow

mod auth;
mod descriptor;
mod source;

pub use auth::{AuthConfig, AuthMethod};
pub use descriptor::{TunnelDescriptor, TunnelState};
pub use source::ConfigSource;

use std::path::PathBuf;

/// Get the default configuration file path (`$HOME/.burrow/config.json`)
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".burrow")
        .join("config.json")
}
