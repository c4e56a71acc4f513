//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while loading a tunnel configuration snapshot
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config document is not a valid descriptor array
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    /// Remote config request failed at the transport level
    #[error("config request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote config endpoint answered with a non-OK status
    #[error("config request to {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}
