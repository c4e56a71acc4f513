//! burrow-core: Shared model and configuration for burrow
//!
//! This crate provides the tunnel descriptor model, the configuration
//! sources the supervisor pulls snapshots from, and the error types
//! shared by the agent.

pub mod config;
pub mod error;

pub use config::{AuthConfig, AuthMethod, ConfigSource, TunnelDescriptor, TunnelState};
pub use error::ConfigError;
