//! Reverse tunnel engine
//!
//! One [`Forwarder`] owns one SSH session and one remote listener; each
//! accepted remote stream is spliced onto the local service by an
//! independent task.

mod forwarder;
pub mod splice;
mod state;

pub use forwarder::{Forwarder, TunnelError};
pub use splice::SpliceMode;
pub use state::ConnectionState;
