//! burrow-agent: Tunnel engine and fleet supervisor
//!
//! The agent dials tunnel servers over SSH, asks them to listen on
//! behalf of the client, and splices every accepted remote stream onto
//! a local TCP service. A reconciliation loop keeps the running fleet
//! of forwarders in sync with the declared configuration.

pub mod fleet;
pub mod tunnel;

pub use fleet::{Supervisor, SupervisorOptions};
pub use tunnel::{ConnectionState, Forwarder, SpliceMode, TunnelError};
