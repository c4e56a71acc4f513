//! Fleet supervision
//!
//! The supervisor reconciles the running set of forwarders against the
//! declared configuration on a fixed period.

mod supervisor;

pub use supervisor::{Supervisor, SupervisorOptions};
