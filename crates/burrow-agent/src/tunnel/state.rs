//! Connection state tracking
//!
//! The supervisor probes forwarder state from its own task, so the
//! state lives in an atomic cell that can be read without locking.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state of a forwarder's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Constructed but not yet running
    Idle = 0,
    /// Dialing the tunnel server and requesting the remote listen
    Connecting = 1,
    /// Remote listener established; accepting streams
    Connected = 2,
    /// Shut down, either on request or because the transport died
    Closed = 3,
    /// Failed while establishing or serving; terminal until replaced
    Error = 4,
}

impl ConnectionState {
    /// Human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Closed => "Closed",
            ConnectionState::Error => "Error",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closed,
            4 => ConnectionState::Error,
            _ => ConnectionState::Idle,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free state cell
///
/// Cloned into splice tasks so they can report transport failures back
/// to the forwarder they belong to.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Idle as u8)))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Compare-and-swap transition; returns whether it took effect
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record a failure. Closed is sticky: a forwarder that was shut
    /// down on purpose must keep reporting Closed, not Error.
    pub fn fail(&self) {
        let mut current = self.0.load(Ordering::SeqCst);
        while current != ConnectionState::Closed as u8 {
            match self.0.compare_exchange(
                current,
                ConnectionState::Error as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}
