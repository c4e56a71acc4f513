//! Tunnel descriptor model
//!
//! A descriptor is one declarative entry of the JSON configuration
//! document: which tunnel server to dial, where the remote side should
//! listen, and which local service accepted streams are forwarded to.
//! Ports travel as strings; endpoint addresses are plain `host:port`
//! concatenations and anything malformed is left for the transport
//! layer to reject.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

/// Desired state of a tunnel entry
///
/// A missing or unrecognized `state` value deserializes to `Active`, so
/// that configs written before the field existed keep their tunnels up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    #[default]
    Active,
    Inactive,
}

impl<'de> Deserialize<'de> for TunnelState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "inactive" => TunnelState::Inactive,
            _ => TunnelState::Active,
        })
    }
}

/// One declarative tunnel entry
///
/// `id` is the identity key for reconciliation; every other field may be
/// updated in place between snapshots. Unknown JSON fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelDescriptor {
    /// Unique identity of this tunnel within a snapshot
    pub id: String,

    /// Tunnel server (SSH bastion) to dial
    #[serde(default)]
    pub tunnel_host: String,
    #[serde(default)]
    pub tunnel_port: String,

    /// Address the remote peer is asked to listen on. A host starting
    /// with `/` designates a Unix-domain socket path on the remote side.
    #[serde(default)]
    pub listener_host: String,
    #[serde(default)]
    pub listener_port: String,

    /// Local TCP service accepted streams are forwarded to
    #[serde(default)]
    pub service_host: String,
    #[serde(default)]
    pub service_port: String,

    /// Desired state; defaults to active
    #[serde(default)]
    pub state: TunnelState,
}

impl TunnelDescriptor {
    /// Whether this descriptor should be materialized into a forwarder
    pub fn is_active(&self) -> bool {
        self.state == TunnelState::Active
    }

    /// Address of the tunnel server, `host:port`
    pub fn tunnel_addr(&self) -> String {
        format!("{}:{}", self.tunnel_host, self.tunnel_port)
    }

    /// Address of the local service, `host:port`
    pub fn service_addr(&self) -> String {
        format!("{}:{}", self.service_host, self.service_port)
    }

    /// Whether the remote listener is a Unix-domain socket path
    pub fn listener_is_unix(&self) -> bool {
        self.listener_host.starts_with('/')
    }

    /// Effective Unix socket path on the remote side: the listener host
    /// joined with the tunnel id
    pub fn listener_unix_path(&self) -> String {
        Path::new(&self.listener_host)
            .join(&self.id)
            .to_string_lossy()
            .into_owned()
    }

    /// Remote listen address in human-readable form
    pub fn listener_addr(&self) -> String {
        if self.listener_is_unix() {
            self.listener_unix_path()
        } else {
            format!("{}:{}", self.listener_host, self.listener_port)
        }
    }

    /// The listener port as a number, if it parses as one
    pub fn listener_port_number(&self) -> Option<u32> {
        self.listener_port.parse().ok()
    }

    /// Whether the remote listen endpoint is populated
    pub fn has_listener(&self) -> bool {
        if self.listener_host.is_empty() {
            return false;
        }
        self.listener_is_unix() || self.listener_port_number().is_some()
    }

    /// Whether the local service endpoint is populated
    pub fn has_service(&self) -> bool {
        !self.service_host.is_empty() && !self.service_port.is_empty()
    }
}
