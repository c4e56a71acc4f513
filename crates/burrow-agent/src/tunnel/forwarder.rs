//! Reverse tunnel forwarder
//!
//! A forwarder realizes one tunnel descriptor: it dials the tunnel
//! server over SSH, asks the peer to listen on the configured remote
//! endpoint, and splices every accepted stream onto the local service.
//! The supervisor owns the forwarder and watches its [`ConnectionState`]
//! to decide when a replacement is needed.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle, Msg};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::load_secret_key;
use russh::{Channel, Disconnect};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use burrow_core::{AuthConfig, AuthMethod, TunnelDescriptor};

use super::splice::{self, SpliceMode};
use super::state::{ConnectionState, StateCell};

/// Cadence of keepalive requests on an established session
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Failures surfaced by [`Forwarder::run`]
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Descriptor is missing its listener or service endpoint
    #[error("tunnel {0}: descriptor is missing a listener or service endpoint")]
    ConfigIncomplete(String),

    /// `run` was invoked on a forwarder that is not idle
    #[error("tunnel {0}: already started")]
    AlreadyStarted(String),

    /// SSH dial to the tunnel server failed
    #[error("failed to dial tunnel server {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: russh::Error,
    },

    /// Private key could not be loaded
    #[error("failed to load private key {path}: {source}")]
    KeyLoad {
        path: String,
        #[source]
        source: russh::keys::Error,
    },

    /// Authentication exchange failed at the transport level
    #[error("authentication with {addr} failed: {source}")]
    Auth {
        addr: String,
        #[source]
        source: russh::Error,
    },

    /// Tunnel server rejected our credentials
    #[error("authentication rejected by tunnel server {0}")]
    AuthRejected(String),

    /// Tunnel server refused to listen on the requested endpoint
    #[error("remote listen on {addr} failed: {source}")]
    RemoteListen {
        addr: String,
        #[source]
        source: russh::Error,
    },
}

/// Realizes one tunnel descriptor over a long-lived SSH session
pub struct Forwarder {
    descriptor: TunnelDescriptor,
    auth: AuthConfig,
    mode: SpliceMode,
    state: StateCell,
    stop: watch::Sender<bool>,
}

impl Forwarder {
    /// Pure constructor; no I/O happens until [`Forwarder::run`]
    pub fn new(descriptor: TunnelDescriptor, auth: AuthConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            descriptor,
            auth,
            mode: SpliceMode::default(),
            state: StateCell::new(),
            stop,
        }
    }

    /// Select the splice discipline applied to accepted streams
    pub fn with_mode(mut self, mode: SpliceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Identity of the descriptor this forwarder was created for
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Current transport state
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Human-readable transport state
    pub fn state_str(&self) -> &'static str {
        self.state.get().as_str()
    }

    /// Whether the forwarder has shut down
    pub fn is_closed(&self) -> bool {
        self.state.get() == ConnectionState::Closed
    }

    /// Request an orderly shutdown; idempotent and safe from any task
    pub fn close(&self) {
        self.state.set(ConnectionState::Closed);
        let _ = self.stop.send(true);
    }

    /// Drive the full tunnel lifecycle until the session ends
    ///
    /// Returns when the session terminates, either because [`close`] was
    /// requested or because the transport failed. May be invoked at most
    /// once; a forwarder that was closed before it ever ran returns
    /// `Ok(())` immediately.
    ///
    /// [`close`]: Forwarder::close
    pub async fn run(&self) -> Result<(), TunnelError> {
        if !self
            .state
            .transition(ConnectionState::Idle, ConnectionState::Connecting)
        {
            return match self.state.get() {
                ConnectionState::Closed => Ok(()),
                _ => Err(TunnelError::AlreadyStarted(self.descriptor.id.clone())),
            };
        }

        if !self.descriptor.has_listener() || !self.descriptor.has_service() {
            self.state.fail();
            let err = TunnelError::ConfigIncomplete(self.descriptor.id.clone());
            error!("{err}");
            return Err(err);
        }

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let mut session = match self.establish(incoming_tx).await {
            Ok(session) => session,
            Err(err) => {
                self.state.fail();
                error!("tunnel {}: {err}", self.descriptor.id);
                return Err(err);
            }
        };

        let served = self.serve(&mut session, incoming_rx).await;

        // Tear the session down exactly once, whichever path ended the
        // accept loop.
        self.cancel_remote_listen(&mut session).await;
        let _ = session
            .disconnect(Disconnect::ByApplication, "tunnel shutting down", "en")
            .await;

        if let Err(err) = &served {
            self.state.fail();
            error!("tunnel {}: {err}", self.descriptor.id);
        }
        served
    }

    /// Dial the tunnel server and authenticate
    async fn establish(
        &self,
        incoming_tx: mpsc::UnboundedSender<Channel<Msg>>,
    ) -> Result<Handle<TunnelHandler>, TunnelError> {
        let addr = self.descriptor.tunnel_addr();
        let config = Arc::new(client::Config::default());
        let handler = TunnelHandler {
            id: self.descriptor.id.clone(),
            incoming: incoming_tx,
        };

        let mut session =
            client::connect(config, addr.clone(), handler)
                .await
                .map_err(|source| TunnelError::Dial {
                    addr: addr.clone(),
                    source,
                })?;

        let outcome = match &self.auth.method {
            AuthMethod::None => session
                .authenticate_none(self.auth.username.clone())
                .await
                .map_err(|source| TunnelError::Auth {
                    addr: addr.clone(),
                    source,
                })?,
            AuthMethod::Password(password) => session
                .authenticate_password(self.auth.username.clone(), password.clone())
                .await
                .map_err(|source| TunnelError::Auth {
                    addr: addr.clone(),
                    source,
                })?,
            AuthMethod::Key { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_deref()).map_err(|source| {
                    TunnelError::KeyLoad {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                let rsa_hash = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|source| TunnelError::Auth {
                        addr: addr.clone(),
                        source,
                    })?
                    .flatten();
                session
                    .authenticate_publickey(
                        self.auth.username.clone(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), rsa_hash),
                    )
                    .await
                    .map_err(|source| TunnelError::Auth {
                        addr: addr.clone(),
                        source,
                    })?
            }
        };

        if !outcome.success() {
            return Err(TunnelError::AuthRejected(addr));
        }

        debug!(
            "tunnel {}: ssh connection established to {addr}",
            self.descriptor.id
        );
        Ok(session)
    }

    /// Request the remote listen and run the accept loop
    async fn serve(
        &self,
        session: &mut Handle<TunnelHandler>,
        mut incoming_rx: mpsc::UnboundedReceiver<Channel<Msg>>,
    ) -> Result<(), TunnelError> {
        self.request_remote_listen(session).await?;

        if *self.stop.borrow() {
            // Closed while we were still connecting.
            return Ok(());
        }
        self.state.set(ConnectionState::Connected);
        info!(
            "tunnel {}: listening on remote {}, forwarding to local service {}",
            self.descriptor.id,
            self.descriptor.listener_addr(),
            self.descriptor.service_addr()
        );

        self.accept_loop(session, &mut incoming_rx, |channel| self.spawn_splice(channel))
            .await;
        Ok(())
    }

    /// Accept loop: forwarded streams, shutdown requests, and the
    /// keepalive cadence share one select loop. The keepalive interval
    /// is persistent, so accept traffic cannot restart the countdown
    /// and starve the cadence.
    async fn accept_loop<S, T>(
        &self,
        session: &mut S,
        incoming_rx: &mut mpsc::UnboundedReceiver<T>,
        mut on_accept: impl FnMut(T),
    ) where
        S: ControlSession,
    {
        let id = &self.descriptor.id;
        let mut stop_rx = self.stop.subscribe();
        if *stop_rx.borrow() {
            // Closed while the listen request was in flight.
            self.state.set(ConnectionState::Closed);
            return;
        }
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        // The first interval tick fires immediately and the session was
        // just established, so consume it.
        keepalive.tick().await;

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    let _ = changed;
                    if *stop_rx.borrow() {
                        self.state.set(ConnectionState::Closed);
                        info!("tunnel {id}: close requested, stopping accept loop");
                        break;
                    }
                }
                accepted = incoming_rx.recv() => match accepted {
                    Some(stream) => on_accept(stream),
                    None => {
                        // The handler is gone, so the session is dead.
                        if self.state.get() == ConnectionState::Closed {
                            info!("tunnel {id}: listener closed, stopping accept loop");
                        } else {
                            self.state.set(ConnectionState::Closed);
                            error!("tunnel {id}: failed to accept remote connection, session lost");
                        }
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    if session.is_closed() {
                        self.state.set(ConnectionState::Closed);
                        warn!("tunnel {id}: session closed by peer");
                        break;
                    }
                    if let Err(err) = session.keepalive().await {
                        // The accept side observes the dead session next.
                        warn!("tunnel {id}: failed to send keepalive request: {err}");
                    }
                }
            }
        }
    }

    async fn request_remote_listen(
        &self,
        session: &mut Handle<TunnelHandler>,
    ) -> Result<(), TunnelError> {
        if self.descriptor.listener_is_unix() {
            let path = self.descriptor.listener_unix_path();
            session
                .streamlocal_forward(path.clone())
                .await
                .map_err(|source| TunnelError::RemoteListen { addr: path, source })?;
        } else {
            let port = self.descriptor.listener_port_number().unwrap_or(0);
            let bound = session
                .tcpip_forward(self.descriptor.listener_host.clone(), port)
                .await
                .map_err(|source| TunnelError::RemoteListen {
                    addr: self.descriptor.listener_addr(),
                    source,
                })?;
            if bound != port {
                debug!(
                    "tunnel {}: remote peer assigned port {bound} instead of {port}",
                    self.descriptor.id
                );
            }
        }
        Ok(())
    }

    async fn cancel_remote_listen(&self, session: &mut Handle<TunnelHandler>) {
        if self.descriptor.listener_is_unix() {
            let _ = session
                .cancel_streamlocal_forward(self.descriptor.listener_unix_path())
                .await;
        } else {
            let _ = session
                .cancel_tcpip_forward(
                    self.descriptor.listener_host.clone(),
                    self.descriptor.listener_port_number().unwrap_or(0),
                )
                .await;
        }
    }

    /// Hand an accepted remote stream to its own splice task
    fn spawn_splice(&self, channel: Channel<Msg>) {
        let id = self.descriptor.id.clone();
        let service_addr = self.descriptor.service_addr();
        let state = self.state.clone();
        let mode = self.mode;
        tokio::spawn(async move {
            let local = match splice::dial_service(&service_addr).await {
                Ok(local) => local,
                Err(err) => {
                    state.fail();
                    error!("tunnel {id}: failed to dial service {service_addr}: {err}");
                    let _ = channel.close().await;
                    return;
                }
            };
            debug!("tunnel {id}: splicing remote stream onto {service_addr}");
            if let Err(err) = splice::splice(channel.into_stream(), local, mode).await {
                debug!("tunnel {id}: splice to {service_addr} ended: {err}");
            }
        });
    }
}

/// The slice of the SSH session the accept loop drives: liveness
/// probing and keepalive requests
trait ControlSession {
    fn is_closed(&self) -> bool;
    async fn keepalive(&mut self) -> Result<(), russh::Error>;
}

impl ControlSession for Handle<TunnelHandler> {
    fn is_closed(&self) -> bool {
        Handle::is_closed(self)
    }

    async fn keepalive(&mut self) -> Result<(), russh::Error> {
        self.send_keepalive(false).await
    }
}

/// russh client callbacks for one forwarder session
///
/// Forwarded channels opened by the peer are queued for the accept loop;
/// the queue closing is how the loop learns the session is gone.
struct TunnelHandler {
    id: String,
    incoming: mpsc::UnboundedSender<Channel<Msg>>,
}

impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host key policy is embedded in the deployment; any key is
        // accepted here.
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "tunnel {}: remote stream on {connected_address}:{connected_port} from {originator_address}:{originator_port}",
            self.id
        );
        let _ = self.incoming.send(channel);
        Ok(())
    }

    async fn server_channel_open_forwarded_streamlocal(
        &mut self,
        channel: Channel<Msg>,
        socket_path: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!("tunnel {}: remote stream on {socket_path}", self.id);
        let _ = self.incoming.send(channel);
        Ok(())
    }
}
