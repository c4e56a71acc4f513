//! Fleet supervisor
//!
//! Owns the mapping from descriptor id to running forwarder. On every
//! tick it pulls a fresh snapshot from the configuration source, merges
//! it into the live map, and then acts on each entry: launching
//! forwarders for new active descriptors, replacing forwarders whose
//! transport has died, and retiring descriptors that turned inactive.
//! The map is only ever mutated from the reconciliation task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use burrow_core::{AuthConfig, ConfigError, ConfigSource, TunnelDescriptor};

use crate::tunnel::{ConnectionState, Forwarder, SpliceMode};

/// Tunables for a supervisor
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Reconciliation period
    pub interval: Duration,
    /// Splice discipline handed to every forwarder
    pub mode: SpliceMode,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            mode: SpliceMode::default(),
        }
    }
}

struct Entry {
    descriptor: TunnelDescriptor,
    forwarder: Option<Arc<Forwarder>>,
}

struct Inner {
    source: ConfigSource,
    auth: AuthConfig,
    options: SupervisorOptions,
    entries: Mutex<BTreeMap<String, Entry>>,
    shutdown: watch::Sender<bool>,
}

/// Reconciliation loop owning the fleet of forwarders
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(source: ConfigSource, auth: AuthConfig, options: SupervisorOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                source,
                auth,
                options,
                entries: Mutex::new(BTreeMap::new()),
                shutdown,
            }),
        }
    }

    /// Perform the initial reconciliation and launch the tick loop
    ///
    /// The first snapshot load is fatal: a supervisor that cannot read
    /// its configuration at boot refuses to start. Later load failures
    /// are logged and skipped, leaving the live fleet untouched.
    pub async fn start(&self) -> Result<(), ConfigError> {
        let snapshot = self.inner.source.load().await?;
        self.reconcile_with(snapshot).await;

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.tick_loop().await });
        Ok(())
    }

    async fn tick_loop(&self) {
        debug!("starting reconciliation loop ({:?} period)", self.inner.options.interval);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.inner.options.interval);
        // The first interval tick fires immediately and the initial
        // reconciliation already ran in start().
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    let _ = changed;
                    if *shutdown_rx.borrow() {
                        debug!("reconciliation loop stopped");
                        return;
                    }
                }
                _ = ticker.tick() => self.reconcile().await,
            }
        }
    }

    /// One reconciliation pass; load failures preserve the live fleet
    pub async fn reconcile(&self) {
        let snapshot = match self.inner.source.load().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("failed to load tunnel config, keeping current fleet: {err}");
                return;
            }
        };
        self.reconcile_with(snapshot).await;
    }

    async fn reconcile_with(&self, snapshot: Vec<TunnelDescriptor>) {
        let mut entries = self.inner.entries.lock().await;

        // Merge: update descriptor fields in place, add new active ones.
        // Descriptors absent from the snapshot are left alone; removal
        // is driven exclusively by an explicit inactive transition.
        for descriptor in snapshot {
            match entries.get_mut(&descriptor.id) {
                Some(entry) => entry.descriptor = descriptor,
                None => {
                    if descriptor.is_active() {
                        info!("tunnel {} added", descriptor.id);
                        entries.insert(
                            descriptor.id.clone(),
                            Entry {
                                descriptor,
                                forwarder: None,
                            },
                        );
                    }
                }
            }
        }

        // Act on every live entry.
        let mut retired = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if entry.descriptor.is_active() {
                match &entry.forwarder {
                    None => entry.forwarder = Some(self.launch(&entry.descriptor)),
                    Some(forwarder) => {
                        debug!("tunnel {id} is {}", forwarder.state_str());
                        if matches!(
                            forwarder.state(),
                            ConnectionState::Closed | ConnectionState::Idle
                        ) {
                            info!("tunnel {id} is {}, reconnecting", forwarder.state_str());
                            forwarder.close();
                            entry.forwarder = Some(self.launch(&entry.descriptor));
                        }
                    }
                }
            } else {
                if let Some(forwarder) = entry.forwarder.take() {
                    forwarder.close();
                }
                retired.push(id.clone());
            }
        }
        for id in retired {
            entries.remove(&id);
            info!("tunnel {id} retired");
        }
    }

    /// Construct a forwarder for a descriptor and start it on its own
    /// task; health is observed through its state, not the task result.
    fn launch(&self, descriptor: &TunnelDescriptor) -> Arc<Forwarder> {
        let forwarder = Arc::new(
            Forwarder::new(descriptor.clone(), self.inner.auth.clone())
                .with_mode(self.inner.options.mode),
        );
        let running = forwarder.clone();
        tokio::spawn(async move {
            if let Err(err) = running.run().await {
                error!("tunnel {} terminated: {err}", running.id());
            }
        });
        forwarder
    }

    /// Close every live forwarder and stop the tick loop
    pub async fn stop_all(&self) {
        let _ = self.inner.shutdown.send(true);
        let mut entries = self.inner.entries.lock().await;
        for (id, entry) in entries.iter_mut() {
            if let Some(forwarder) = entry.forwarder.take() {
                forwarder.close();
                info!("tunnel {id} closed");
            }
        }
        entries.clear();
    }

    /// Snapshot of the descriptors currently under supervision
    pub async fn current_configs(&self) -> Vec<TunnelDescriptor> {
        let entries = self.inner.entries.lock().await;
        entries.values().map(|e| e.descriptor.clone()).collect()
    }
}
