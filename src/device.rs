//! Resync supervisor for one managed device.
//!
//! A [`Device`] owns the periodic loop that repeatedly brings the device's
//! status up to date: every `sync_interval` it starts a BLE session, lets a
//! [`SessionController`] connect to the peripheral and process its
//! properties, and publishes the resulting status. Cycles are strictly
//! sequential and at most one loop runs per device.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::ble::session::BleSession;
use crate::config::{PublishPoint, StatusSeed, SyncConfig};
use crate::controller::SessionController;
use crate::data::{DataConverter, DeviceSpec, StatusSnapshot, StatusStore};
use crate::error::Result;
use crate::publisher::{DeviceIdentity, StatusPublisher};

/// A managed device and its resync loop.
pub struct Device {
    /// Shared state handed to each loop.
    shared: Arc<Shared>,
    /// Stop signal of the running loop.
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Background loop handle.
    loop_handle: RwLock<Option<JoinHandle<()>>>,
    /// Held across stop-then-spawn so lifecycle changes never interleave.
    lifecycle: tokio::sync::Mutex<()>,
}

/// Everything a loop needs that outlives a single `configure`.
struct Shared {
    identity: DeviceIdentity,
    session: Arc<dyn BleSession>,
    converter: Arc<dyn DataConverter>,
    publisher: Arc<dyn StatusPublisher>,
    config: SyncConfig,
    /// Last snapshot handed to the publisher.
    last_published: Mutex<Option<StatusSnapshot>>,
}

impl Device {
    /// Create a device. No loop runs until [`configure`](Self::configure).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration
    /// is invalid.
    pub fn new(
        identity: DeviceIdentity,
        session: Arc<dyn BleSession>,
        converter: Arc<dyn DataConverter>,
        publisher: Arc<dyn StatusPublisher>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                identity,
                session,
                converter,
                publisher,
                config,
                last_published: Mutex::new(None),
            }),
            stop_tx: Mutex::new(None),
            loop_handle: RwLock::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// The device's identity.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.shared.identity
    }

    /// The loop configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// The most recently published status, if any.
    pub fn last_published(&self) -> Option<StatusSnapshot> {
        self.shared.last_published.lock().clone()
    }

    /// Check whether a resync loop is running.
    pub fn is_running(&self) -> bool {
        self.loop_handle
            .read()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Replace the device spec and (re)start the resync loop.
    ///
    /// Any running loop is stopped first, and this waits for it to exit so
    /// that two loops never share the session. The first cycle starts
    /// immediately.
    pub async fn configure(&self, spec: DeviceSpec, initial_status: StatusSnapshot) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_loop().await;

        info!(
            "Configuring {} with {} properties",
            self.shared.identity,
            spec.properties.len()
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let shared = self.shared.clone();
        let spec = Arc::new(spec);

        let handle = tokio::spawn(async move {
            shared.run(spec, initial_status, stop_rx).await;
        });

        *self.stop_tx.lock() = Some(stop_tx);
        *self.loop_handle.write() = Some(handle);
    }

    /// Stop the resync loop and wait for it to exit.
    ///
    /// A cycle in progress is allowed to finish.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Shutting down {}", self.shared.identity);
        self.stop_loop().await;
    }

    async fn stop_loop(&self) {
        let stop = self.stop_tx.lock().take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }

        let handle = self.loop_handle.write().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Resync loop of {} ended abnormally: {}", self.shared.identity, e);
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Dropping the sender stops the loop after its current cycle.
        self.stop_tx.lock().take();
    }
}

impl Shared {
    async fn run(
        &self,
        spec: Arc<DeviceSpec>,
        initial_status: StatusSnapshot,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let period = self.config.sync_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.run_cycle(&spec, &initial_status).await;

            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }
        }

        debug!("Resync loop of {} stopped", self.identity);
    }

    fn seed(&self, initial_status: &StatusSnapshot) -> StatusSnapshot {
        match self.config.status_seed {
            StatusSeed::Initial => initial_status.clone(),
            StatusSeed::Previous => self
                .last_published
                .lock()
                .clone()
                .unwrap_or_else(|| initial_status.clone()),
            StatusSeed::Empty => StatusSnapshot::new(),
        }
    }

    async fn run_cycle(&self, spec: &Arc<DeviceSpec>, initial_status: &StatusSnapshot) {
        debug!("Starting resync cycle for {}", self.identity);

        let status = StatusStore::new(self.seed(initial_status));
        let (controller, done) = SessionController::new(
            spec.clone(),
            self.session.clone(),
            self.converter.clone(),
            status.clone(),
            &self.config,
        );

        match self.session.start().await {
            Ok(events) => {
                if self.config.publish_point == PublishPoint::OnStart {
                    self.publish(&status);
                }

                let drive = async move { tokio::join!(controller.run(events), done.wait()) };
                match timeout(self.config.timeout, drive).await {
                    Ok((_, true)) => debug!("Resync cycle for {} completed", self.identity),
                    Ok((state, false)) => {
                        warn!(
                            "Session events for {} ended early in state {}",
                            self.identity, state
                        );
                    }
                    Err(_) => {
                        warn!(
                            "Resync cycle for {} timed out after {:?}",
                            self.identity, self.config.timeout
                        );
                    }
                }

                if let Err(e) = self.session.stop().await {
                    warn!("Failed to stop BLE session: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to start BLE session for {}: {}", self.identity, e);
                if self.config.publish_point == PublishPoint::OnStart {
                    self.publish(&status);
                }
            }
        }

        if self.config.publish_point == PublishPoint::AfterCycle {
            self.publish(&status);
        }
    }

    fn publish(&self, status: &StatusStore) {
        let snapshot = status.snapshot();
        debug!(
            "Publishing {} properties for {}",
            snapshot.len(),
            self.identity
        );
        self.publisher.publish(&self.identity, &snapshot);
        *self.last_published.lock() = Some(snapshot);
    }
}
