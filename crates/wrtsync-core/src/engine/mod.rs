//! Cycle orchestrator
//!
//! The SyncEngine is responsible for:
//! - Reading the router's tables over one session per tick
//! - Merging leases and neighbors into a device list
//! - Tracking presence, discovering and pruning devices
//! - Deriving WAN totals, rates and period totals
//! - Persisting presence and accumulator state after every cycle
//!
//! ## Architecture
//!
//! ```text
//!   interval tick
//!        │
//!        ▼
//! ┌──────────────┐  blocking worker  ┌───────────────┐
//! │  SyncEngine  │ ────────────────▶ │ RouterSession │
//! └──────────────┘ ◀──────────────── └───────────────┘
//!        │            Acquisition
//!        ├──▶ merge ──▶ PresenceTracker ──▶ EntityRegistry (register / prune)
//!        ├──▶ WanMetrics ──▶ AccumulatorBank
//!        ├──▶ StateStore (save)
//!        └──▶ SyncEvent channel
//! ```
//!
//! ## Cycle States
//!
//! The engine is either idle, waiting for the next tick, or fetching. A
//! tick runs to completion before the next one is taken; missed ticks are
//! delayed, never bursted. Shutdown is only observed between cycles.

mod acquire;

use crate::accumulator::AccumulatorBank;
use crate::config::{EngineConfig, SyncConfig};
use crate::devices::{Device, merge_devices};
use crate::error::{Error, Result};
use crate::presence::PresenceTracker;
use crate::traits::{EntityRegistry, RouterSession, StateStore, TrackedEntity};
use crate::view::{
    DeviceCounts, DeviceTrackerView, EntityState, RouterSummaryView, WanSensorKind, WanSensorView,
};
use crate::wan::{WanMetrics, WanSample, WanSnapshot};
use acquire::{AcquirePlan, Acquisition, ProbeTargets, acquire};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Point-in-time result of one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub devices: Vec<Device>,
    /// `None` when this cycle produced no WAN sample
    pub wan: Option<WanSnapshot>,
}

/// Events emitted by the SyncEngine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Engine started
    Started { instance_id: String },

    /// A cycle finished, successfully or degraded
    CycleCompleted {
        snapshot: CycleSnapshot,
        entities: Vec<EntityState>,
    },

    /// Devices seen connected for the first time
    DevicesDiscovered { devices: Vec<Device> },

    /// Devices forgotten after the retention window
    DevicesPruned { macs: Vec<String> },

    /// Router acquisition failed; the cycle degraded to an empty snapshot
    UpdateFailed { error: String },

    /// Engine stopped
    Stopped { reason: String },
}

/// Router state synchronization engine
///
/// ## Lifecycle
///
/// 1. Create with [`SyncEngine::new()`]
/// 2. Optionally [`restore()`](SyncEngine::restore) persisted state; the
///    first cycle does it otherwise
/// 3. Start with [`SyncEngine::run()`]
/// 4. Runs until a shutdown signal, then flushes the state store
pub struct SyncEngine {
    /// Router session, driven from a blocking worker
    session: Arc<Mutex<Box<dyn RouterSession>>>,

    state_store: Box<dyn StateStore>,

    registry: Arc<dyn EntityRegistry>,

    instance_id: String,
    host: String,
    presence_key: String,
    counters_key: String,
    config: EngineConfig,

    presence: PresenceTracker,
    wan: WanMetrics,
    counters: AccumulatorBank,

    /// WAN interface, from configuration or the first successful query
    wan_interface: Option<String>,
    last_probe: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    last_update_success: bool,
    restored: bool,
    snapshot: CycleSnapshot,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        session: Box<dyn RouterSession>,
        state_store: Box<dyn StateStore>,
        registry: Arc<dyn EntityRegistry>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let mut presence = PresenceTracker::from_config(&config.engine);
        match registry.device_trackers() {
            Ok(entities) => {
                debug!("Seeding {} known devices from the registry", entities.len());
                presence.seed_known(entities.into_iter().map(|e| e.unique_id));
            }
            Err(e) => warn!("Could not read entity registry: {}", e),
        }

        let engine = Self {
            session: Arc::new(Mutex::new(session)),
            state_store,
            registry,
            host: config.router.host.clone(),
            instance_id: config.instance_id.clone(),
            presence_key: config.presence_key(),
            counters_key: config.counters_key(),
            wan_interface: config.engine.wan_interface.clone(),
            presence,
            wan: WanMetrics::new(),
            counters: AccumulatorBank::new(Local::now().date_naive()),
            config: config.engine,
            last_probe: None,
            last_update: None,
            last_update_success: false,
            restored: false,
            snapshot: CycleSnapshot::default(),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn wan(&self) -> &WanMetrics {
        &self.wan
    }

    pub fn counters(&self) -> &AccumulatorBank {
        &self.counters
    }

    /// Result of the most recent cycle
    pub fn snapshot(&self) -> &CycleSnapshot {
        &self.snapshot
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    pub fn wan_interface(&self) -> Option<&str> {
        self.wan_interface.as_deref()
    }

    /// Load persisted presence and accumulator state
    ///
    /// Failures are logged and leave the affected state empty.
    pub async fn restore(&mut self) {
        self.restore_at(Local::now().date_naive()).await
    }

    async fn restore_at(&mut self, today: NaiveDate) {
        self.restored = true;

        match self.state_store.load(&self.presence_key).await {
            Ok(Some(doc)) => {
                let count = self.presence.restore(&doc);
                info!("Restored last-seen state for {} devices", count);
            }
            Ok(None) => debug!("No persisted presence state"),
            Err(e) => warn!("Failed to load presence state: {}", e),
        }

        match self.state_store.load(&self.counters_key).await {
            Ok(Some(doc)) => self.counters = AccumulatorBank::restore(&doc, today),
            Ok(None) => debug!("No persisted WAN counters"),
            Err(e) => warn!("Failed to load WAN counters: {}", e),
        }
    }

    /// Run the engine until Ctrl-C / SIGINT
    pub async fn run(&mut self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine with a controlled shutdown signal
    ///
    /// The daemon uses this to combine its own signal handling; tests use it
    /// for deterministic shutdown.
    pub async fn run_with_shutdown(&mut self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&mut self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(SyncEvent::Started {
            instance_id: self.instance_id.clone(),
        });

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(SyncEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }

                _ = interval.tick() => {
                    self.run_cycle().await;
                }
            }
        }

        // Flush state before exiting
        if let Err(e) = self.state_store.flush().await {
            warn!("Failed to flush state on shutdown: {}", e);
        } else {
            info!("State flushed, engine stopped");
        }

        Ok(())
    }

    /// Run one cycle against the current clock
    pub async fn run_cycle(&mut self) -> CycleSnapshot {
        self.run_cycle_at(Utc::now(), Local::now().date_naive()).await
    }

    /// Run one cycle at an explicit instant and local calendar date
    ///
    /// Never fails: router errors degrade the cycle to an empty snapshot and
    /// one [`SyncEvent::UpdateFailed`].
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>, today: NaiveDate) -> CycleSnapshot {
        if !self.restored {
            self.restore_at(today).await;
        }

        let plan = AcquirePlan {
            wan_interface: self.wan_interface.clone(),
            probe: self.probe_targets(now),
        };

        let (mut devices, sample, success) = match self.fetch(plan).await {
            Ok(acq) => {
                if self.wan_interface.is_none()
                    && let Some(iface) = &acq.wan_interface
                {
                    info!("Using WAN interface {}", iface);
                    self.wan_interface = Some(iface.clone());
                }
                if acq.probed {
                    self.last_probe = Some(now);
                }
                let sample = acq.wan.map(|counters| WanSample::new(counters, now));
                (merge_devices(acq.leases, &acq.neighbors, now), sample, true)
            }
            Err(e) => {
                error!("Router update failed: {}", e);
                self.emit_event(SyncEvent::UpdateFailed {
                    error: e.to_string(),
                });
                (Vec::new(), None, false)
            }
        };

        let discovered = self.presence.observe(&mut devices, now);
        if !discovered.is_empty() {
            self.register_devices(&discovered);
            self.emit_event(SyncEvent::DevicesDiscovered {
                devices: discovered,
            });
        }

        let pruned = self.presence.prune(self.registry.as_ref(), now);
        if !pruned.is_empty() {
            self.emit_event(SyncEvent::DevicesPruned { macs: pruned });
        }

        if success {
            let remembered = self.presence.remembered_devices(&devices, now);
            devices.extend(remembered);
        }

        let wan = self.wan.ingest(sample);
        self.counters.tick(wan.as_ref(), today);

        self.persist().await;

        self.last_update = Some(now);
        self.last_update_success = success;
        self.snapshot = CycleSnapshot { devices, wan };

        debug!(
            "Cycle complete: {} devices, wan {}",
            self.snapshot.devices.len(),
            if self.snapshot.wan.is_some() { "sampled" } else { "unavailable" }
        );
        self.emit_event(SyncEvent::CycleCompleted {
            snapshot: self.snapshot.clone(),
            entities: self.entity_states(now),
        });

        self.snapshot.clone()
    }

    /// Render every read-model view at `now`
    pub fn entity_states(&self, now: DateTime<Utc>) -> Vec<EntityState> {
        let mut states: Vec<EntityState> = self
            .snapshot
            .devices
            .iter()
            .map(|device| {
                EntityState::render(
                    device.mac.clone(),
                    &DeviceTrackerView::new(device, &self.presence, now),
                )
            })
            .collect();

        states.push(EntityState::render(
            format!("{}_router_info", self.instance_id),
            &self.router_summary(now),
        ));

        for kind in WanSensorKind::ALL {
            let view = WanSensorView {
                kind,
                snapshot: self.wan.latest(),
            };
            states.push(EntityState::render(
                format!("{}_{}", self.instance_id, kind.key()),
                &view,
            ));
        }

        for acc in self.counters.iter() {
            states.push(EntityState::render(
                format!("{}_{}", self.instance_id, acc.key()),
                acc,
            ));
        }

        states
    }

    /// Router summary over the latest snapshot
    pub fn router_summary(&self, now: DateTime<Utc>) -> RouterSummaryView<'_> {
        RouterSummaryView {
            host: &self.host,
            counts: DeviceCounts::tally(&self.snapshot.devices, self.presence.grace(), now),
            update_interval: self.config.poll_interval(),
            last_update: self.last_update,
            last_update_success: self.last_update_success,
        }
    }

    /// Run the blocking acquisition on a worker thread
    async fn fetch(&self, plan: AcquirePlan) -> Result<Acquisition> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut session = session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            acquire(&mut **session, &plan)
        })
        .await
        .map_err(|e| Error::Other(format!("Acquisition worker failed: {}", e)))?
    }

    /// Enabled presence entities, if a probe is due
    fn probe_targets(&self, now: DateTime<Utc>) -> Option<ProbeTargets> {
        let interval = self.config.probe_interval()?;
        if let Some(last) = self.last_probe
            && now.signed_duration_since(last) < interval
        {
            return None;
        }

        match self.registry.device_trackers() {
            Ok(entities) => Some(ProbeTargets {
                enabled_macs: entities
                    .into_iter()
                    .filter(|e| e.enabled)
                    .map(|e| e.unique_id)
                    .collect(),
            }),
            Err(e) => {
                debug!("Skipping probe, registry unavailable: {}", e);
                None
            }
        }
    }

    fn register_devices(&self, devices: &[Device]) {
        for device in devices {
            info!(
                "Discovered {} ({}) at {}",
                device.hostname,
                device.mac,
                device.ip.as_deref().unwrap_or("unknown address")
            );
            let entity = TrackedEntity::device_tracker(&device.mac, self.config.new_devices_enabled);
            if let Err(e) = self.registry.register(entity) {
                warn!("Failed to register {}: {}", device.mac, e);
            }
        }
    }

    /// Save presence and accumulators; failures are retried next cycle
    async fn persist(&self) {
        let presence = self.presence.to_document();
        if let Err(e) = self.state_store.save(&self.presence_key, &presence).await {
            warn!("Failed to save presence state: {}", e);
        }

        let counters = self.counters.to_document();
        if let Err(e) = self.state_store.save(&self.counters_key, &counters).await {
            warn!("Failed to save WAN counters: {}", e);
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: SyncEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("No event receiver, dropping event");
            }
        }
    }
}
