//! Scheduled tasks - the proximity cycle and token maintenance
//!
//! The cycle task runs fetch -> propagate -> screen -> score -> broadcast,
//! then sleeps for the cadence. Drift between ticks is accepted. Shutdown is
//! cooperative: the stop signal is observed between ticks and while sleeping,
//! and an in-flight tick gets a bounded grace period before it is abandoned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use orbitshield_common::ObjectClass;

use super::propagator::StatePropagator;
use super::registry::SubscriberRegistry;
use super::risk::{RiskFeatures, RiskScorer};
use super::screener::screen;
use super::token::TokenAuthority;
use crate::config::{BackendConfig, RiskConfig};
use crate::model::{Alert, CatalogError, CatalogSource, CycleSnapshot, ObjectState};

const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cycle parameters
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub cadence: Duration,
    pub threshold_km: f64,
    pub shutdown_grace: Duration,
    pub risk: RiskConfig,
}

impl CycleConfig {
    pub fn from_backend(config: &BackendConfig) -> Self {
        Self {
            cadence: config.cadence(),
            threshold_km: config.threshold_km,
            shutdown_grace: config.shutdown_grace(),
            risk: config.risk.clone(),
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self::from_backend(&BackendConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Drives the periodic proximity cycle
pub struct CycleScheduler {
    config: CycleConfig,
    catalog: Arc<dyn CatalogSource>,
    propagator: Arc<dyn StatePropagator>,
    scorer: Arc<RiskScorer>,
    registry: Arc<SubscriberRegistry>,
    state: watch::Sender<SchedulerState>,
}

impl CycleScheduler {
    pub fn new(
        config: CycleConfig,
        catalog: Arc<dyn CatalogSource>,
        propagator: Arc<dyn StatePropagator>,
        scorer: Arc<RiskScorer>,
        registry: Arc<SubscriberRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            config,
            catalog,
            propagator,
            scorer,
            registry,
            state,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Compute the snapshot for one tick. Every state vector uses `timestamp`
    /// as its epoch; objects that fail to propagate are left out.
    pub async fn run_tick(&self, timestamp: DateTime<Utc>) -> Result<CycleSnapshot, CatalogError> {
        let catalog = self.catalog.tracked_objects().await?;

        let mut objects = Vec::with_capacity(catalog.len());
        let mut failed = 0usize;
        for object in &catalog {
            match self.propagator.propagate(object, timestamp) {
                Ok(state) => objects.push(ObjectState {
                    name: object.name.clone(),
                    state,
                }),
                Err(e) => {
                    failed += 1;
                    debug!(id = object.id, name = %object.name, "Skipping object: {}", e);
                }
            }
        }
        objects.sort_by_key(|o| (o.state.class, o.state.object_id));

        let states: Vec<_> = objects.iter().map(|o| o.state).collect();
        let sizes: HashMap<i64, Option<f64>> = catalog.iter().map(|o| (o.id, o.size)).collect();

        let alerts: Vec<Alert> = screen(&states, self.config.threshold_km)
            .into_iter()
            .map(|pair| {
                let features = RiskFeatures {
                    distance_km: pair.distance_km,
                    relative_speed_km_s: pair.relative_speed_km_s,
                    size_satellite: self.object_size(&sizes, pair.satellite.object_id, ObjectClass::Satellite),
                    size_debris: self.object_size(&sizes, pair.debris.object_id, ObjectClass::Debris),
                    history_factor: self.config.risk.history_factor,
                    noise_factor: self.config.risk.noise_factor,
                };
                Alert {
                    pair,
                    assessment: self.scorer.score(&features),
                }
            })
            .collect();

        debug!(
            tracked = catalog.len(),
            propagated = objects.len(),
            failed,
            alerts = alerts.len(),
            "Tick computed"
        );

        Ok(CycleSnapshot {
            timestamp,
            objects,
            alerts,
        })
    }

    fn object_size(&self, sizes: &HashMap<i64, Option<f64>>, id: i64, class: ObjectClass) -> f64 {
        sizes
            .get(&id)
            .copied()
            .flatten()
            .unwrap_or(match class {
                ObjectClass::Satellite => self.config.risk.default_satellite_size,
                ObjectClass::Debris => self.config.risk.default_debris_size,
            })
    }

    /// Run ticks until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.state.send_replace(SchedulerState::Running);
        info!(
            "Proximity cycle started (cadence {:.2}s, threshold {} km)",
            self.config.cadence.as_secs_f64(),
            self.config.threshold_km
        );

        let mut ticks: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let timestamp = Utc::now();
            let tick = self.run_tick(timestamp);
            tokio::pin!(tick);

            let mut stopping = false;
            let result = tokio::select! {
                result = &mut tick => Some(result),
                _ = shutdown.changed() => {
                    stopping = true;
                    match tokio::time::timeout(self.config.shutdown_grace, &mut tick).await {
                        Ok(result) => Some(result),
                        Err(_) => {
                            warn!("Abandoning in-flight tick {} after grace period", timestamp);
                            None
                        }
                    }
                }
            };

            match result {
                Some(Ok(snapshot)) => {
                    ticks += 1;
                    let report = self.registry.broadcast(&snapshot).await;
                    if !snapshot.alerts.is_empty() {
                        debug!(
                            "Tick {}: {} objects, {} alerts, {} subscribers",
                            ticks,
                            snapshot.objects.len(),
                            snapshot.alerts.len(),
                            report.delivered
                        );
                    }
                }
                Some(Err(e)) => {
                    error!("Catalog fetch failed, skipping tick {}: {}", timestamp, e);
                }
                None => {}
            }

            if stopping {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cadence) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.state.send_replace(SchedulerState::Stopped);
        info!("Proximity cycle stopped after {} ticks", ticks);
    }
}

/// Owns the background tasks of the service
pub struct ScheduledTaskManager {
    scheduler: Arc<CycleScheduler>,
    tokens: Arc<TokenAuthority>,
    shutdown_tx: watch::Sender<bool>,
    task_handles: Vec<JoinHandle<()>>,
}

impl ScheduledTaskManager {
    pub fn new(scheduler: Arc<CycleScheduler>, tokens: Arc<TokenAuthority>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            scheduler,
            tokens,
            shutdown_tx,
            task_handles: Vec::new(),
        }
    }

    pub fn start_all(&mut self) {
        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.task_handles.push(tokio::spawn(scheduler.run(shutdown)));

        let tokens = self.tokens.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.task_handles.push(tokio::spawn(Self::token_sweep_loop(tokens, shutdown)));

        info!("Started {} scheduled tasks", self.task_handles.len());
    }

    async fn token_sweep_loop(tokens: Arc<TokenAuthority>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TOKEN_SWEEP_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }
            let removed = tokens.purge_expired(Utc::now()).await;
            if removed > 0 {
                debug!("Purged {} expired stream tokens", removed);
            }
        }
    }

    /// Signal every task to stop and wait for them, aborting stragglers
    pub async fn shutdown(self) {
        info!("Shutting down scheduled tasks...");
        self.shutdown_tx.send_replace(true);

        let deadline = self
            .scheduler
            .config
            .shutdown_grace
            .saturating_add(Duration::from_secs(1));
        for mut handle in self.task_handles {
            if tokio::time::timeout(deadline, &mut handle).await.is_err() {
                warn!("Scheduled task did not stop in time, aborting");
                handle.abort();
            }
        }

        info!("All scheduled tasks stopped");
    }
}
