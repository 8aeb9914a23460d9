//! Engine module - coordinates scheduler, store and notifier
//!
//! Owns the monitored scopes: loading a map starts the per-device timers,
//! unloading cancels them. Exposes the on-demand single check and the bulk
//! check consumed by the CRUD/UI layer.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::HealthStore;
use crate::database::models::Device;
use crate::monitoring::prober::PacketBudget;
use crate::monitoring::scheduler::{CycleOutcome, ProbeScheduler};
use crate::monitoring::types::{HealthState, PingMetrics, StatusTransition};
use crate::notify::Notifier;

/// Who is asking, and for which set of devices. Passed explicitly through
/// every engine call; the engine keeps no ambient session state.
#[derive(Debug, Clone)]
pub struct ScopeContext {
    pub map_id: i64,
    pub caller: Option<String>,
}

impl ScopeContext {
    pub fn new(map_id: i64) -> Self {
        Self { map_id, caller: None }
    }
}

/// Result of an on-demand single check
#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub state: HealthState,
    pub detail: String,
    pub metrics: PingMetrics,
}

/// One changed device from a bulk check
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub device_uuid: Uuid,
    pub previous_status: HealthState,
    pub new_status: HealthState,
    pub metrics: PingMetrics,
}

struct ScopeHandle {
    cancel_tx: watch::Sender<bool>,
    timer_tasks: Vec<JoinHandle<()>>,
    device_uuids: Vec<Uuid>,
}

/// Shared between the engine surface and the write-back loop.
struct EngineShared {
    store: Arc<dyn HealthStore>,
    notifier: Arc<dyn Notifier>,
    /// Live device state for loaded scopes, one lock per device. Writes
    /// are always single-device; no global lock exists.
    devices: RwLock<HashMap<Uuid, Arc<RwLock<Device>>>>,
}

/// Main coordinator for the monitoring service
pub struct Engine {
    shared: Arc<EngineShared>,
    scheduler: Arc<ProbeScheduler>,
    scopes: RwLock<HashMap<i64, ScopeHandle>>,
    result_tx: mpsc::Sender<CycleOutcome>,
    #[allow(dead_code)] // Background write-back task kept alive
    result_task: JoinHandle<()>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn HealthStore>,
        notifier: Arc<dyn Notifier>,
        scheduler: ProbeScheduler,
    ) -> Self {
        let shared = Arc::new(EngineShared { store, notifier, devices: RwLock::new(HashMap::new()) });

        let (result_tx, mut result_rx) = mpsc::channel::<CycleOutcome>(256);
        let loop_shared = Arc::clone(&shared);
        let result_task = tokio::spawn(async move {
            while let Some(outcome) = result_rx.recv().await {
                if let Err(err) = apply_outcome(&loop_shared, &outcome).await {
                    error!(device = %outcome.device.name, error = %err, "failed to store probe outcome");
                }
            }
        });

        Self {
            shared,
            scheduler: Arc::new(scheduler),
            scopes: RwLock::new(HashMap::new()),
            result_tx,
            result_task,
        }
    }

    /// Load a map's devices and start their recurring probe timers.
    /// Returns the number of devices that got a timer.
    pub async fn load_scope(&self, ctx: &ScopeContext) -> Result<usize> {
        {
            let scopes = self.scopes.read().await;
            if scopes.contains_key(&ctx.map_id) {
                warn!(map_id = ctx.map_id, "scope already loaded");
                return Ok(0);
            }
        }

        let devices = self.shared.store.get_map_devices(ctx.map_id).await?;
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut timer_tasks = Vec::new();
        let mut device_uuids = Vec::new();
        let mut registry = self.shared.devices.write().await;

        for device in devices {
            let interval_seconds = device.probe_interval_seconds;
            let schedulable = device.is_probeable() && interval_seconds > 0;
            let uuid = device.uuid;
            let cell = Arc::new(RwLock::new(device));

            registry.insert(uuid, Arc::clone(&cell));
            device_uuids.push(uuid);

            if schedulable {
                timer_tasks.push(self.scheduler.spawn_timer(
                    cell,
                    Duration::from_secs(interval_seconds),
                    cancel_rx.clone(),
                    self.result_tx.clone(),
                ));
            }
        }
        drop(registry);

        let scheduled = timer_tasks.len();
        info!(
            map_id = ctx.map_id,
            devices = device_uuids.len(),
            scheduled,
            caller = ctx.caller.as_deref().unwrap_or("-"),
            "scope loaded"
        );

        self.scopes
            .write()
            .await
            .insert(ctx.map_id, ScopeHandle { cancel_tx, timer_tasks, device_uuids });

        Ok(scheduled)
    }

    /// Cancel every timer of a scope. Cycles already in flight finish but
    /// their results are discarded.
    pub async fn unload_scope(&self, ctx: &ScopeContext) {
        let Some(handle) = self.scopes.write().await.remove(&ctx.map_id) else {
            return;
        };

        // Timer tasks observe the flag and exit on their own.
        let _ = handle.cancel_tx.send(true);

        let mut registry = self.shared.devices.write().await;
        for uuid in &handle.device_uuids {
            registry.remove(uuid);
        }
        drop(registry);

        info!(
            map_id = ctx.map_id,
            timers = handle.timer_tasks.len(),
            caller = ctx.caller.as_deref().unwrap_or("-"),
            "scope unloaded"
        );
    }

    /// Run exactly one probe cycle for one device and return its outcome.
    /// Unreachability is a valid state, not an error; this only fails when
    /// the device does not exist or the store is broken.
    pub async fn check_one(&self, device_uuid: Uuid) -> Result<CheckSummary> {
        let registered = self.shared.devices.read().await.get(&device_uuid).cloned();
        let device = match registered {
            Some(cell) => cell.read().await.clone(),
            None => self
                .shared
                .store
                .get_device(device_uuid)
                .await?
                .ok_or_else(|| anyhow!("unknown device {device_uuid}"))?,
        };

        let outcome = self.scheduler.check_device(&device, PacketBudget::Manual).await;
        apply_outcome(&self.shared, &outcome).await?;

        Ok(CheckSummary {
            state: outcome.new_status,
            detail: outcome.detail,
            metrics: outcome.metrics,
        })
    }

    /// Probe every eligible device of a map concurrently. Returns only the
    /// devices whose state changed, for efficient UI diffing.
    pub async fn check_all(&self, ctx: &ScopeContext) -> Result<Vec<BulkOutcome>> {
        let devices = self.shared.store.get_map_devices(ctx.map_id).await?;
        let outcomes = self.scheduler.check_map(devices).await;

        let mut changed = Vec::new();
        for outcome in &outcomes {
            apply_outcome(&self.shared, outcome).await?;
            if outcome.decision.changed {
                changed.push(BulkOutcome {
                    device_uuid: outcome.device.uuid,
                    previous_status: outcome.previous_status,
                    new_status: outcome.new_status,
                    metrics: outcome.metrics,
                });
            }
        }

        info!(
            map_id = ctx.map_id,
            probed = outcomes.len(),
            changed = changed.len(),
            caller = ctx.caller.as_deref().unwrap_or("-"),
            "bulk check finished"
        );

        Ok(changed)
    }
}

/// Persist one cycle outcome and fan out its consequences: history row,
/// status write-back, transition record, notification.
async fn apply_outcome(shared: &EngineShared, outcome: &CycleOutcome) -> Result<()> {
    let uuid = outcome.device.uuid;

    if let Some(result) = &outcome.probe_result {
        shared.store.save_probe_result(uuid, result).await?;
    }

    // A degraded-but-responding device still counts as seen; an unprobed
    // one does not.
    let seen = outcome.probe_result.is_some() && outcome.new_status != HealthState::Offline;
    let last_seen = if seen { Some(outcome.timestamp) } else { outcome.device.last_seen };
    let (last_latency_ms, last_ttl) = if seen {
        (Some(outcome.metrics.avg_ms), outcome.metrics.ttl)
    } else {
        (outcome.device.last_latency_ms, outcome.device.last_ttl)
    };

    shared
        .store
        .update_device_status(uuid, outcome.new_status, last_seen, last_latency_ms, last_ttl)
        .await?;

    if let Some(cell) = shared.devices.read().await.get(&uuid).cloned() {
        let mut live = cell.write().await;
        live.current_status = outcome.new_status;
        live.last_seen = last_seen;
        live.last_latency_ms = last_latency_ms;
        live.last_ttl = last_ttl;
    }

    if outcome.decision.changed {
        let transition = StatusTransition {
            device_uuid: uuid,
            previous_status: outcome.previous_status,
            new_status: outcome.new_status,
            detail: outcome.detail.clone(),
            timestamp: outcome.timestamp,
        };
        shared.store.append_transition(&transition).await?;
        info!(
            device = %outcome.device.name,
            previous = %outcome.previous_status,
            new = %outcome.new_status,
            at = %rfc3339(outcome.timestamp),
            detail = %outcome.detail,
            "status transition"
        );
    }

    if outcome.decision.should_notify {
        let notified = shared
            .notifier
            .notify(&outcome.device, outcome.previous_status, outcome.new_status, &outcome.detail)
            .await;
        if let Err(err) = notified {
            warn!(device = %outcome.device.name, error = %err, "notification delivery failed");
        }
    }

    Ok(())
}

fn rfc3339(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339()
}
