use anyhow::Result;
use async_trait::async_trait;
use libsql::{Row, params};
use std::time::SystemTime;
use uuid::Uuid;

use super::models::{Device, DeviceKind, from_unix_seconds, to_unix_seconds};
use crate::monitoring::types::{HealthState, ProbeResult, StatusTransition};
use crate::pool::StorePool;

/// Persistence consumed by the engine: device snapshots in, probe results,
/// status updates and transition history out.
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Get a device with its thresholds by UUID
    async fn get_device(&self, uuid: Uuid) -> Result<Option<Device>>;

    /// Get all devices belonging to one map
    async fn get_map_devices(&self, map_id: i64) -> Result<Vec<Device>>;

    /// Insert or update a device
    async fn save_device(&self, device: &Device) -> Result<i64>;

    /// Append one probe history row
    async fn save_probe_result(&self, device_uuid: Uuid, result: &ProbeResult) -> Result<i64>;

    /// Write back the engine-observed fields for a single device
    async fn update_device_status(
        &self,
        uuid: Uuid,
        status: HealthState,
        last_seen: Option<SystemTime>,
        last_latency_ms: Option<f64>,
        last_ttl: Option<u32>,
    ) -> Result<()>;

    /// Append a status transition; history rows are never updated
    async fn append_transition(&self, transition: &StatusTransition) -> Result<()>;

    /// Recent transitions for a device, newest first
    async fn get_transitions(&self, device_uuid: Uuid, limit: usize) -> Result<Vec<StatusTransition>>;

    /// Recent probe history rows for a device, newest first
    async fn get_recent_results(&self, device_uuid: Uuid, limit: usize) -> Result<Vec<ProbeResult>>;
}

/// LibSQL-backed store
pub struct HealthStoreImpl {
    pool: StorePool,
}

impl HealthStoreImpl {
    pub fn new(pool: StorePool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::StoreManager>> {
        Ok(self.pool.get().await?)
    }
}

const DEVICE_COLUMNS: &str = "id, uuid, map_id, name, kind, address, port, enabled, \
     probe_interval_seconds, warning_latency_ms, critical_latency_ms, warning_loss_pct, \
     critical_loss_pct, notifications_enabled, current_status, last_seen, last_latency_ms, \
     last_ttl, created_at, updated_at";

fn device_from_row(row: &Row) -> Result<Device> {
    let uuid_str: String = row.get(1)?;
    let kind: String = row.get(4)?;
    let status: String = row.get(14)?;
    let last_seen: Option<i64> = row.get(15)?;

    Ok(Device {
        id: Some(row.get(0)?),
        uuid: Uuid::parse_str(&uuid_str)?,
        map_id: row.get(2)?,
        name: row.get(3)?,
        kind: DeviceKind::parse(&kind),
        address: row.get(5)?,
        // Out-of-range values written by other tools read back as unset.
        port: row.get::<Option<i64>>(6)?.and_then(|p| u16::try_from(p).ok()),
        enabled: row.get::<i64>(7)? != 0,
        probe_interval_seconds: row.get::<i64>(8)? as u64,
        warning_latency_ms: row.get(9)?,
        critical_latency_ms: row.get(10)?,
        warning_loss_pct: row.get(11)?,
        critical_loss_pct: row.get(12)?,
        notifications_enabled: row.get::<i64>(13)? != 0,
        current_status: HealthState::parse(&status),
        last_seen: last_seen.map(from_unix_seconds),
        last_latency_ms: row.get(16)?,
        last_ttl: row.get::<Option<i64>>(17)?.and_then(|t| u32::try_from(t).ok()),
        created_at: from_unix_seconds(row.get(18)?),
        updated_at: from_unix_seconds(row.get(19)?),
    })
}

#[async_trait]
impl HealthStore for HealthStoreImpl {
    async fn get_device(&self, uuid: Uuid) -> Result<Option<Device>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE uuid = ?"))
            .await?;

        let mut rows = stmt.query(params![uuid.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(device_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_map_devices(&self, map_id: i64) -> Result<Vec<Device>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE map_id = ?"))
            .await?;

        let mut rows = stmt.query(params![map_id]).await?;
        let mut devices = Vec::new();

        while let Some(row) = rows.next().await? {
            devices.push(device_from_row(&row)?);
        }

        Ok(devices)
    }

    async fn save_device(&self, device: &Device) -> Result<i64> {
        let conn = self.get_conn().await?;
        let created_at = to_unix_seconds(device.created_at);
        let updated_at = to_unix_seconds(device.updated_at);

        if let Some(id) = device.id {
            conn.execute(
                "UPDATE devices SET map_id = ?, name = ?, kind = ?, address = ?, port = ?, \
                 enabled = ?, probe_interval_seconds = ?, warning_latency_ms = ?, \
                 critical_latency_ms = ?, warning_loss_pct = ?, critical_loss_pct = ?, \
                 notifications_enabled = ?, updated_at = ? WHERE id = ?",
                params![
                    device.map_id,
                    device.name.clone(),
                    device.kind.as_str(),
                    device.address.clone(),
                    device.port.map(|p| p as i64),
                    if device.enabled { 1 } else { 0 },
                    device.probe_interval_seconds as i64,
                    device.warning_latency_ms,
                    device.critical_latency_ms,
                    device.warning_loss_pct,
                    device.critical_loss_pct,
                    if device.notifications_enabled { 1 } else { 0 },
                    updated_at,
                    id
                ],
            )
            .await?;
            Ok(id)
        } else {
            conn.execute(
                "INSERT INTO devices (uuid, map_id, name, kind, address, port, enabled, \
                 probe_interval_seconds, warning_latency_ms, critical_latency_ms, \
                 warning_loss_pct, critical_loss_pct, notifications_enabled, current_status, \
                 last_seen, last_latency_ms, last_ttl, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    device.uuid.to_string(),
                    device.map_id,
                    device.name.clone(),
                    device.kind.as_str(),
                    device.address.clone(),
                    device.port.map(|p| p as i64),
                    if device.enabled { 1 } else { 0 },
                    device.probe_interval_seconds as i64,
                    device.warning_latency_ms,
                    device.critical_latency_ms,
                    device.warning_loss_pct,
                    device.critical_loss_pct,
                    if device.notifications_enabled { 1 } else { 0 },
                    device.current_status.as_str(),
                    device.last_seen.map(to_unix_seconds),
                    device.last_latency_ms,
                    device.last_ttl.map(|t| t as i64),
                    created_at,
                    updated_at
                ],
            )
            .await?;
            Ok(conn.last_insert_rowid())
        }
    }

    async fn save_probe_result(&self, device_uuid: Uuid, result: &ProbeResult) -> Result<i64> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO probe_results (device_uuid, host, packet_loss, avg_time, min_time, \
             max_time, ttl, success, raw_output, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                device_uuid.to_string(),
                result.host.clone(),
                result.packet_loss,
                result.avg_time,
                result.min_time,
                result.max_time,
                result.ttl.map(|t| t as i64),
                if result.success { 1 } else { 0 },
                result.raw_output.clone(),
                to_unix_seconds(result.timestamp)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn update_device_status(
        &self,
        uuid: Uuid,
        status: HealthState,
        last_seen: Option<SystemTime>,
        last_latency_ms: Option<f64>,
        last_ttl: Option<u32>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = to_unix_seconds(SystemTime::now());

        conn.execute(
            "UPDATE devices SET current_status = ?, last_seen = ?, last_latency_ms = ?, \
             last_ttl = ?, updated_at = ? WHERE uuid = ?",
            params![
                status.as_str(),
                last_seen.map(to_unix_seconds),
                last_latency_ms,
                last_ttl.map(|t| t as i64),
                now,
                uuid.to_string()
            ],
        )
        .await?;

        Ok(())
    }

    async fn append_transition(&self, transition: &StatusTransition) -> Result<()> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO status_transitions (device_uuid, previous_status, new_status, detail, \
             timestamp) VALUES (?, ?, ?, ?, ?)",
            params![
                transition.device_uuid.to_string(),
                transition.previous_status.as_str(),
                transition.new_status.as_str(),
                transition.detail.clone(),
                to_unix_seconds(transition.timestamp)
            ],
        )
        .await?;

        Ok(())
    }

    async fn get_transitions(
        &self,
        device_uuid: Uuid,
        limit: usize,
    ) -> Result<Vec<StatusTransition>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT device_uuid, previous_status, new_status, detail, timestamp \
                 FROM status_transitions WHERE device_uuid = ? \
                 ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .await?;

        let mut rows = stmt.query(params![device_uuid.to_string(), limit as i64]).await?;
        let mut transitions = Vec::new();

        while let Some(row) = rows.next().await? {
            let uuid_str: String = row.get(0)?;
            let previous: String = row.get(1)?;
            let new: String = row.get(2)?;

            transitions.push(StatusTransition {
                device_uuid: Uuid::parse_str(&uuid_str)?,
                previous_status: HealthState::parse(&previous),
                new_status: HealthState::parse(&new),
                detail: row.get(3)?,
                timestamp: from_unix_seconds(row.get(4)?),
            });
        }

        Ok(transitions)
    }

    async fn get_recent_results(&self, device_uuid: Uuid, limit: usize) -> Result<Vec<ProbeResult>> {
        let conn = self.get_conn().await?;
        let mut stmt = conn
            .prepare(
                "SELECT host, packet_loss, avg_time, min_time, max_time, ttl, success, \
                 raw_output, timestamp FROM probe_results WHERE device_uuid = ? \
                 ORDER BY timestamp DESC, id DESC LIMIT ?",
            )
            .await?;

        let mut rows = stmt.query(params![device_uuid.to_string(), limit as i64]).await?;
        let mut results = Vec::new();

        while let Some(row) = rows.next().await? {
            results.push(ProbeResult {
                host: row.get(0)?,
                packet_loss: row.get(1)?,
                avg_time: row.get(2)?,
                min_time: row.get(3)?,
                max_time: row.get(4)?,
                ttl: row.get::<Option<i64>>(5)?.and_then(|t| u32::try_from(t).ok()),
                success: row.get::<i64>(6)? != 0,
                raw_output: row.get(7)?,
                timestamp: from_unix_seconds(row.get(8)?),
            });
        }

        Ok(results)
    }
}
