//! Persistence layer
//!
//! LibSQL behind a connection pool. The engine writes probe history,
//! per-device status and the append-only transition log; the CRUD API
//! surface (out of scope here) reads the same tables.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{HealthStore, HealthStoreImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
