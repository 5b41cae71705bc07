//! Persistence seam between the reconciler, the read API and the database.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::{
    config::{AppConfig, StoreBackend},
    db,
    models::{
        GlobalReading, NewGlobalReading, NewSensorReading, Parcel, ParcelUpsert, ReadingView,
    },
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to acquire database connection: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("{0}")]
    Backend(String),
}

/// Every method is a single statement that commits on its own. Callers
/// that need several writes to land together must not rely on this trait.
#[async_trait]
pub trait SensorStore: Send + Sync {
    async fn insert_global_reading(&self, reading: &NewGlobalReading) -> StoreResult<()>;

    /// Inserts the parcel or overwrites every descriptive field of the
    /// stored row with the same id, including `active`.
    async fn upsert_parcel(&self, parcel: &ParcelUpsert) -> StoreResult<()>;

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> StoreResult<()>;

    /// Marks every active parcel whose id is not in `present` as inactive
    /// and returns how many rows changed. An empty `present` deactivates
    /// all parcels.
    async fn deactivate_missing(&self, present: &[i64], at: DateTime<Utc>)
        -> StoreResult<usize>;

    /// Newest readings first, joined with their parcel.
    async fn recent_readings(&self, limit: i64) -> StoreResult<Vec<ReadingView>>;

    async fn latest_global_reading(&self) -> StoreResult<Option<GlobalReading>>;

    async fn inactive_parcels(&self) -> StoreResult<Vec<Parcel>>;

    /// All parcels ordered by id.
    async fn parcels(&self) -> StoreResult<Vec<Parcel>>;
}

/// Builds the store selected by `STORE_BACKEND`.
pub async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn SensorStore>> {
    match config.store {
        StoreBackend::Memory => {
            warn!("using in-memory store; all data is lost when the process exits");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let database = config
                .database
                .as_ref()
                .context("postgres store selected but no database is configured")?;
            let pool = db::connect_pool(database).await?;
            if database.apply_schema {
                db::apply_schema(&pool).await?;
                info!("database schema is up to date");
            }
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}
