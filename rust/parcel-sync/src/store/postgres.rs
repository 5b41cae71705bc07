use super::{SensorStore, StoreError, StoreResult};
use crate::{
    db::{PgConnectionManager, PgPool},
    models::{
        GlobalReading, NewGlobalReading, NewSensorReading, Parcel, ParcelUpsert, ReadingView,
    },
    schema::{global_readings, parcels, sensor_readings},
};
use async_trait::async_trait;
use bb8::PooledConnection;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use tracing::error;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<PooledConnection<'_, PgConnectionManager>> {
        self.pool.get().await.map_err(|err| {
            error!(error = ?err, "failed to acquire database connection");
            StoreError::Pool(format!("{err:?}"))
        })
    }
}

#[async_trait]
impl SensorStore for PgStore {
    async fn insert_global_reading(&self, reading: &NewGlobalReading) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(global_readings::table)
            .values(reading)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn upsert_parcel(&self, parcel: &ParcelUpsert) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(parcels::table)
            .values(parcel)
            .on_conflict(parcels::id)
            .do_update()
            .set((
                parcels::name.eq(excluded(parcels::name)),
                parcels::location.eq(excluded(parcels::location)),
                parcels::responsible.eq(excluded(parcels::responsible)),
                parcels::crop_type.eq(excluded(parcels::crop_type)),
                parcels::last_irrigation.eq(excluded(parcels::last_irrigation)),
                parcels::latitude.eq(excluded(parcels::latitude)),
                parcels::longitude.eq(excluded(parcels::longitude)),
                parcels::active.eq(excluded(parcels::active)),
                parcels::updated_at.eq(excluded(parcels::updated_at)),
            ))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(sensor_readings::table)
            .values(reading)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn deactivate_missing(
        &self,
        present: &[i64],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut conn = self.conn().await?;
        let changes = (parcels::active.eq(false), parcels::updated_at.eq(at));

        let changed = if present.is_empty() {
            diesel::update(parcels::table.filter(parcels::active.eq(true)))
                .set(changes)
                .execute(&mut *conn)
                .await?
        } else {
            diesel::update(
                parcels::table
                    .filter(parcels::active.eq(true))
                    .filter(parcels::id.ne_all(present.to_vec())),
            )
            .set(changes)
            .execute(&mut *conn)
            .await?
        };

        Ok(changed)
    }

    async fn recent_readings(&self, limit: i64) -> StoreResult<Vec<ReadingView>> {
        let mut conn = self.conn().await?;
        let rows = sensor_readings::table
            .left_join(parcels::table)
            .select((
                sensor_readings::id,
                sensor_readings::parcel_id,
                sensor_readings::humidity,
                sensor_readings::temperature,
                sensor_readings::rainfall,
                sensor_readings::sun_intensity,
                sensor_readings::captured_at,
                parcels::name.nullable(),
                parcels::location.nullable(),
                parcels::responsible.nullable(),
                parcels::crop_type.nullable(),
                parcels::active.nullable(),
                parcels::latitude.nullable(),
                parcels::longitude.nullable(),
            ))
            .order((
                sensor_readings::captured_at.desc(),
                sensor_readings::id.desc(),
            ))
            .limit(limit)
            .load::<ReadingView>(&mut *conn)
            .await?;
        Ok(rows)
    }

    async fn latest_global_reading(&self) -> StoreResult<Option<GlobalReading>> {
        let mut conn = self.conn().await?;
        let row = global_readings::table
            .select(GlobalReading::as_select())
            .order((
                global_readings::captured_at.desc(),
                global_readings::id.desc(),
            ))
            .first(&mut *conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn inactive_parcels(&self) -> StoreResult<Vec<Parcel>> {
        let mut conn = self.conn().await?;
        let rows = parcels::table
            .filter(parcels::active.eq(false))
            .select(Parcel::as_select())
            .order(parcels::id.asc())
            .load(&mut *conn)
            .await?;
        Ok(rows)
    }

    async fn parcels(&self) -> StoreResult<Vec<Parcel>> {
        let mut conn = self.conn().await?;
        let rows = parcels::table
            .select(Parcel::as_select())
            .order(parcels::id.asc())
            .load(&mut *conn)
            .await?;
        Ok(rows)
    }
}
