use super::{SensorStore, StoreError, StoreResult};
use crate::models::{
    GlobalReading, NewGlobalReading, NewSensorReading, Parcel, ParcelUpsert, ReadingView,
    SensorReading,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// Keeps everything in process memory. Mirrors the constraints of the
/// PostgreSQL schema that the reconciler depends on, notably the foreign key
/// from readings to parcels.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    parcels: BTreeMap<i64, Parcel>,
    global_readings: Vec<GlobalReading>,
    sensor_readings: Vec<SensorReading>,
    next_global_id: i64,
    next_reading_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored sensor reading in insertion order.
    pub fn sensor_readings(&self) -> Vec<SensorReading> {
        self.inner.lock().sensor_readings.clone()
    }

    /// Every stored global reading in insertion order.
    pub fn global_readings(&self) -> Vec<GlobalReading> {
        self.inner.lock().global_readings.clone()
    }
}

#[async_trait]
impl SensorStore for MemoryStore {
    async fn insert_global_reading(&self, reading: &NewGlobalReading) -> StoreResult<()> {
        let mut tables = self.inner.lock();
        tables.next_global_id += 1;
        let id = tables.next_global_id;
        tables.global_readings.push(GlobalReading {
            id,
            humidity: reading.humidity,
            temperature: reading.temperature,
            rainfall: reading.rainfall,
            sun_intensity: reading.sun_intensity,
            captured_at: reading.captured_at,
        });
        Ok(())
    }

    async fn upsert_parcel(&self, parcel: &ParcelUpsert) -> StoreResult<()> {
        self.inner
            .lock()
            .parcels
            .insert(parcel.id, Parcel::from(parcel));
        Ok(())
    }

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> StoreResult<()> {
        let mut tables = self.inner.lock();
        if !tables.parcels.contains_key(&reading.parcel_id) {
            return Err(StoreError::Backend(format!(
                "sensor reading references unknown parcel {}",
                reading.parcel_id
            )));
        }

        tables.next_reading_id += 1;
        let id = tables.next_reading_id;
        tables.sensor_readings.push(SensorReading {
            id,
            parcel_id: reading.parcel_id,
            humidity: reading.humidity,
            temperature: reading.temperature,
            rainfall: reading.rainfall,
            sun_intensity: reading.sun_intensity,
            captured_at: reading.captured_at,
        });
        Ok(())
    }

    async fn deactivate_missing(
        &self,
        present: &[i64],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let present: HashSet<i64> = present.iter().copied().collect();
        let mut tables = self.inner.lock();
        let mut changed = 0;
        for parcel in tables.parcels.values_mut() {
            if parcel.active && !present.contains(&parcel.id) {
                parcel.active = false;
                parcel.updated_at = at;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn recent_readings(&self, limit: i64) -> StoreResult<Vec<ReadingView>> {
        let tables = self.inner.lock();
        let mut readings: Vec<&SensorReading> = tables.sensor_readings.iter().collect();
        readings.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(readings
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|reading| ReadingView::new(reading, tables.parcels.get(&reading.parcel_id)))
            .collect())
    }

    async fn latest_global_reading(&self) -> StoreResult<Option<GlobalReading>> {
        let tables = self.inner.lock();
        Ok(tables
            .global_readings
            .iter()
            .max_by(|a, b| {
                a.captured_at
                    .cmp(&b.captured_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned())
    }

    async fn inactive_parcels(&self) -> StoreResult<Vec<Parcel>> {
        let tables = self.inner.lock();
        Ok(tables
            .parcels
            .values()
            .filter(|parcel| !parcel.active)
            .cloned()
            .collect())
    }

    async fn parcels(&self) -> StoreResult<Vec<Parcel>> {
        Ok(self.inner.lock().parcels.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn upsert(id: i64, name: &str, at: DateTime<Utc>) -> ParcelUpsert {
        ParcelUpsert {
            id,
            name: name.to_string(),
            location: String::new(),
            responsible: String::new(),
            crop_type: "beans".to_string(),
            last_irrigation: None,
            latitude: 1.0,
            longitude: 2.0,
            active: true,
            updated_at: at,
        }
    }

    fn reading(parcel_id: i64, humidity: f64, at: DateTime<Utc>) -> NewSensorReading {
        NewSensorReading {
            parcel_id,
            humidity,
            temperature: 20.0,
            rainfall: 0.0,
            sun_intensity: 50.0,
            captured_at: at,
        }
    }

    #[tokio::test]
    async fn rejects_readings_for_unknown_parcels() {
        let store = MemoryStore::new();
        let err = store
            .insert_sensor_reading(&reading(42, 10.0, Utc::now()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown parcel 42"));
        assert!(store.sensor_readings().is_empty());
    }

    #[tokio::test]
    async fn deactivation_only_counts_transitions() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for id in 1..=3 {
            store.upsert_parcel(&upsert(id, "p", now)).await.unwrap();
        }

        assert_eq!(store.deactivate_missing(&[2], now).await.unwrap(), 2);
        assert_eq!(store.deactivate_missing(&[2], now).await.unwrap(), 0);
        assert_eq!(store.deactivate_missing(&[], now).await.unwrap(), 1);

        let inactive: Vec<i64> = store
            .inactive_parcels()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(inactive, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn recent_readings_are_newest_first_and_joined() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.upsert_parcel(&upsert(1, "North", now)).await.unwrap();
        store
            .insert_sensor_reading(&reading(1, 10.0, now - TimeDelta::minutes(5)))
            .await
            .unwrap();
        store
            .insert_sensor_reading(&reading(1, 20.0, now))
            .await
            .unwrap();

        let views = store.recent_readings(10).await.unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].humidity, 20.0);
        assert_eq!(views[0].parcel_name.as_deref(), Some("North"));
        assert_eq!(views[0].active, Some(true));

        let limited = store.recent_readings(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].humidity, 20.0);
    }
}
