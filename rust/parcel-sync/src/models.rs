//! Snapshot wire format and the rows it is mirrored into.

use crate::error::IngestError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// One payload from the external sensor endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    #[serde(default, rename = "sensores")]
    pub global: Option<SensorBlock>,
    #[serde(rename = "parcelas")]
    pub parcels: Vec<ParcelPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SensorBlock {
    #[serde(rename = "humedad")]
    pub humidity: f64,
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "lluvia")]
    pub rainfall: f64,
    #[serde(rename = "sol")]
    pub sun_intensity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParcelPayload {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default, rename = "ubicacion")]
    pub location: Option<String>,
    #[serde(default, rename = "responsable")]
    pub responsible: Option<String>,
    #[serde(default, rename = "tipo_cultivo")]
    pub crop_type: Option<String>,
    #[serde(default, rename = "ultimo_riego")]
    pub last_irrigation: Option<String>,
    #[serde(rename = "latitud")]
    pub latitude: f64,
    #[serde(rename = "longitud")]
    pub longitude: f64,
    #[serde(default)]
    pub sensor: Option<SensorBlock>,
}

impl Snapshot {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IngestError> {
        serde_json::from_slice(bytes).map_err(|err| IngestError::Shape(err.to_string()))
    }

    /// Validates the snapshot and turns it into the rows one cycle writes.
    ///
    /// Nothing is written before this succeeds, so a shape error never leaves
    /// a half-applied snapshot behind.
    pub fn into_batch(self, captured_at: DateTime<Utc>) -> Result<SnapshotBatch, IngestError> {
        let global = self.global.map(|block| NewGlobalReading {
            humidity: block.humidity,
            temperature: block.temperature,
            rainfall: block.rainfall,
            sun_intensity: block.sun_intensity,
            captured_at,
        });

        let parcels = self
            .parcels
            .into_iter()
            .map(|payload| payload.into_entry(captured_at))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SnapshotBatch { global, parcels })
    }
}

impl ParcelPayload {
    fn into_entry(self, captured_at: DateTime<Utc>) -> Result<ParcelEntry, IngestError> {
        let last_irrigation = match self.last_irrigation.as_deref() {
            Some(raw) => parse_timestamp(raw).map_err(|reason| {
                IngestError::Shape(format!("parcel {}: ultimo_riego {reason}", self.id))
            })?,
            None => None,
        };

        let reading = self.sensor.map(|block| NewSensorReading {
            parcel_id: self.id,
            humidity: block.humidity,
            temperature: block.temperature,
            rainfall: block.rainfall,
            sun_intensity: block.sun_intensity,
            captured_at,
        });

        Ok(ParcelEntry {
            parcel: ParcelUpsert {
                id: self.id,
                name: self.name,
                location: self.location.unwrap_or_default(),
                responsible: self.responsible.unwrap_or_default(),
                crop_type: self.crop_type.unwrap_or_default(),
                last_irrigation,
                latitude: self.latitude,
                longitude: self.longitude,
                active: true,
                updated_at: captured_at,
            },
            reading,
        })
    }
}

/// Accepts RFC 3339 plus the naive layouts the feed has been seen to use.
/// Naive values are read as UTC; blank strings count as absent.
pub fn parse_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Some(parsed.and_utc()));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Some(midnight.and_utc()));
        }
    }

    Err(format!("has unsupported timestamp '{value}'"))
}

/// Validated writes for one cycle, in snapshot order.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotBatch {
    pub global: Option<NewGlobalReading>,
    pub parcels: Vec<ParcelEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParcelEntry {
    pub parcel: ParcelUpsert,
    pub reading: Option<NewSensorReading>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::parcels)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Parcel {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "ubicacion")]
    pub location: String,
    #[serde(rename = "responsable")]
    pub responsible: String,
    #[serde(rename = "tipo_cultivo")]
    pub crop_type: String,
    #[serde(rename = "ultimo_riego")]
    pub last_irrigation: Option<DateTime<Utc>>,
    #[serde(rename = "latitud")]
    pub latitude: f64,
    #[serde(rename = "longitud")]
    pub longitude: f64,
    #[serde(rename = "estado")]
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::parcels)]
pub struct ParcelUpsert {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub responsible: String,
    pub crop_type: String,
    pub last_irrigation: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&ParcelUpsert> for Parcel {
    fn from(upsert: &ParcelUpsert) -> Self {
        Self {
            id: upsert.id,
            name: upsert.name.clone(),
            location: upsert.location.clone(),
            responsible: upsert.responsible.clone(),
            crop_type: upsert.crop_type.clone(),
            last_irrigation: upsert.last_irrigation,
            latitude: upsert.latitude,
            longitude: upsert.longitude,
            active: upsert.active,
            updated_at: upsert.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::global_readings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GlobalReading {
    pub id: i64,
    #[serde(rename = "humedad")]
    pub humidity: f64,
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "lluvia")]
    pub rainfall: f64,
    #[serde(rename = "sol")]
    pub sun_intensity: f64,
    #[serde(rename = "created_at")]
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::global_readings)]
pub struct NewGlobalReading {
    pub humidity: f64,
    pub temperature: f64,
    pub rainfall: f64,
    pub sun_intensity: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::sensor_readings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SensorReading {
    pub id: i64,
    #[serde(rename = "parcela_id")]
    pub parcel_id: i64,
    #[serde(rename = "humedad")]
    pub humidity: f64,
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "lluvia")]
    pub rainfall: f64,
    #[serde(rename = "sol")]
    pub sun_intensity: f64,
    #[serde(rename = "created_at")]
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::sensor_readings)]
pub struct NewSensorReading {
    pub parcel_id: i64,
    pub humidity: f64,
    pub temperature: f64,
    pub rainfall: f64,
    pub sun_intensity: f64,
    pub captured_at: DateTime<Utc>,
}

/// A sensor reading joined with the descriptive fields of its parcel.
///
/// Field order matches the select list in the PostgreSQL store. JSON keys
/// are the column names the dashboard reads.
#[derive(Debug, Clone, PartialEq, Queryable, Serialize)]
pub struct ReadingView {
    pub id: i64,
    #[serde(rename = "parcela_id")]
    pub parcel_id: i64,
    #[serde(rename = "humedad")]
    pub humidity: f64,
    #[serde(rename = "temperatura")]
    pub temperature: f64,
    #[serde(rename = "lluvia")]
    pub rainfall: f64,
    #[serde(rename = "sol")]
    pub sun_intensity: f64,
    #[serde(rename = "created_at")]
    pub captured_at: DateTime<Utc>,
    #[serde(rename = "parcela_nombre")]
    pub parcel_name: Option<String>,
    #[serde(rename = "ubicacion")]
    pub location: Option<String>,
    #[serde(rename = "responsable")]
    pub responsible: Option<String>,
    #[serde(rename = "tipo_cultivo")]
    pub crop_type: Option<String>,
    #[serde(rename = "estado")]
    pub active: Option<bool>,
    #[serde(rename = "latitud")]
    pub latitude: Option<f64>,
    #[serde(rename = "longitud")]
    pub longitude: Option<f64>,
}

impl ReadingView {
    pub fn new(reading: &SensorReading, parcel: Option<&Parcel>) -> Self {
        Self {
            id: reading.id,
            parcel_id: reading.parcel_id,
            humidity: reading.humidity,
            temperature: reading.temperature,
            rainfall: reading.rainfall,
            sun_intensity: reading.sun_intensity,
            captured_at: reading.captured_at,
            parcel_name: parcel.map(|p| p.name.clone()),
            location: parcel.map(|p| p.location.clone()),
            responsible: parcel.map(|p| p.responsible.clone()),
            crop_type: parcel.map(|p| p.crop_type.clone()),
            active: parcel.map(|p| p.active),
            latitude: parcel.map(|p| p.latitude),
            longitude: parcel.map(|p| p.longitude),
        }
    }
}
