use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use parcel_sync::{
    config::{AppConfig, StoreBackend},
    error::IngestError,
    models::{
        GlobalReading, NewGlobalReading, NewSensorReading, Parcel, ParcelUpsert, ReadingView,
        Snapshot,
    },
    source::SnapshotSource,
    store::{MemoryStore, SensorStore, StoreError, StoreResult},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::VecDeque, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Notify;
use tower::ServiceExt;

pub const INTERVAL: Duration = Duration::from_secs(300);

#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        external_api_url: "http://127.0.0.1:9/unused".to_string(),
        update_interval: INTERVAL,
        fetch_timeout: Duration::from_secs(2),
        store: StoreBackend::Memory,
        database: None,
        allowed_origins: None,
        default_limit: 50,
        max_limit: 500,
    }
}

/// Payload used throughout the tests: one global block and one parcel.
pub fn reference_snapshot() -> Value {
    serde_json::json!({
        "sensores": {"humedad": 40, "temperatura": 25, "lluvia": 0, "sol": 80},
        "parcelas": [{
            "id": 1, "nombre": "A", "tipo_cultivo": "maize",
            "latitud": 1.0, "longitud": 2.0,
            "sensor": {"humedad": 35, "temperatura": 24, "lluvia": 0, "sol": 75}
        }]
    })
}

pub fn parcel_json(id: i64, name: &str, humidity: f64) -> Value {
    serde_json::json!({
        "id": id,
        "nombre": name,
        "ubicacion": format!("field {id}"),
        "responsable": "Ana",
        "tipo_cultivo": "wheat",
        "ultimo_riego": "2025-03-01 10:30:00",
        "latitud": 20.5,
        "longitud": -100.25,
        "sensor": {"humedad": humidity, "temperatura": 22, "lluvia": 1.5, "sol": 60}
    })
}

/// Hands out prepared responses in order, one per fetch.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<VecDeque<Result<Value, IngestError>>>,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: Value) {
        self.responses.lock().push_back(Ok(payload));
    }

    pub fn push_error(&self, err: IngestError) {
        self.responses.lock().push_back(Err(err));
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self) -> Result<Snapshot, IngestError> {
        let next = self.responses.lock().pop_front();
        match next {
            Some(Ok(payload)) => {
                let bytes = serde_json::to_vec(&payload)
                    .map_err(|err| IngestError::Shape(err.to_string()))?;
                Snapshot::from_slice(&bytes)
            }
            Some(Err(err)) => Err(err),
            None => Err(IngestError::Transport("no scripted response left".into())),
        }
    }
}

/// Blocks inside `fetch` until released, to hold a cycle in flight.
#[allow(dead_code)]
pub struct GatedSource {
    pub entered: Notify,
    pub release: Notify,
    payload: Value,
}

#[allow(dead_code)]
impl GatedSource {
    pub fn new(payload: Value) -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
            payload,
        }
    }
}

#[async_trait]
impl SnapshotSource for GatedSource {
    async fn fetch(&self) -> Result<Snapshot, IngestError> {
        self.entered.notify_one();
        self.release.notified().await;
        let bytes = serde_json::to_vec(&self.payload)
            .map_err(|err| IngestError::Shape(err.to_string()))?;
        Snapshot::from_slice(&bytes)
    }
}

/// Delegates to a [`MemoryStore`] but fails selected operations.
#[allow(dead_code)]
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    fail_upsert_for: Option<i64>,
    fail_reads: bool,
}

#[allow(dead_code)]
impl FaultyStore {
    pub fn failing_upsert(inner: Arc<MemoryStore>, parcel_id: i64) -> Self {
        Self {
            inner,
            fail_upsert_for: Some(parcel_id),
            fail_reads: false,
        }
    }

    pub fn failing_reads(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_upsert_for: None,
            fail_reads: true,
        }
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads {
            Err(StoreError::Backend("read replica unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SensorStore for FaultyStore {
    async fn insert_global_reading(&self, reading: &NewGlobalReading) -> StoreResult<()> {
        self.inner.insert_global_reading(reading).await
    }

    async fn upsert_parcel(&self, parcel: &ParcelUpsert) -> StoreResult<()> {
        if self.fail_upsert_for == Some(parcel.id) {
            return Err(StoreError::Backend(format!("upsert of parcel {} rejected", parcel.id)));
        }
        self.inner.upsert_parcel(parcel).await
    }

    async fn insert_sensor_reading(&self, reading: &NewSensorReading) -> StoreResult<()> {
        self.inner.insert_sensor_reading(reading).await
    }

    async fn deactivate_missing(
        &self,
        present: &[i64],
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.inner.deactivate_missing(present, at).await
    }

    async fn recent_readings(&self, limit: i64) -> StoreResult<Vec<ReadingView>> {
        self.check_read()?;
        self.inner.recent_readings(limit).await
    }

    async fn latest_global_reading(&self) -> StoreResult<Option<GlobalReading>> {
        self.check_read()?;
        self.inner.latest_global_reading().await
    }

    async fn inactive_parcels(&self) -> StoreResult<Vec<Parcel>> {
        self.check_read()?;
        self.inner.inactive_parcels().await
    }

    async fn parcels(&self) -> StoreResult<Vec<Parcel>> {
        self.check_read()?;
        self.inner.parcels().await
    }
}

#[allow(dead_code)]
pub async fn get(router: &Router, path: &str) -> http::Response<Body> {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .expect("request should build");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

#[allow(dead_code)]
pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}
