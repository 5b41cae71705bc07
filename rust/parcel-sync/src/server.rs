use crate::{
    config::AppConfig,
    error::{Result, ServiceError},
    models::{GlobalReading, Parcel, ReadingView},
    poller,
    reconciler::Reconciler,
    schedule::RefreshStatus,
    source::{HttpSnapshotSource, SnapshotSource},
    state::AppState,
    store::{self, SensorStore},
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use http::{HeaderValue, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
    reconciler: Arc<Reconciler>,
}

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = store::connect(&config).await?;
        let source = HttpSnapshotSource::new(&config.external_api_url, config.fetch_timeout)?;
        info!(url = source.url(), "snapshot source configured");
        Ok(Self::with_parts(config, store, Arc::new(source)))
    }

    /// Wires the service from already-built collaborators.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn SensorStore>,
        source: Arc<dyn SnapshotSource>,
    ) -> Self {
        let config = Arc::new(config);
        let reconciler = Arc::new(Reconciler::new(
            source,
            Arc::clone(&store),
            config.update_interval,
        ));
        let state = AppState::new(Arc::clone(&config), store, reconciler.schedule());

        Self {
            config,
            state,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route("/api/sensors", get(Self::list_readings))
            .route("/api/sensors/latest", get(Self::latest_reading))
            .route("/api/sensors/global-latest", get(Self::global_latest))
            .route("/api/sensors/deleted", get(Self::inactive_parcels))
            .route("/api/sensors/next-update", get(Self::next_update))
            .with_state(self.state.clone())
            .layer(cors_layer(self.config.allowed_origins.as_deref()))
            .layer(TraceLayer::new_for_http())
    }

    /// Serves the read API and runs the poll loop until SIGINT or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "parcel-sync listening");

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let poll_handle = poller::spawn(self.reconciler(), async move {
            let _ = stop_rx.wait_for(|stopped| *stopped).await;
        });

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let _ = stop_tx.send(true);
        if let Err(err) = poll_handle.await {
            warn!(error = %err, "poll loop terminated abnormally");
        }
        Ok(())
    }

    async fn health() -> Json<Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn list_readings(
        State(state): State<AppState>,
        Query(params): Query<ListParams>,
    ) -> Result<Json<Vec<ReadingView>>> {
        let limit = params.resolve_limit(&state.config);
        let rows = state.store.recent_readings(limit).await?;
        Ok(Json(rows))
    }

    async fn latest_reading(State(state): State<AppState>) -> Result<Json<Value>> {
        let latest = state.store.recent_readings(1).await?.into_iter().next();
        let body = match latest {
            Some(view) => serde_json::to_value(view)
                .map_err(|err| ServiceError::Internal(err.into()))?,
            None => json!({}),
        };
        Ok(Json(body))
    }

    async fn global_latest(State(state): State<AppState>) -> Result<Json<GlobalLatest>> {
        let reading = state.store.latest_global_reading().await?;
        Ok(Json(GlobalLatest::new(reading, state.schedule.status())))
    }

    async fn inactive_parcels(State(state): State<AppState>) -> Result<Json<Vec<Parcel>>> {
        Ok(Json(state.store.inactive_parcels().await?))
    }

    async fn next_update(State(state): State<AppState>) -> Json<RefreshStatus> {
        Json(state.schedule.status())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<String>,
}

impl ListParams {
    /// Unparseable or non-positive limits fall back to the default.
    fn resolve_limit(&self, config: &AppConfig) -> i64 {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(config.default_limit)
            .min(config.max_limit)
    }
}

/// Latest global reading with the countdown attached. Zeros stand in for
/// the measurements, and `created_at` is omitted, until the first global
/// reading is stored.
#[derive(Debug, Serialize)]
struct GlobalLatest {
    #[serde(rename = "humedad")]
    humidity: f64,
    #[serde(rename = "temperatura")]
    temperature: f64,
    #[serde(rename = "lluvia")]
    rainfall: f64,
    #[serde(rename = "sol")]
    sun_intensity: f64,
    #[serde(rename = "created_at", skip_serializing_if = "Option::is_none")]
    captured_at: Option<DateTime<Utc>>,
    #[serde(rename = "nextUpdate", with = "chrono::serde::ts_milliseconds")]
    next_update: DateTime<Utc>,
    #[serde(rename = "timeRemaining")]
    time_remaining: u64,
}

impl GlobalLatest {
    fn new(reading: Option<GlobalReading>, status: RefreshStatus) -> Self {
        let (humidity, temperature, rainfall, sun_intensity, captured_at) = match reading {
            Some(r) => (
                r.humidity,
                r.temperature,
                r.rainfall,
                r.sun_intensity,
                Some(r.captured_at),
            ),
            None => (0.0, 0.0, 0.0, 0.0, None),
        };

        Self {
            humidity,
            temperature,
            rainfall,
            sun_intensity,
            captured_at,
            next_update: status.next_update,
            time_remaining: status.time_remaining,
        }
    }
}

fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    match origins {
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(%origin, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            layer.allow_origin(AllowOrigin::list(allowed))
        }
        None => layer.allow_origin(Any),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
