mod support;

use axum::{http::StatusCode, routing::get, Json, Router};
use parcel_sync::{
    error::IngestError,
    reconciler::Reconciler,
    source::{HttpSnapshotSource, SnapshotSource},
    store::{MemoryStore, SensorStore},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use support::{parcel_json, reference_snapshot, INTERVAL};
use tokio::net::TcpListener;

/// Serves canned feed responses on an ephemeral local port.
async fn spawn_feed() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { Json(reference_snapshot()) }))
        .route(
            "/two",
            get(|| async {
                Json(serde_json::json!({
                    "parcelas": [parcel_json(10, "East", 41.0), parcel_json(11, "West", 42.0)]
                }))
            }),
        )
        .route(
            "/down",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        )
        .route("/html", get(|| async { "<html>not json</html>" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(reference_snapshot())
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn source_for(addr: SocketAddr, path: &str, timeout: Duration) -> HttpSnapshotSource {
    HttpSnapshotSource::new(format!("http://{addr}{path}"), timeout).unwrap()
}

#[tokio::test]
async fn fetches_and_decodes_snapshot() {
    let addr = spawn_feed().await;
    let snapshot = source_for(addr, "/ok", Duration::from_secs(5))
        .fetch()
        .await
        .unwrap();

    assert!(snapshot.global.is_some());
    assert_eq!(snapshot.parcels.len(), 1);
    assert_eq!(snapshot.parcels[0].name, "A");
}

#[tokio::test]
async fn non_success_status_is_transport_error() {
    let addr = spawn_feed().await;
    let err = source_for(addr, "/down", Duration::from_secs(5))
        .fetch()
        .await
        .unwrap_err();

    match err {
        IngestError::Transport(message) => assert!(message.contains("503"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_is_shape_error() {
    let addr = spawn_feed().await;
    let err = source_for(addr, "/html", Duration::from_secs(5))
        .fetch()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "shape");
}

#[tokio::test]
async fn slow_endpoint_times_out_as_transport_error() {
    let addr = spawn_feed().await;
    let err = source_for(addr, "/slow", Duration::from_millis(200))
        .fetch()
        .await
        .unwrap_err();

    match err {
        IngestError::Transport(message) => assert!(message.contains("timed out"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = source_for(addr, "/ok", Duration::from_secs(2))
        .fetch()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport");
}

#[tokio::test]
async fn full_cycle_over_http() {
    let addr = spawn_feed().await;
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(source_for(addr, "/two", Duration::from_secs(5)));
    let reconciler = Reconciler::new(source, store.clone(), INTERVAL);

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.parcels_upserted, 2);
    assert_eq!(report.readings_inserted, 2);
    assert!(!report.global_reading);

    let names: Vec<String> = store
        .parcels()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["East".to_string(), "West".to_string()]);
}
