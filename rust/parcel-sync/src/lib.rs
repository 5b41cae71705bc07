pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod poller;
pub mod reconciler;
pub mod schedule;
pub mod schema;
pub mod server;
pub mod source;
pub mod state;
pub mod store;
pub mod telemetry;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the ingestion service using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config).await?.run().await
}
