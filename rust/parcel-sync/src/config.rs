use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
    time::Duration,
};
use tokio_postgres::Config as PgConfig;

pub const DEFAULT_EXTERNAL_API_URL: &str = "https://moriahmkt.com/iotapp/test/";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub external_api_url: String,
    pub update_interval: Duration,
    pub fetch_timeout: Duration,
    pub store: StoreBackend,
    pub database: Option<DatabaseConfig>,
    pub allowed_origins: Option<Vec<String>>,
    pub default_limit: i64,
    pub max_limit: i64,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub connection: PgConfig,
    pub max_pool_size: u32,
    pub apply_schema: bool,
    pub ssl_root_cert: Option<String>,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown STORE_BACKEND '{other}' (expected postgres or memory)"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    listen_addr: Option<String>,
    #[serde(default)]
    listen_host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default = "default_external_api_url")]
    external_api_url: String,
    #[serde(default = "default_interval_minutes")]
    update_interval_minutes: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    fetch_timeout_secs: u64,
    #[serde(default)]
    store_backend: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    db_host: Option<String>,
    #[serde(default)]
    db_port: Option<u16>,
    #[serde(default)]
    db_user: Option<String>,
    #[serde(default)]
    db_password: Option<String>,
    #[serde(default)]
    db_name: Option<String>,
    #[serde(default = "default_pool_size")]
    db_max_pool_size: u32,
    #[serde(default = "default_apply_schema")]
    db_apply_schema: bool,
    #[serde(default)]
    pgsslrootcert: Option<String>,
    #[serde(default)]
    pgsslcert: Option<String>,
    #[serde(default)]
    pgsslkey: Option<String>,
    #[serde(default)]
    allowed_origins: Option<String>,
    #[serde(default = "default_limit")]
    default_limit: i64,
    #[serde(default = "default_max_limit")]
    max_limit: i64,
}

fn default_external_api_url() -> String {
    DEFAULT_EXTERNAL_API_URL.to_string()
}

const fn default_interval_minutes() -> u64 {
    5
}

const fn default_fetch_timeout_secs() -> u64 {
    15
}

const fn default_pool_size() -> u32 {
    10
}

const fn default_apply_schema() -> bool {
    true
}

const fn default_limit() -> i64 {
    50
}

const fn default_max_limit() -> i64 {
    500
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig = envy::from_env().context("failed to parse environment variables")?;
        Self::from_raw(raw)
    }

    /// Same as [`AppConfig::from_env`] but reads from the given pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawConfig =
            envy::from_iter(vars).context("failed to parse configuration variables")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let listen_addr = resolve_addr(raw.listen_addr, raw.listen_host, raw.port)?;
        let store = raw
            .store_backend
            .as_deref()
            .map(StoreBackend::from_str)
            .transpose()?
            .unwrap_or(StoreBackend::Postgres);

        let connection = resolve_connection(
            raw.database_url,
            raw.db_host,
            raw.db_port,
            raw.db_user,
            raw.db_password,
            raw.db_name,
        )?;
        if store == StoreBackend::Postgres && connection.is_none() {
            anyhow::bail!("DATABASE_URL or DB_HOST and DB_NAME must be set for the postgres store");
        }
        let database = connection.map(|connection| DatabaseConfig {
            connection,
            max_pool_size: raw.db_max_pool_size.max(1),
            apply_schema: raw.db_apply_schema,
            ssl_root_cert: raw.pgsslrootcert,
            ssl_cert: raw.pgsslcert,
            ssl_key: raw.pgsslkey,
        });

        let external_api_url = raw.external_api_url.trim().to_string();
        if external_api_url.is_empty() {
            anyhow::bail!("EXTERNAL_API_URL must not be empty");
        }

        let default_limit = raw.default_limit.max(1);
        Ok(Self {
            listen_addr,
            external_api_url,
            update_interval: Duration::from_secs(raw.update_interval_minutes.max(1) * 60),
            fetch_timeout: Duration::from_secs(raw.fetch_timeout_secs.max(1)),
            store,
            database,
            allowed_origins: raw.allowed_origins.and_then(|csv| split_csv(&csv)),
            default_limit,
            max_limit: raw.max_limit.max(default_limit),
        })
    }
}

fn split_csv(csv: &str) -> Option<Vec<String>> {
    let entries: Vec<String> = csv
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect();
    if entries.is_empty() {
        None
    } else {
        Some(entries)
    }
}

fn resolve_connection(
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    dbname: Option<String>,
) -> Result<Option<PgConfig>> {
    if let Some(url) = url.filter(|value| !value.trim().is_empty()) {
        let config = url.parse::<PgConfig>().context("invalid DATABASE_URL")?;
        return Ok(Some(config));
    }

    let (Some(host), Some(dbname)) = (host, dbname) else {
        return Ok(None);
    };

    let mut config = PgConfig::new();
    config.host(&host).port(port.unwrap_or(5432)).dbname(&dbname);
    if let Some(user) = user {
        config.user(&user);
    }
    if let Some(password) = password {
        config.password(password);
    }
    Ok(Some(config))
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid LISTEN_ADDR value")?
            .next()
            .context("LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(4000);
    format!("{host}:{port}")
        .to_socket_addrs()
        .context("invalid LISTEN_HOST/PORT combination")?
        .next()
        .context("listen address resolved to no targets")
}
