//! Environment-driven configuration for parley services.
//!
//! Every service reads its settings from the process environment; the CLI
//! loads a `.env` file first. Each settings struct has a `from_env`
//! constructor that applies defaults for everything except the values a
//! deployment must pin (`NODE_ID`, `DATABASE_URL`).

use std::{env, net::SocketAddr, str::FromStr};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required environment variable: {name}")]
    MissingVar { name: &'static str },

    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(name: &'static str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn require(name: &'static str) -> Result<String> {
    var(name).ok_or(Error::MissingVar { name })
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidVar { name, value })
}

fn parse_or<T: FromStr>(name: &'static str, default: &str) -> Result<T> {
    parse(name, var_or(name, default))
}

// ── Deployment environment ───────────────────────────────────────────────────

/// Deployment flavor, from `APP_ENV`. Anything other than `production` is
/// treated as development.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    #[must_use]
    pub fn from_env() -> Self {
        match var_or("APP_ENV", "development").to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

// ── Broker ───────────────────────────────────────────────────────────────────

/// RabbitMQ connection parameters plus the delivery exchange name.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub exchange: String,
}

impl BrokerSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: var_or("RABBIT_HOST", "localhost"),
            port: parse_or("RABBIT_PORT", "5672")?,
            username: var_or("RABBIT_USER", "guest"),
            password: var_or("RABBIT_PASS", "guest"),
            exchange: var_or("EXCHANGE_NAME", "chat-direct-exchange"),
        })
    }
}

// ── Redis ────────────────────────────────────────────────────────────────────

/// Redis endpoint shared by the presence registry and the hot window.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
}

impl RedisSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: var_or("REDIS_HOST", "localhost"),
            port: parse_or("REDIS_PORT", "6379")?,
        })
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

// ── Database ─────────────────────────────────────────────────────────────────

/// Ordered-store connection string. Required wherever the store is touched.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
}

impl DatabaseSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: require("DATABASE_URL")?,
        })
    }
}

// ── Chat node ────────────────────────────────────────────────────────────────

/// Settings for one chat node. `NODE_ID` must be unique across the cluster:
/// it names the node's delivery queue and routing key.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub node_id: String,
    pub bind: SocketAddr,
    pub presence_url: String,
    pub push_url: Option<String>,
}

impl NodeSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            node_id: require("NODE_ID")?,
            bind: parse_or("NODE_BIND", "0.0.0.0:8001")?,
            presence_url: trim_base(var_or("PRESENCE_SERVICE_URL", "http://localhost:8200")),
            push_url: var("PUSH_SERVICE_URL").map(trim_base),
        })
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

// ── Presence registry ────────────────────────────────────────────────────────

/// Settings for the presence registry service.
#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub bind: SocketAddr,
    pub redis: RedisSettings,
    /// Mark `online` records `offline` when `last_online` is older than this
    /// many seconds. `0` disables the sweep.
    pub stale_after_secs: u64,
}

impl PresenceSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind: parse_or("PRESENCE_BIND", "0.0.0.0:8200")?,
            redis: RedisSettings::from_env()?,
            stale_after_secs: parse_or("PRESENCE_STALE_SECS", "0")?,
        })
    }
}

// ── History / sync reader ────────────────────────────────────────────────────

/// Settings for the sync/history service.
#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub bind: SocketAddr,
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
}

impl HistorySettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind: parse_or("HISTORY_BIND", "0.0.0.0:8300")?,
            redis: RedisSettings::from_env()?,
            database: DatabaseSettings::from_env()?,
        })
    }
}

// ── Persistence worker ───────────────────────────────────────────────────────

/// Settings for the persistence worker.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub broker: BrokerSettings,
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
}

impl PersistenceSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            broker: BrokerSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            database: DatabaseSettings::from_env()?,
        })
    }
}
