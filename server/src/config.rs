use anyhow::{Context, Result, bail};
use std::str::FromStr;
use std::time::Duration;

/// Postgres connection settings. Absent entirely when running on the in-memory store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: String,
    pub user: String,
    pub pass: String,
    pub name: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.pass, self.host, self.port, self.name
        )
    }
}

/// Runtime configuration for a leaderboard server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP + WebSocket listen address (e.g., "0.0.0.0:3000")
    pub http_addr: String,
    pub database: Option<DatabaseConfig>,
    /// Enables cross-instance fan-out when set (e.g., "redis://127.0.0.1:6379")
    pub redis_url: Option<String>,
    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,
    pub default_top_k: usize,
    /// Upper bound on any single store call
    pub store_timeout: Duration,
    /// Full cache clear cadence; `None` disables the sweep
    pub cache_sweep_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:3000".to_string(),
            database: None,
            redis_url: None,
            cors_origins: Vec::new(),
            default_top_k: common::DEFAULT_TOP_K,
            store_timeout: Duration::from_millis(5000),
            cache_sweep_interval: Some(Duration::from_secs(300)),
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let http_addr = lookup("LEADERBOARD_HTTP_ADDR").unwrap_or(defaults.http_addr);

        let database = match lookup("LEADERBOARD_DB_HOST") {
            Some(host) => {
                let require = |key: &str| {
                    lookup(key).with_context(|| format!("{} must be set when LEADERBOARD_DB_HOST is set", key))
                };
                Some(DatabaseConfig {
                    host,
                    port: lookup("LEADERBOARD_DB_PORT").unwrap_or_else(|| "5432".to_string()),
                    user: require("LEADERBOARD_DB_USER")?,
                    pass: require("LEADERBOARD_DB_PASS")?,
                    name: require("LEADERBOARD_DB_NAME")?,
                    max_connections: parse_var(&lookup, "LEADERBOARD_DB_MAX_CONNECTIONS", 10)?,
                })
            }
            None => None,
        };

        let redis_url = lookup("LEADERBOARD_REDIS_URL").filter(|url| !url.trim().is_empty());

        let cors_origins = lookup("LEADERBOARD_CORS_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let default_top_k: usize = parse_var(&lookup, "LEADERBOARD_DEFAULT_TOP_K", defaults.default_top_k)?;
        if !(1..=common::MAX_LIMIT).contains(&default_top_k) {
            bail!(
                "LEADERBOARD_DEFAULT_TOP_K must be between 1 and {}, got {}",
                common::MAX_LIMIT,
                default_top_k
            );
        }

        let timeout_ms: u64 = parse_var(&lookup, "LEADERBOARD_STORE_TIMEOUT_MS", 5000)?;
        let sweep_secs: u64 = parse_var(&lookup, "LEADERBOARD_CACHE_SWEEP_SECS", 300)?;

        Ok(Self {
            http_addr,
            database,
            redis_url,
            cors_origins,
            default_top_k,
            store_timeout: Duration::from_millis(timeout_ms),
            cache_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
