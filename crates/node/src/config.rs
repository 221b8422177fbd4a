//! Node configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use grains::RouterConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `GRAIN_WORKERS`: workers per router (default: available parallelism)
/// - `GRAIN_CHANNEL_CAPACITY`: queue length per worker (default: `256`)
/// - `METRICS_ADDR`: Prometheus listener (default: `"0.0.0.0:9000"`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: when set, grains are stored in PostgreSQL
/// - `SNAPSHOT_INTERVAL`: events between aggregate snapshots, 0 disables (default: `100`)
/// - `FEED_POLL_MS`: log poll interval in milliseconds (default: `250`)
/// - `SEED_ORDERS`: sample orders created at start-up (default: `0`)
#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub channel_capacity: usize,
    pub metrics_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub snapshot_interval: u64,
    pub poll_interval: Duration,
    pub seed_orders: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            workers: parse(lookup("GRAIN_WORKERS")).unwrap_or(defaults.workers),
            channel_capacity: parse(lookup("GRAIN_CHANNEL_CAPACITY"))
                .unwrap_or(defaults.channel_capacity),
            metrics_addr: lookup("METRICS_ADDR").unwrap_or(defaults.metrics_addr),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            snapshot_interval: parse(lookup("SNAPSHOT_INTERVAL"))
                .unwrap_or(defaults.snapshot_interval),
            poll_interval: parse(lookup("FEED_POLL_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            seed_orders: parse(lookup("SEED_ORDERS")).unwrap_or(defaults.seed_orders),
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::default()
            .with_workers(self.workers)
            .with_channel_capacity(self.channel_capacity)
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        let router = RouterConfig::default();
        Self {
            workers: router.workers,
            channel_capacity: router.channel_capacity,
            metrics_addr: "0.0.0.0:9000".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            snapshot_interval: 100,
            poll_interval: Duration::from_millis(250),
            seed_orders: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from(&[]);
        assert_eq!(config.channel_capacity, 256);
        assert_eq!(config.metrics_addr, "0.0.0.0:9000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.snapshot_interval, 100);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_overrides() {
        let config = from(&[
            ("GRAIN_WORKERS", "3"),
            ("GRAIN_CHANNEL_CAPACITY", "16"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/grains"),
            ("SNAPSHOT_INTERVAL", "0"),
            ("FEED_POLL_MS", "10"),
            ("SEED_ORDERS", "5"),
        ]);
        assert_eq!(config.router_config().workers, 3);
        assert_eq!(config.router_config().channel_capacity, 16);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/grains")
        );
        assert_eq!(config.snapshot_interval, 0);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.seed_orders, 5);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = from(&[("GRAIN_WORKERS", "many"), ("DATABASE_URL", "")]);
        assert_eq!(config.workers, Config::default().workers);
        assert!(config.database_url.is_none());
    }
}
