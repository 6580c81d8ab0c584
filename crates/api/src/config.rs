//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use event_bus::{BusConfig, ConsumerConfig};
use resilience::CircuitBreakerConfig;
use saga::{NotificationConfig, PaymentConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL URL; in-memory stores when unset
/// - `KAFKA_TOPIC`: order event topic (default: `"order_events"`)
/// - `EVENT_PARTITIONS`: partitions per topic (default: `3`)
/// - `PAYMENT_SUCCESS_RATE`: clamped to `[0, 1]` (default: `0.8`)
/// - `PAYMENT_MIN_DELAY_MS` / `PAYMENT_MAX_JITTER_MS` (default: `200` / `800`)
/// - `NOTIFICATION_MAX_RETRIES` / `NOTIFICATION_BACKOFF_MS` (default: `3` / `1000`)
/// - `BREAKER_MAX_FAILURES` / `BREAKER_RESET_TIMEOUT_SECS` (default: `5` / `30`)
/// - `CATALOG_TIMEOUT_MS`: per-call catalog timeout (default: `2000`)
///
/// Values that fail to parse fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub topic: String,
    pub partitions: u32,
    pub payment_success_rate: f64,
    pub payment_min_delay: Duration,
    pub payment_max_jitter: Duration,
    pub notification_max_retries: u32,
    pub notification_backoff: Duration,
    pub breaker_max_failures: u32,
    pub breaker_reset_timeout: Duration,
    pub catalog_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| Parsed(lookup(key));
        let millis = |key: &str| parsed(key).get::<u64>().map(Duration::from_millis);

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed("PORT").get().unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            topic: lookup("KAFKA_TOPIC")
                .filter(|topic| !topic.is_empty())
                .unwrap_or(defaults.topic),
            partitions: parsed("EVENT_PARTITIONS")
                .get()
                .filter(|&n: &u32| n > 0)
                .unwrap_or(defaults.partitions),
            payment_success_rate: parsed("PAYMENT_SUCCESS_RATE")
                .get()
                .filter(|rate: &f64| !rate.is_nan())
                .map(|rate: f64| rate.clamp(0.0, 1.0))
                .unwrap_or(defaults.payment_success_rate),
            payment_min_delay: millis("PAYMENT_MIN_DELAY_MS").unwrap_or(defaults.payment_min_delay),
            payment_max_jitter: millis("PAYMENT_MAX_JITTER_MS")
                .unwrap_or(defaults.payment_max_jitter),
            notification_max_retries: parsed("NOTIFICATION_MAX_RETRIES")
                .get()
                .unwrap_or(defaults.notification_max_retries),
            notification_backoff: millis("NOTIFICATION_BACKOFF_MS")
                .unwrap_or(defaults.notification_backoff),
            breaker_max_failures: parsed("BREAKER_MAX_FAILURES")
                .get()
                .filter(|&n: &u32| n > 0)
                .unwrap_or(defaults.breaker_max_failures),
            breaker_reset_timeout: parsed("BREAKER_RESET_TIMEOUT_SECS")
                .get()
                .map(Duration::from_secs)
                .unwrap_or(defaults.breaker_reset_timeout),
            catalog_timeout: millis("CATALOG_TIMEOUT_MS").unwrap_or(defaults.catalog_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            partitions: self.partitions,
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::default()
    }

    pub fn payment_config(&self) -> PaymentConfig {
        PaymentConfig::new(
            self.payment_success_rate,
            self.payment_min_delay,
            self.payment_max_jitter,
        )
    }

    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig {
            max_retries: self.notification_max_retries,
            base_interval: self.notification_backoff,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(self.breaker_max_failures, self.breaker_reset_timeout)
    }
}

/// A raw environment value awaiting parsing.
struct Parsed(Option<String>);

impl Parsed {
    fn get<T: FromStr>(&self) -> Option<T> {
        self.0.as_deref().and_then(|value| value.trim().parse().ok())
    }
}

impl Default for Config {
    fn default() -> Self {
        let payment = PaymentConfig::default();
        let notification = NotificationConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            topic: "order_events".to_string(),
            partitions: BusConfig::default().partitions,
            payment_success_rate: payment.success_rate,
            payment_min_delay: payment.min_delay,
            payment_max_jitter: payment.max_jitter,
            notification_max_retries: notification.max_retries,
            notification_backoff: notification.base_interval,
            breaker_max_failures: 5,
            breaker_reset_timeout: Duration::from_secs(30),
            catalog_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.database_url, None);
        assert_eq!(config.topic, "order_events");
        assert_eq!(config.partitions, 3);
        assert_eq!(config.payment_success_rate, 0.8);
        assert_eq!(config.notification_max_retries, 3);
        assert_eq!(config.breaker_max_failures, 5);
        assert_eq!(config.breaker_reset_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("KAFKA_TOPIC", "orders"),
            ("PAYMENT_MIN_DELAY_MS", "0"),
            ("NOTIFICATION_BACKOFF_MS", "250"),
            ("BREAKER_RESET_TIMEOUT_SECS", "5"),
        ]);
        assert_eq!(config.addr(), "0.0.0.0:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.topic, "orders");
        assert_eq!(config.payment_config().min_delay, Duration::ZERO);
        assert_eq!(
            config.notification_config().base_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.breaker_config().reset_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_success_rate_is_clamped() {
        assert_eq!(from_pairs(&[("PAYMENT_SUCCESS_RATE", "1.5")]).payment_success_rate, 1.0);
        assert_eq!(from_pairs(&[("PAYMENT_SUCCESS_RATE", "-1")]).payment_success_rate, 0.0);
        assert_eq!(from_pairs(&[("PAYMENT_SUCCESS_RATE", "NaN")]).payment_success_rate, 0.8);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "eighty"),
            ("EVENT_PARTITIONS", "0"),
            ("BREAKER_MAX_FAILURES", "-2"),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.partitions, 3);
        assert_eq!(config.breaker_max_failures, 5);
        assert_eq!(config.database_url, None);
    }
}
