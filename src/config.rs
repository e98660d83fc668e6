use crate::adapters::outbound::RestEndpointConfig;
use crate::application::SubscriptionOptions;
use crate::infrastructure::MonitorConfig;
use std::time::Duration;

/// Startup configuration errors. These are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is not a valid url: {value}")]
    InvalidUrl { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    // Backing service
    pub url: String,
    pub api_key: String,
    pub health_table: String,
    pub request_timeout_ms: u64,

    // Connection monitor
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,

    // Subscriptions
    pub subscription_max_reconnect_attempts: u32,
    pub subscription_reconnect_delay_ms: u64,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            health_table: "profiles".to_string(),
            request_timeout_ms: 10_000,
            health_check_interval_ms: 30_000,
            health_check_timeout_ms: 5_000,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 5_000,
            subscription_max_reconnect_attempts: 5,
            subscription_reconnect_delay_ms: 3_000,
            debug: false,
        }
    }
}

impl Config {
    /// Read `DATALINK_*` variables from the environment and validate them.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable numbers fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let count = |key: &str, default: u32| -> u32 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| -> bool {
            lookup(key)
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(default)
        };

        let config = Self {
            url: lookup("DATALINK_URL").unwrap_or_default(),
            api_key: lookup("DATALINK_API_KEY").unwrap_or_default(),
            health_table: lookup("DATALINK_HEALTH_TABLE").unwrap_or(defaults.health_table),
            request_timeout_ms: number("DATALINK_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            health_check_interval_ms: number(
                "DATALINK_HEALTH_CHECK_INTERVAL_MS",
                defaults.health_check_interval_ms,
            ),
            health_check_timeout_ms: number(
                "DATALINK_HEALTH_CHECK_TIMEOUT_MS",
                defaults.health_check_timeout_ms,
            ),
            auto_reconnect: flag("DATALINK_AUTO_RECONNECT", defaults.auto_reconnect),
            max_reconnect_attempts: count(
                "DATALINK_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_delay_ms: number("DATALINK_RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            subscription_max_reconnect_attempts: count(
                "DATALINK_SUBSCRIPTION_MAX_RECONNECT_ATTEMPTS",
                defaults.subscription_max_reconnect_attempts,
            ),
            subscription_reconnect_delay_ms: number(
                "DATALINK_SUBSCRIPTION_RECONNECT_DELAY_MS",
                defaults.subscription_reconnect_delay_ms,
            ),
            debug: lookup("DEBUG").is_some(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("DATALINK_URL"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl {
                name: "DATALINK_URL",
                value: self.url.clone(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("DATALINK_API_KEY"));
        }
        if self.health_check_interval_ms == 0 {
            return Err(ConfigError::Zero("DATALINK_HEALTH_CHECK_INTERVAL_MS"));
        }
        if self.health_check_timeout_ms == 0 {
            return Err(ConfigError::Zero("DATALINK_HEALTH_CHECK_TIMEOUT_MS"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Zero("DATALINK_REQUEST_TIMEOUT_MS"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> RestEndpointConfig {
        RestEndpointConfig::new(self.url.clone(), self.api_key.clone())
            .with_health_table(self.health_table.clone())
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig::default()
            .with_health_check_interval(Duration::from_millis(self.health_check_interval_ms))
            .with_health_check_timeout(Duration::from_millis(self.health_check_timeout_ms))
            .with_auto_reconnect(self.auto_reconnect)
            .with_max_reconnect_attempts(self.max_reconnect_attempts)
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
    }

    /// Subscription options for `table` carrying the configured recovery
    /// settings.
    pub fn subscription(&self, table: impl Into<String>) -> SubscriptionOptions {
        SubscriptionOptions::new(table)
            .with_max_reconnect_attempts(self.subscription_max_reconnect_attempts)
            .with_reconnect_delay(Duration::from_millis(self.subscription_reconnect_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATALINK_URL", "https://project.example.co"),
        ("DATALINK_API_KEY", "anon-key"),
    ];

    #[test]
    fn test_defaults() {
        let cfg = load(&REQUIRED).unwrap();
        assert_eq!(cfg.health_table, "profiles");
        assert_eq!(cfg.health_check_interval_ms, 30_000);
        assert_eq!(cfg.health_check_timeout_ms, 5_000);
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.max_reconnect_attempts, 5);
        assert_eq!(cfg.reconnect_delay_ms, 5_000);
        assert_eq!(cfg.subscription_max_reconnect_attempts, 5);
        assert_eq!(cfg.subscription_reconnect_delay_ms, 3_000);
        assert!(!cfg.debug);
    }

    #[test]
    fn test_missing_url() {
        let err = load(&[("DATALINK_API_KEY", "k")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATALINK_URL"));
        assert_eq!(err.to_string(), "DATALINK_URL must be set");
    }

    #[test]
    fn test_missing_api_key() {
        let err = load(&[("DATALINK_URL", "http://localhost:54321")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATALINK_API_KEY"));
    }

    #[test]
    fn test_invalid_url() {
        let err = load(&[("DATALINK_URL", "localhost"), ("DATALINK_API_KEY", "k")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("DATALINK_HEALTH_TABLE", "classes"),
            ("DATALINK_HEALTH_CHECK_INTERVAL_MS", "1000"),
            ("DATALINK_AUTO_RECONNECT", "false"),
            ("DATALINK_MAX_RECONNECT_ATTEMPTS", "2"),
            ("DATALINK_SUBSCRIPTION_RECONNECT_DELAY_MS", "250"),
            ("DEBUG", "1"),
        ]);
        let cfg = load(&vars).unwrap();

        assert_eq!(cfg.health_table, "classes");
        assert!(!cfg.auto_reconnect);
        assert!(cfg.debug);

        let monitor = cfg.monitor();
        assert_eq!(monitor.health_check_interval, Duration::from_secs(1));
        assert_eq!(monitor.max_reconnect_attempts, 2);
        assert!(!monitor.auto_reconnect);

        let subscription = cfg.subscription("wishlists");
        assert_eq!(subscription.channel.table, "wishlists");
        assert_eq!(subscription.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_error_uses_default() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DATALINK_MAX_RECONNECT_ATTEMPTS", "lots"));
        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DATALINK_HEALTH_CHECK_INTERVAL_MS", "0"));
        let err = load(&vars).unwrap_err();
        assert_eq!(err, ConfigError::Zero("DATALINK_HEALTH_CHECK_INTERVAL_MS"));
    }

    #[test]
    fn test_endpoint_config() {
        let cfg = load(&REQUIRED).unwrap();
        let endpoint = cfg.endpoint();
        assert_eq!(endpoint.url, "https://project.example.co");
        assert_eq!(endpoint.request_timeout, Duration::from_secs(10));
    }
}
