//! Pool configuration.

use std::time::Duration;

use ldapkit_client::config::{normalize_key, parse_bool, parse_duration};

use crate::error::PoolError;

/// Configuration for a connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections created by `initialize` and kept through pruning.
    pub min_connections: u32,

    /// Upper bound on live connections, idle and checked out.
    pub max_connections: u32,

    /// How long `get` waits for a connection.
    pub checkout_timeout: Duration,

    /// Validate each connection before handing it out.
    pub validate_on_checkout: bool,

    /// Validate each connection when it is returned.
    pub validate_on_checkin: bool,

    /// Validate idle connections this often. `None` disables it.
    pub validate_interval: Option<Duration>,

    /// How often idle connections are pruned.
    pub prune_interval: Duration,

    /// Idle time after which a connection may be pruned.
    pub idle_timeout: Duration,

    /// Extra connections tried when validation fails during checkout.
    pub max_validation_retries: u32,

    /// Attempts to create a replacement when the pool drops below
    /// `min_connections`.
    pub replace_attempts: u32,

    /// Delay before the second replacement attempt; doubles each time.
    pub replace_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 3,
            max_connections: 10,
            checkout_timeout: Duration::from_secs(30),
            validate_on_checkout: false,
            validate_on_checkin: false,
            validate_interval: Some(Duration::from_secs(30 * 60)),
            prune_interval: Duration::from_secs(5 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            max_validation_retries: 3,
            replace_attempts: 5,
            replace_backoff: Duration::from_millis(500),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;key=value` property string, e.g.
    /// `min_connections=2;max_connections=20;checkout_timeout=5s`.
    ///
    /// A zero `validate_interval` disables periodic validation.
    pub fn from_properties(props: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in props.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;
            let key = normalize_key(key);
            let value = value.trim();

            match key.as_str() {
                "minconnections" | "minpoolsize" => config.min_connections = parse_count(value)?,
                "maxconnections" | "maxpoolsize" => config.max_connections = parse_count(value)?,
                "checkouttimeout" | "blockwaittime" => {
                    config.checkout_timeout = parse_duration(value).map_err(config_error)?;
                }
                "validateoncheckout" => config.validate_on_checkout = parse_bool(value).map_err(config_error)?,
                "validateoncheckin" => config.validate_on_checkin = parse_bool(value).map_err(config_error)?,
                "validateinterval" | "validateperiod" => {
                    let interval = parse_duration(value).map_err(config_error)?;
                    config.validate_interval = (!interval.is_zero()).then_some(interval);
                }
                "pruneinterval" | "pruneperiod" => config.prune_interval = parse_duration(value).map_err(config_error)?,
                "idletimeout" | "idletime" => config.idle_timeout = parse_duration(value).map_err(config_error)?,
                "maxvalidationretries" => config.max_validation_retries = parse_count(value)?,
                "replaceattempts" => config.replace_attempts = parse_count(value)?,
                "replacebackoff" => config.replace_backoff = parse_duration(value).map_err(config_error)?,
                _ => {
                    tracing::debug!(key = key, "ignoring unknown pool property");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the checkout timeout.
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Validate connections on checkout.
    #[must_use]
    pub fn validate_on_checkout(mut self, enabled: bool) -> Self {
        self.validate_on_checkout = enabled;
        self
    }

    /// Validate connections on checkin.
    #[must_use]
    pub fn validate_on_checkin(mut self, enabled: bool) -> Self {
        self.validate_on_checkin = enabled;
        self
    }

    /// Set the idle validation interval.
    #[must_use]
    pub fn validate_interval(mut self, interval: Option<Duration>) -> Self {
        self.validate_interval = interval;
        self
    }

    /// Set the prune interval.
    #[must_use]
    pub fn prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the number of extra connections tried after a failed validation.
    #[must_use]
    pub fn max_validation_retries(mut self, retries: u32) -> Self {
        self.max_validation_retries = retries;
        self
    }

    /// Set how replacements are retried.
    #[must_use]
    pub fn replace_policy(mut self, attempts: u32, backoff: Duration) -> Self {
        self.replace_attempts = attempts;
        self.replace_backoff = backoff;
        self
    }

    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.checkout_timeout.is_zero() {
            return Err(PoolError::Configuration("checkout_timeout must be positive".into()));
        }
        if self.prune_interval.is_zero() {
            return Err(PoolError::Configuration("prune_interval must be positive".into()));
        }
        Ok(())
    }
}

fn config_error(e: ldapkit_client::Error) -> PoolError {
    PoolError::Configuration(e.to_string())
}

fn parse_count(value: &str) -> Result<u32, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Configuration(format!("invalid count: {value}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_connections, 3);
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_min_exceeds_max() {
        let config = PoolConfig::new().min_connections(5).max_connections(2);
        assert!(matches!(config.validate(), Err(PoolError::Configuration(_))));
    }

    #[test]
    fn test_zero_max() {
        let config = PoolConfig::new().min_connections(0).max_connections(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_properties() {
        let config = PoolConfig::from_properties(
            "min_connections=1; maxConnections=4; checkout_timeout=250; \
             validate_on_checkout=true; validate_interval=0; idle-timeout=2m",
        )
        .unwrap();
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.checkout_timeout, Duration::from_millis(250));
        assert!(config.validate_on_checkout);
        assert_eq!(config.validate_interval, None);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_from_properties_rejects_bad_values() {
        assert!(PoolConfig::from_properties("max_connections=lots").is_err());
        assert!(PoolConfig::from_properties("min_connections").is_err());
        assert!(PoolConfig::from_properties("min_connections=9;max_connections=3").is_err());
    }
}
