use serde::Deserialize;
use std::time::Duration;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_EXPRESS__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub addressing: AddressingConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Batching and pacing knobs for the dispatch loop. Tune per transport
/// provider; none of these affect selection or the lifecycle rules.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_max_reported_errors")]
    pub max_reported_errors: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressingConfig {
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_local_number_max_len")]
    pub local_number_max_len: usize,
}

/// Defaults applied when a criteria object leaves the contact/active
/// switches unset.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_require_verified_contact")]
    pub require_verified_contact_by_default: bool,
    #[serde(default = "default_require_active")]
    pub require_active_by_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_batch_size() -> usize {
    10
}
fn default_message_delay_ms() -> u64 {
    500
}
fn default_batch_delay_ms() -> u64 {
    2000
}
fn default_send_timeout_ms() -> u64 {
    15_000
}
fn default_max_reported_errors() -> usize {
    10
}
fn default_country_code() -> String {
    "55".to_string()
}
fn default_local_number_max_len() -> usize {
    11
}
fn default_require_verified_contact() -> bool {
    true
}
fn default_require_active() -> bool {
    true
}
fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl DispatchConfig {
    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            message_delay_ms: default_message_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            max_reported_errors: default_max_reported_errors(),
        }
    }
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            country_code: default_country_code(),
            local_number_max_len: default_local_number_max_len(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            require_verified_contact_by_default: default_require_verified_contact(),
            require_active_by_default: default_require_active(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            dispatch: DispatchConfig::default(),
            addressing: AddressingConfig::default(),
            selection: SelectionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, overlaid by
    /// environment variables.
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        tracing::debug!(
            file = path.unwrap_or("<none>"),
            node_id = %loaded.node_id,
            "Configuration sources merged"
        );
        Ok(loaded)
    }

    /// Reject knob values the dispatch loop cannot run with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.dispatch.batch_size == 0 {
            return Err(config::ConfigError::Message(
                "dispatch.batch_size must be at least 1".to_string(),
            ));
        }
        if self.dispatch.send_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "dispatch.send_timeout_ms must be positive".to_string(),
            ));
        }
        if self.addressing.country_code.is_empty()
            || !self.addressing.country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(config::ConfigError::Message(
                "addressing.country_code must be a non-empty digit string".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.dispatch.batch_size, 10);
        assert_eq!(config.dispatch.message_delay(), Duration::from_millis(500));
        assert_eq!(config.dispatch.batch_delay(), Duration::from_millis(2000));
        assert_eq!(config.dispatch.max_reported_errors, 10);
        assert_eq!(config.addressing.country_code, "55");
        assert!(config.selection.require_active_by_default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = AppConfig::default();
        config.dispatch.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_digit_country_code() {
        let mut config = AppConfig::default();
        config.addressing.country_code = "+55".to_string();
        assert!(config.validate().is_err());
    }
}
