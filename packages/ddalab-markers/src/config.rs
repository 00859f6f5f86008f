use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_MARKER_STREAM_NAME: &str = "UnityMarkerStream";
pub const DEFAULT_MARKER_STREAM_TYPE: &str = "BCI_Essentials_Markers";
pub const DEFAULT_RESPONSE_STREAM_NAME: &str = "PythonResponse";
pub const DEFAULT_RESPONSE_STREAM_TYPE: &str = "BCI_Essentials_Predictions";

/// Marker stream configuration
///
/// Owning components pass this in; nothing here is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkerStreamConfig {
    /// Name advertised for the outbound marker stream
    pub marker_stream_name: String,
    /// Type advertised for the outbound marker stream
    pub marker_stream_type: String,
    /// Name advertised by the echo responder for its response stream
    pub response_stream_name: String,
    /// Type the reader resolves inbound responses by
    pub response_stream_type: String,
    /// Seconds between response polls
    pub polling_period: f64,
    /// Seconds between background resolve attempts
    pub resolve_timeout: f64,
}

impl Default for MarkerStreamConfig {
    fn default() -> Self {
        Self {
            marker_stream_name: DEFAULT_MARKER_STREAM_NAME.to_string(),
            marker_stream_type: DEFAULT_MARKER_STREAM_TYPE.to_string(),
            response_stream_name: DEFAULT_RESPONSE_STREAM_NAME.to_string(),
            response_stream_type: DEFAULT_RESPONSE_STREAM_TYPE.to_string(),
            polling_period: 0.1,
            resolve_timeout: 1.0,
        }
    }
}

impl MarkerStreamConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            marker_stream_name: env::var("DDALAB_MARKER_STREAM_NAME")
                .unwrap_or(defaults.marker_stream_name),
            marker_stream_type: env::var("DDALAB_MARKER_STREAM_TYPE")
                .unwrap_or(defaults.marker_stream_type),
            response_stream_name: env::var("DDALAB_MARKER_RESPONSE_STREAM_NAME")
                .unwrap_or(defaults.response_stream_name),
            response_stream_type: env::var("DDALAB_MARKER_RESPONSE_STREAM_TYPE")
                .unwrap_or(defaults.response_stream_type),
            polling_period: parse_seconds("DDALAB_MARKER_POLLING_PERIOD")?
                .unwrap_or(defaults.polling_period),
            resolve_timeout: parse_seconds("DDALAB_MARKER_RESOLVE_TIMEOUT")?
                .unwrap_or(defaults.resolve_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check names are present and periods are positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marker_stream_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "marker stream name must not be empty".to_string(),
            ));
        }
        if self.marker_stream_type.trim().is_empty()
            || self.response_stream_type.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue(
                "stream types must not be empty".to_string(),
            ));
        }
        if self.polling_period.is_nan() || self.polling_period <= 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "polling period must be positive, got {}",
                self.polling_period
            )));
        }
        if self.resolve_timeout.is_nan() || self.resolve_timeout <= 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "resolve timeout must be positive, got {}",
                self.resolve_timeout
            )));
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_period)
    }
}

fn parse_seconds(key: &str) -> Result<Option<f64>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{} is not a number: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MarkerStreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_non_positive_periods() {
        let config = MarkerStreamConfig {
            polling_period: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MarkerStreamConfig {
            resolve_timeout: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MarkerStreamConfig {
            polling_period: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MarkerStreamConfig {
            resolve_timeout: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_names() {
        let config = MarkerStreamConfig {
            marker_stream_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
