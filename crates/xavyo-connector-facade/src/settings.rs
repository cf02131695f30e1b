//! Runtime settings read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `XAVYO_FACADE_IDLE_TIMEOUT_SECS` | 7200 |
//! | `XAVYO_FACADE_SWEEP_INTERVAL_SECS` | 60 |
//! | `XAVYO_FACADE_LOGGING_PROXY` | false |

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::FacadeCache;
use crate::error::{ConnectorError, ConnectorResult};
use crate::logging::set_logging_proxy_enabled;

const IDLE_TIMEOUT_VAR: &str = "XAVYO_FACADE_IDLE_TIMEOUT_SECS";
const SWEEP_INTERVAL_VAR: &str = "XAVYO_FACADE_SWEEP_INTERVAL_SECS";
const LOGGING_PROXY_VAR: &str = "XAVYO_FACADE_LOGGING_PROXY";

/// Process-level settings of the facade runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Facades unused for longer than this are evicted from the cache.
    pub idle_timeout: Duration,

    /// How often the idle sweeper runs.
    pub sweep_interval: Duration,

    /// Whether new facades log every invocation.
    pub logging_proxy: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(7200),
            sweep_interval: Duration::from_secs(60),
            logging_proxy: false,
        }
    }
}

impl RuntimeSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> ConnectorResult<Self> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load settings from a custom variable reader.
    ///
    /// Lets tests supply variables without touching the process environment.
    pub fn from_reader<F>(reader: F) -> ConnectorResult<Self>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let defaults = Self::default();

        let idle_timeout = match reader(IDLE_TIMEOUT_VAR) {
            Ok(raw) => Duration::from_secs(parse_secs(IDLE_TIMEOUT_VAR, &raw)?),
            Err(_) => defaults.idle_timeout,
        };

        let sweep_interval = match reader(SWEEP_INTERVAL_VAR) {
            Ok(raw) => {
                let secs = parse_secs(SWEEP_INTERVAL_VAR, &raw)?;
                if secs == 0 {
                    return Err(ConnectorError::invalid_configuration(format!(
                        "{SWEEP_INTERVAL_VAR} must be greater than 0"
                    )));
                }
                Duration::from_secs(secs)
            }
            Err(_) => defaults.sweep_interval,
        };

        let logging_proxy = reader(LOGGING_PROXY_VAR)
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.logging_proxy);

        Ok(Self {
            idle_timeout,
            sweep_interval,
            logging_proxy,
        })
    }

    /// Apply the process-wide logging flag.
    pub fn apply(&self) {
        set_logging_proxy_enabled(self.logging_proxy);
    }

    /// Start the idle sweeper for `cache` with these settings.
    #[must_use]
    pub fn spawn_sweeper(&self, cache: &Arc<FacadeCache>, shutdown: CancellationToken) -> JoinHandle<()> {
        cache.spawn_idle_sweeper(self.sweep_interval, self.idle_timeout, shutdown)
    }
}

fn parse_secs(var: &str, raw: &str) -> ConnectorResult<u64> {
    raw.trim().parse::<u64>().map_err(|e| {
        ConnectorError::invalid_configuration(format!("invalid value for {var}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env::VarError;

    fn make_reader(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, VarError> {
        let owned: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| owned.get(key).cloned().ok_or(VarError::NotPresent)
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = RuntimeSettings::from_reader(make_reader(&[])).unwrap();
        assert_eq!(settings, RuntimeSettings::default());
        assert_eq!(settings.idle_timeout, Duration::from_secs(7200));
    }

    #[test]
    fn test_reads_all_variables() {
        let settings = RuntimeSettings::from_reader(make_reader(&[
            (IDLE_TIMEOUT_VAR, "300"),
            (SWEEP_INTERVAL_VAR, " 15 "),
            (LOGGING_PROXY_VAR, "TRUE"),
        ]))
        .unwrap();

        assert_eq!(settings.idle_timeout, Duration::from_secs(300));
        assert_eq!(settings.sweep_interval, Duration::from_secs(15));
        assert!(settings.logging_proxy);
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = RuntimeSettings::from_reader(make_reader(&[(IDLE_TIMEOUT_VAR, "two hours")]))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
        assert!(err.to_string().contains(IDLE_TIMEOUT_VAR));

        let err = RuntimeSettings::from_reader(make_reader(&[(SWEEP_INTERVAL_VAR, "0")]))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_unrecognized_flag_is_off() {
        let settings =
            RuntimeSettings::from_reader(make_reader(&[(LOGGING_PROXY_VAR, "maybe")])).unwrap();
        assert!(!settings.logging_proxy);
    }
}
