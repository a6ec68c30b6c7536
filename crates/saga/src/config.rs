//! Engine configuration loaded from environment variables.

use std::time::Duration;

/// Dispatch coordinator settings.
///
/// Reads from environment variables:
/// - `SAGA_DISPATCH_CONCURRENCY` — sagas updated concurrently per event (default: `8`)
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
}

impl DispatchConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            max_concurrency: std::env::var("SAGA_DISPATCH_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(8),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

/// Saga store settings.
///
/// Reads from environment variables:
/// - `SAGA_STORE_MAX_RETRIES` — retries after a version conflict (default: `3`)
/// - `SAGA_STORE_RETRY_BACKOFF_MS` — pause before each retry (default: `10`)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl StoreConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            max_retries: std::env::var("SAGA_STORE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            retry_backoff: Duration::from_millis(
                std::env::var("SAGA_STORE_RETRY_BACKOFF_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(DispatchConfig::default().max_concurrency, 8);

        let store = StoreConfig::default();
        assert_eq!(store.max_retries, 3);
        assert_eq!(store.retry_backoff, Duration::from_millis(10));
    }

    #[test]
    fn test_from_env_without_variables_uses_defaults() {
        // The variables are not set by the test harness.
        if std::env::var("SAGA_DISPATCH_CONCURRENCY").is_err() {
            assert_eq!(DispatchConfig::from_env().max_concurrency, 8);
        }
        if std::env::var("SAGA_STORE_MAX_RETRIES").is_err() {
            assert_eq!(StoreConfig::from_env().max_retries, 3);
        }
    }
}
