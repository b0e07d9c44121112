//! Tracing subscriber setup.

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Call once from the embedding binary; library code only emits events.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;

    let result = if config.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = TelemetryConfig {
            log_filter: "not==valid==filter".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            init_tracing(&config),
            Err(TelemetryError::InvalidFilter(_))
        ));
    }
}
