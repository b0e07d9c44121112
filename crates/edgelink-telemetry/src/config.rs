//! Telemetry configuration.

/// Logging configuration, overridable from the environment.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter directive (`EDGELINK_LOG` / `RUST_LOG` style).
    pub log_filter: String,
    /// Emit JSON lines instead of the human format.
    pub json_logs: bool,
    /// Interval between memory-usage reports, in seconds.
    pub memory_report_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            json_logs: false,
            memory_report_secs: 10,
        }
    }
}

impl TelemetryConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `EDGELINK_LOG` | `info` | Log level filter |
    /// | `EDGELINK_JSON_LOGS` | `false` | JSON log output |
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_filter: std::env::var("EDGELINK_LOG").unwrap_or(defaults.log_filter),
            json_logs: std::env::var("EDGELINK_JSON_LOGS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.json_logs),
            memory_report_secs: defaults.memory_report_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_filter, "info");
        assert!(!config.json_logs);
        assert_eq!(config.memory_report_secs, 10);
    }
}
