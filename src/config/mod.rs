use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

const DEFAULT_CONTROL_PORT: u16 = 9500;
const DEFAULT_WS_PORT: u16 = 9501;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 2;
const DEFAULT_RECENT_FAILED_LIMIT: usize = 10;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── MetricsConfig ────────────────────────────────────────────────────────────

/// Which aggregate bucket cancelled tasks count toward.
///
/// `done` always counts as completed and `failed` always as failed; the
/// cancelled mapping is ambiguous enough that it is configuration, not a
/// hard-coded guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBucket {
    /// Report cancelled tasks in their own `cancelled` count (default).
    Separate,
    /// Fold cancelled tasks into the `failed` count.
    Failed,
}

/// Aggregation tuning (`[metrics]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between metrics_update broadcasts.
    pub interval_secs: u64,
    /// Maximum entries in the recent-failed list of a queue snapshot.
    pub recent_failed_limit: usize,
    /// Bucket mapping for cancelled tasks.
    pub cancelled_bucket: CancelledBucket,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
            recent_failed_limit: DEFAULT_RECENT_FAILED_LIMIT,
            cancelled_bucket: CancelledBucket::Separate,
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

/// Daemon configuration: `config.toml` values overridden by CLI/env flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Control protocol (newline-delimited JSON over TCP) listen port.
    pub control_port: u16,
    /// Real-time WebSocket listen port.
    pub ws_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Per-request deadline on the control protocol.
    pub request_timeout_secs: u64,
    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,
    pub metrics: MetricsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            ws_port: DEFAULT_WS_PORT,
            bind_address: default_bind_address(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_level: "info".to_string(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from an optional TOML file, then apply CLI/env overrides.
    ///
    /// An unreadable or malformed file logs a warning and falls back to
    /// defaults rather than refusing to start.
    pub fn load(
        config_path: Option<&Path>,
        control_port: Option<u16>,
        ws_port: Option<u16>,
        bind_address: Option<String>,
        log_level: Option<String>,
    ) -> Self {
        let mut config = match config_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                    warn!(path = %path.display(), err = %e, "malformed config file — using defaults");
                    Self::default()
                }),
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "could not read config file — using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };

        if let Some(p) = control_port {
            config.control_port = p;
        }
        if let Some(p) = ws_port {
            config.ws_port = p;
        }
        if let Some(b) = bind_address {
            config.bind_address = b;
        }
        if let Some(l) = log_level {
            config.log_level = l;
        }
        config
    }

    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.ws_port)
    }
}
