use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Runtime settings, resolved once at startup.
///
/// Everything time-based is a plain `Duration` field so tests can shrink the
/// intervals instead of waiting out production values.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the assistant backend.
    pub api_url: String,
    /// Override for the snapshot location; `None` means the platform data dir.
    pub data_dir: Option<PathBuf>,
    /// Per-request timeout for message operations.
    pub request_timeout: Duration,
    /// Per-request timeout for health probes.
    pub health_timeout: Duration,
    /// Retries after the initial attempt, connection-level failures only.
    pub retry_attempts: u32,
    /// Flat delay between retry attempts. No backoff.
    pub retry_delay: Duration,
    /// Cadence of the recurring backend probe while online.
    pub probe_interval: Duration,
    /// How long an operation must run before the loading flag shows.
    pub loading_debounce: Duration,
    /// Simulated latency before the canned degraded-mode reply.
    pub degraded_reply_delay: Duration,
    /// Display time for auto-clearing notices.
    pub error_autoclear: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: None,
            request_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            probe_interval: Duration::from_secs(30),
            loading_debounce: Duration::from_millis(200),
            degraded_reply_delay: Duration::from_millis(500),
            error_autoclear: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Build a config from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("MEDICHAT_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(dir) = env::var("MEDICHAT_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        config
    }
}
