use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "CHW Screening";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "chw_screening=info,warn"
}

/// Get the application data directory.
/// Platform data dir (e.g. ~/.local/share/chw-screening), falling back to
/// the working directory when the platform reports none.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chw-screening")
}

/// Path of the SQLite database holding records and settings.
pub fn database_path() -> PathBuf {
    app_data_dir().join("screening.db")
}

// ═══════════════════════════════════════════════════════════
// Sync configuration
// ═══════════════════════════════════════════════════════════

/// Reconciler tuning. Defaults match field conditions: a pass every 30s,
/// submissions bounded at 20s, retry delay doubling from 30s up to 30 minutes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub tick_interval: Duration,
    pub submit_timeout: Duration,
    /// Maximum submissions in flight at once (across different records).
    pub max_concurrent: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(20),
            max_concurrent: 4,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(30 * 60),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `CHW_SYNC_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_interval: env_secs("CHW_SYNC_TICK_SECS").unwrap_or(defaults.tick_interval),
            submit_timeout: env_secs("CHW_SYNC_TIMEOUT_SECS").unwrap_or(defaults.submit_timeout),
            max_concurrent: env_parse::<usize>("CHW_SYNC_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent),
            backoff_base: env_secs("CHW_SYNC_BACKOFF_BASE_SECS").unwrap_or(defaults.backoff_base),
            backoff_cap: env_secs("CHW_SYNC_BACKOFF_CAP_SECS").unwrap_or(defaults.backoff_cap),
        }
        .sanitized()
    }

    /// Replace unusable values with defaults: zero durations, a zero
    /// concurrency limit, and a backoff cap below its base.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let nonzero = |value: Duration, default: Duration, name: &str| {
            if value.is_zero() {
                tracing::warn!(setting = name, "Zero duration in sync config; using default");
                default
            } else {
                value
            }
        };

        let mut config = Self {
            tick_interval: nonzero(self.tick_interval, defaults.tick_interval, "tick_interval"),
            submit_timeout: nonzero(self.submit_timeout, defaults.submit_timeout, "submit_timeout"),
            max_concurrent: self.max_concurrent,
            backoff_base: nonzero(self.backoff_base, defaults.backoff_base, "backoff_base"),
            backoff_cap: nonzero(self.backoff_cap, defaults.backoff_cap, "backoff_cap"),
        };
        if config.max_concurrent == 0 {
            tracing::warn!("Zero sync concurrency; using default");
            config.max_concurrent = defaults.max_concurrent;
        }
        if config.backoff_cap < config.backoff_base {
            tracing::warn!(
                base_secs = config.backoff_base.as_secs(),
                cap_secs = config.backoff_cap.as_secs(),
                "Backoff cap below base; using default backoff"
            );
            config.backoff_base = defaults.backoff_base;
            config.backoff_cap = defaults.backoff_cap;
        }
        config
    }
}

// ═══════════════════════════════════════════════════════════
// Workflow configuration
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    pub classifier_timeout: Duration,
    pub min_image_bytes: usize,
    pub max_image_bytes: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            classifier_timeout: Duration::from_secs(30),
            min_image_bytes: 64,
            max_image_bytes: 25 * 1024 * 1024,
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            classifier_timeout: env_secs("CHW_CLASSIFIER_TIMEOUT_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.classifier_timeout),
            ..defaults
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}
