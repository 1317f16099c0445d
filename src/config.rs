use tracing::trace;

/// Liveness tracker tuning.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LivenessConfig {
    /// How often the background sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// A server whose last heartbeat is older than this is marked offline.
    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            offline_threshold_secs: default_offline_threshold_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_offline_threshold_secs() -> u64 {
    60
}

/// Metric store and alert evaluator tuning.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EvaluatorConfig {
    /// Metric samples older than this are eligible for deletion.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How often the retention cleanup runs.
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u32,

    /// Move the open alert to resolved when the breach clears.
    #[serde(default = "default_auto_resolve")]
    pub auto_resolve: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
            auto_resolve: default_auto_resolve(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

fn default_auto_resolve() -> bool {
    true
}

/// Task executor tuning.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExecutorConfig {
    /// Maximum in-flight connections per task during fan-out.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Per-target execution deadline in seconds.
    #[serde(default = "default_target_timeout_secs")]
    pub target_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            target_timeout_secs: default_target_timeout_secs(),
        }
    }
}

fn default_max_in_flight() -> usize {
    8
}

fn default_target_timeout_secs() -> u64 {
    30
}

/// Scheduler loop tuning.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    /// How often the due-task scan runs.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    5
}

/// Top-level configuration passed into the core components.
///
/// The vault key is deliberately absent: it arrives through the environment
/// at process startup and is held only in memory, never in a config file.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
