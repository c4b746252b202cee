//! Configuration types for scene-pipeline

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Main configuration
///
/// Every section has working defaults, so an empty TOML file is a valid configuration
/// except for `analysis.endpoint`, which the HTTP analyzer needs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Database location and lock behavior
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Where uploaded sources live
    #[serde(default)]
    pub sources: SourceConfig,

    /// Unit sizing
    #[serde(default)]
    pub splitter: SplitterConfig,

    /// Stream queue timing
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker pool sizing and deadlines
    #[serde(default)]
    pub worker: WorkerConfig,

    /// External analysis service
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Progress fanout
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Load a TOML configuration file and validate it
    pub async fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;

        let config: Config = toml::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break the pipeline
    pub fn validate(&self) -> Result<()> {
        let checks: [(bool, &str, &str); 8] = [
            (
                self.splitter.max_unit_tokens > 0,
                "splitter.max_unit_tokens",
                "must be greater than zero",
            ),
            (
                self.splitter.chars_per_token > 0,
                "splitter.chars_per_token",
                "must be greater than zero",
            ),
            (
                self.queue.batch_size > 0,
                "queue.batch_size",
                "must be greater than zero",
            ),
            (
                self.queue.max_deliveries > 0,
                "queue.max_deliveries",
                "must be greater than zero",
            ),
            (
                self.worker.analysis_workers > 0,
                "worker.analysis_workers",
                "must be greater than zero",
            ),
            (
                !self.queue.claim_timeout.is_zero(),
                "queue.claim_timeout_ms",
                "must be greater than zero",
            ),
            (
                self.queue.claim_timeout > self.worker.analysis_timeout,
                "queue.claim_timeout_ms",
                "must exceed worker.analysis_timeout",
            ),
            (
                self.broadcast.topic_capacity > 0,
                "broadcast.topic_capacity",
                "must be greater than zero",
            ),
        ];

        for (ok, key, message) in checks {
            if !ok {
                return Err(Error::Config {
                    message: format!("{} {}", key, message),
                    key: Some(key.to_string()),
                });
            }
        }

        Ok(())
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./scene-pipeline.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How long a writer waits on a locked database (default: 5 seconds)
    #[serde(default = "default_busy_timeout", with = "duration_serde")]
    pub busy_timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

/// Source storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SourceConfig {
    /// Root directory that object keys resolve against (default: "./sources")
    #[serde(default = "default_source_root")]
    pub root_dir: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_source_root(),
        }
    }
}

/// Unit splitter configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SplitterConfig {
    /// Target unit size in tokens for fallback windowing (default: 3000)
    #[serde(default = "default_max_unit_tokens")]
    pub max_unit_tokens: usize,

    /// Characters per token used to size windows (default: 4)
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_unit_tokens: default_max_unit_tokens(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

impl SplitterConfig {
    /// Fallback window size in characters
    pub fn window_chars(&self) -> usize {
        self.max_unit_tokens.saturating_mul(self.chars_per_token)
    }
}

/// Stream queue configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueConfig {
    /// Idle time after which another consumer may claim an unacknowledged entry (default: 5 minutes)
    #[serde(rename = "claim_timeout_ms", default = "default_claim_timeout", with = "millis_serde")]
    pub claim_timeout: Duration,

    /// How long one read blocks waiting for new entries (default: 5 seconds)
    #[serde(rename = "block_timeout_ms", default = "default_block_timeout", with = "millis_serde")]
    pub block_timeout: Duration,

    /// Poll interval while blocked, for entries published by other processes (default: 100 ms)
    #[serde(rename = "poll_interval_ms", default = "default_poll_interval", with = "millis_serde")]
    pub poll_interval: Duration,

    /// Entries fetched per read (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Deliveries after which an entry is dead-lettered as poison (default: 5)
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            claim_timeout: default_claim_timeout(),
            block_timeout: default_block_timeout(),
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            max_deliveries: default_max_deliveries(),
        }
    }
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkerConfig {
    /// Prefix for consumer names; the process id and a task number are appended (default: "worker")
    #[serde(default = "default_consumer_prefix")]
    pub consumer_prefix: String,

    /// Chunking consumers per process (default: 1)
    #[serde(default = "default_one")]
    pub chunk_workers: usize,

    /// Analysis consumers per process (default: 4)
    #[serde(default = "default_analysis_workers")]
    pub analysis_workers: usize,

    /// Graph consumers per process (default: 1)
    #[serde(default = "default_one")]
    pub graph_workers: usize,

    /// Deadline for one analysis call, retries included (default: 180 seconds)
    #[serde(default = "default_analysis_timeout", with = "duration_serde")]
    pub analysis_timeout: Duration,

    /// Deadline for a single persistence write (default: 10 seconds)
    #[serde(default = "default_persistence_timeout", with = "duration_serde")]
    pub persistence_timeout: Duration,

    /// How long shutdown waits for in-flight work (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_prefix: default_consumer_prefix(),
            chunk_workers: 1,
            analysis_workers: default_analysis_workers(),
            graph_workers: 1,
            analysis_timeout: default_analysis_timeout(),
            persistence_timeout: default_persistence_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// External analysis service configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AnalysisConfig {
    /// URL that receives one POST per unit
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Value for the Authorization header, if the service needs one
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Deadline for one HTTP request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Backoff policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth_header: None,
            request_timeout: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Progress fanout configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct BroadcastConfig {
    /// Events buffered per job topic before slow observers start skipping (default: 64)
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            topic_capacity: default_topic_capacity(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./scene-pipeline.db")
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_source_root() -> PathBuf {
    PathBuf::from("./sources")
}

fn default_max_unit_tokens() -> usize {
    3000
}

fn default_chars_per_token() -> usize {
    4
}

fn default_claim_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_block_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_batch_size() -> usize {
    10
}

fn default_max_deliveries() -> i64 {
    5
}

fn default_consumer_prefix() -> String {
    "worker".to_string()
}

fn default_one() -> usize {
    1
}

fn default_analysis_workers() -> usize {
    4
}

fn default_analysis_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_persistence_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_topic_capacity() -> usize {
    64
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for queue timing)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
