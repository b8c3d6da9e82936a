use crate::application::snapshot_store::MergePolicy;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

const MIN_POLL_PERIOD_MS: u64 = 5;
const MIN_FETCH_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub readouts: Vec<ReadoutConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Preferred index path, probed before the built-in candidates.
    #[serde(default)]
    pub index_path: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            index_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollSettings {
    #[serde(default = "default_poll_hz")]
    pub hz: i64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self { hz: default_poll_hz() }
    }
}

impl PollSettings {
    /// `1000 / hz` milliseconds, never below 5 ms. Non-positive rates poll at 1 Hz.
    pub fn period(&self) -> Duration {
        let hz = if self.hz <= 0 { 1 } else { self.hz as u64 };
        Duration::from_millis((1000 / hz).max(MIN_POLL_PERIOD_MS))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_millis: default_timeout_millis(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis.max(MIN_FETCH_TIMEOUT_MS))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreSettings {
    #[serde(default)]
    pub merge: MergePolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileSettings {
    #[serde(default = "default_frame_millis")]
    pub frame_millis: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            frame_millis: default_frame_millis(),
        }
    }
}

impl ReconcileSettings {
    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_millis.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiagnosticsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_diagnostics_bind")]
    pub bind: SocketAddr,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_diagnostics_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Whether pipeline lines (target `pipeline`) are emitted at all.
    #[serde(default = "default_true")]
    pub pipeline: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            pipeline: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutKind {
    #[default]
    Numeric,
    Text,
    Raw,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReadoutConfig {
    pub key: String,
    #[serde(default)]
    pub kind: ReadoutKind,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_poll_hz() -> i64 {
    30
}

fn default_timeout_millis() -> u64 {
    1500
}

fn default_frame_millis() -> u64 {
    16
}

fn default_diagnostics_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Load `config/pipeline.{toml,yaml,json}` if present, overlaid with
/// `GAUGES__SECTION__FIELD` environment variables.
pub fn load_pipeline_config() -> anyhow::Result<PipelineConfig> {
    load_config_from("config/pipeline")
}

pub fn load_config_from(path: &str) -> anyhow::Result<PipelineConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("GAUGES")
                .separator("__")
                .try_parsing(true),
        );
    deserialize(builder)
}

fn deserialize(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<PipelineConfig> {
    let settings = builder.build()?;
    Ok(settings.try_deserialize()?)
}
