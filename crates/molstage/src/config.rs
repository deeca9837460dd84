use std::io::ErrorKind;
use std::path::Path;

use molstage_render::{BallAndStickStyle, RepresentationStyle, StageParameters, UnitCellStyle};
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "molstage.yaml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stage: StageParameters,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub representations: RepresentationConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a YAML file. A missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_saphyr::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.stage.clip_dist.is_finite() || self.stage.clip_dist < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "stage.clip_dist must be a non-negative number, got {}",
                self.stage.clip_dist
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total load attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit; the wait after attempt `n` is `base_delay_ms × n`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Substrings that mark a library error as a transient resource failure.
    #[serde(default = "default_transient_signatures")]
    pub transient_signatures: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            transient_signatures: default_transient_signatures(),
        }
    }
}

// ============================================================================
// Recovery
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Pause between tearing down a degraded surface and building its replacement.
    #[serde(default = "default_surface_recreate_delay_ms")]
    pub surface_recreate_delay_ms: u64,
    /// Upper bound on a single pause/resume request to a sibling viewer.
    #[serde(default = "default_coordination_timeout_ms")]
    pub coordination_timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            surface_recreate_delay_ms: default_surface_recreate_delay_ms(),
            coordination_timeout_ms: default_coordination_timeout_ms(),
        }
    }
}

// ============================================================================
// Representations
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepresentationConfig {
    #[serde(default)]
    pub ball_and_stick: BallAndStickStyle,
    #[serde(default)]
    pub unit_cell: UnitCellStyle,
}

impl RepresentationConfig {
    /// Representations attached to every loaded structure, in order.
    pub fn styles(&self) -> Vec<RepresentationStyle> {
        vec![
            RepresentationStyle::BallAndStick(self.ball_and_stick.clone()),
            RepresentationStyle::UnitCell(self.unit_cell.clone()),
        ]
    }
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_transient_signatures() -> Vec<String> {
    [
        "FRAMEBUFFER_INCOMPLETE",
        "Framebuffer is incomplete",
        "CONTEXT_LOST_WEBGL",
        "context lost",
        "WebGL",
        "context",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_surface_recreate_delay_ms() -> u64 {
    100
}

fn default_coordination_timeout_ms() -> u64 {
    1000
}

fn default_log_filter() -> String {
    "info".to_string()
}
