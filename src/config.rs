use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub collision: CollisionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryDefaults,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Per-kind minimum-length thresholds. Defaults mirror the historical
/// pipeline values; each is independently tunable.
#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_min_article_body")]
    pub min_article_body: usize,
    #[serde(default = "default_min_media_description")]
    pub min_media_description: usize,
    /// Transcript shorter than this is a warning, not a rejection.
    #[serde(default = "default_min_transcript")]
    pub min_transcript: usize,
    #[serde(default = "default_min_email_body")]
    pub min_email_body: usize,
    #[serde(default = "default_max_tag_length")]
    pub max_tag_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_article_body: default_min_article_body(),
            min_media_description: default_min_media_description(),
            min_transcript: default_min_transcript(),
            min_email_body: default_min_email_body(),
            max_tag_length: default_max_tag_length(),
        }
    }
}

fn default_min_article_body() -> usize {
    300
}
fn default_min_media_description() -> usize {
    100
}
fn default_min_transcript() -> usize {
    500
}
fn default_min_email_body() -> usize {
    50
}
fn default_max_tag_length() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollisionConfig {
    /// Highest numeric suffix probed before falling back to a hash suffix.
    #[serde(default = "default_suffix_ceiling")]
    pub suffix_ceiling: u32,
    /// Extension appended when probing the filesystem for collisions.
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            suffix_ceiling: default_suffix_ceiling(),
            extension: default_extension(),
        }
    }
}

fn default_suffix_ceiling() -> u32 {
    100
}
fn default_extension() -> String {
    "md".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_max_attempts")]
    pub default_max_attempts: i64,
    /// Re-arm delay applied by `fail_item` when the caller supplies none.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: i64,
    /// Terminal rows older than this are removed by `queue cleanup`.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: default_queue_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_queue_max_attempts() -> i64 {
    3
}
fn default_retry_delay_secs() -> i64 {
    300
}
fn default_retention_days() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryDefaults {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    /// One of: exponential, linear, fixed, fibonacci.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            strategy: default_strategy(),
            jitter: default_jitter(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    3
}
fn default_base_delay_secs() -> f64 {
    1.0
}
fn default_max_delay_secs() -> f64 {
    60.0
}
fn default_strategy() -> String {
    "exponential".to_string()
}
fn default_jitter() -> bool {
    true
}
fn default_jitter_factor() -> f64 {
    0.1
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate collision settings
    if config.collision.suffix_ceiling == 0 {
        anyhow::bail!("collision.suffix_ceiling must be > 0");
    }
    if config.collision.extension.starts_with('.') {
        anyhow::bail!("collision.extension must not include the leading dot");
    }

    // Validate queue settings
    if config.queue.default_max_attempts < 1 {
        anyhow::bail!("queue.default_max_attempts must be >= 1");
    }
    if config.queue.retry_delay_secs < 0 {
        anyhow::bail!("queue.retry_delay_secs must be >= 0");
    }
    if config.queue.retention_days < 1 {
        anyhow::bail!("queue.retention_days must be >= 1");
    }

    // Validate retry settings
    if config.retry.max_attempts < 1 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.base_delay_secs <= 0.0 {
        anyhow::bail!("retry.base_delay_secs must be > 0");
    }
    if config.retry.max_delay_secs < config.retry.base_delay_secs {
        anyhow::bail!("retry.max_delay_secs must be >= retry.base_delay_secs");
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_factor) {
        anyhow::bail!("retry.jitter_factor must be in [0.0, 1.0]");
    }

    match config.retry.strategy.as_str() {
        "exponential" | "linear" | "fixed" | "fibonacci" => {}
        other => anyhow::bail!(
            "Unknown retry strategy: '{}'. Must be exponential, linear, fixed, or fibonacci.",
            other
        ),
    }

    Ok(config)
}
