use serde::{Deserialize, Serialize};

use crate::playback::DEFAULT_VOLUME;
use crate::progress::CheckpointPolicy;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Volume used until the user changes it for the first time.
    pub default_volume: u8,
    pub settings_path: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            default_volume: DEFAULT_VOLUME,
            settings_path: "player_settings.json".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub database: String,
    pub user_id: String,
    pub checkpoint_interval_secs: f64,
    pub completion_threshold: f64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        let policy = CheckpointPolicy::default();
        Self {
            database: "lesson_progress.db3".to_string(),
            user_id: "local".to_string(),
            checkpoint_interval_secs: policy.interval_seconds,
            completion_threshold: policy.completion_threshold,
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::new("config", config::FileFormat::Json).required(false))
            .add_source(
                config::File::new("/etc/lecture-player/config", config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        config.try_deserialize()
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        let defaults = CheckpointPolicy::default();
        let interval_seconds = Some(self.progress.checkpoint_interval_secs)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .unwrap_or(defaults.interval_seconds);
        let completion_threshold = Some(self.progress.completion_threshold)
            .filter(|ratio| (0.0..=1.0).contains(ratio))
            .unwrap_or(defaults.completion_threshold);
        CheckpointPolicy {
            interval_seconds,
            completion_threshold,
        }
    }
}
