//! Pipeline configuration, loadable from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channels::{ChannelConfig, Field};
use crate::error::{GazeError, GazeResult};
use crate::sample::Eye;

/// Top-level configuration for an acquisition pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub acquisition: AcquisitionConfig,
    pub channels: ChannelSetup,
    pub validation: ValidationConfig,
    pub recording: RecordingConfig,
}

impl RigConfig {
    pub fn load(path: impl AsRef<Path>) -> GazeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|error| GazeError::Config(error.to_string()))
    }

    /// Recording directory, falling back to `EyeRecordingData` under the
    /// user's data dir.
    pub fn output_dir(&self) -> PathBuf {
        self.recording
            .output_dir
            .clone()
            .unwrap_or_else(default_output_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Pose snapshots buffered to offset the tracker's internal latency
    pub queue_depth: usize,
    /// Delay secondary tracked devices along with the head
    pub delay_all: bool,
    /// Shutdown grace period, milliseconds
    pub stop_grace_ms: u64,
    /// Ready-gate wait before startup fails, seconds
    pub ready_timeout_secs: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            queue_depth: 3,
            delay_all: true,
            stop_grace_ms: 350,
            ready_timeout_secs: 60,
        }
    }
}

impl AcquisitionConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Which eyes and fields the parser emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSetup {
    pub eyes: Vec<Eye>,
    pub fields: Vec<Field>,
}

impl Default for ChannelSetup {
    fn default() -> Self {
        Self {
            eyes: vec![Eye::Combine, Eye::Right],
            fields: Field::ALL.to_vec(),
        }
    }
}

impl ChannelSetup {
    pub fn to_channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(
            self.eyes.iter().copied().collect(),
            self.fields.iter().copied().collect(),
        )
    }

    /// Eyes in canonical order, deduplicated.
    pub fn selected_eyes(&self) -> Vec<Eye> {
        Eye::ALL
            .into_iter()
            .filter(|eye| self.eyes.contains(eye))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Moving-window size for precision/accuracy, in samples
    pub window: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { window: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Session files land here; defaults to the user data dir
    pub output_dir: Option<PathBuf>,
    /// Hold rows in memory and write them at stop
    pub delay_write: bool,
    /// File tag used when none is supplied per session
    pub default_tag: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            delay_write: false,
            default_tag: "999".to_owned(),
        }
    }
}

pub fn default_output_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("EyeRecordingData")
}
