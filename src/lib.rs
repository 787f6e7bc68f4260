//! Real-time eye-tracking acquisition and gaze-geometry pipeline.
//!
//! A dedicated worker thread polls the tracker SDK at its native rate,
//! filters duplicate frames, converts raw per-eye vectors into
//! world-relative gaze geometry (angles, fixation points, windowed
//! precision/accuracy statistics), records named channels to per-session
//! CSV files, and hands coalesced snapshots across the thread boundary
//! to a polling consumer.

pub mod bridge;
pub mod channels;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod geometry;
pub mod pose;
pub mod recorder;
pub mod sample;
pub mod stats;

// Re-export the types a typical embedding touches
pub use bridge::{latest_channel, GazeFrame, GazeState, LatestReceiver, LatestSender};
pub use channels::{
    ChannelConfig, ChannelMap, ChannelParser, ChannelSchema, EyeSelection, Field, FieldSelection,
};
pub use config::RigConfig;
pub use controller::GazeController;
pub use device::{EyeTrackerDevice, PipelineClock};
pub use error::{GazeError, GazeResult};
pub use pose::{PoseDelayBuffer, PoseFrame, PoseSnapshot, PoseSource};
pub use recorder::DataRecorder;
pub use sample::{Eye, EyeSample, EyeValidity, RawSample, SampleSource};
pub use stats::{
    AccuracyWindow, MovingWindow, PrecisionWindow, ValidationMonitor, ValidationSnapshot,
};
