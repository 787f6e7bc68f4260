//! Raw sample model and the hardware poll seam.

use bitflags::bitflags;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-field validity mask reported by the tracker for one eye.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EyeValidity: u32 {
        const ORIGIN = 1 << 0;
        const GAZE_DIRECTION = 1 << 1;
        const PUPIL_DIAMETER = 1 << 2;
        const SENSOR_POSITION = 1 << 3;
        const OPENNESS = 1 << 4;
    }
}

/// Eye selector. `Combine` is the tracker's synthetic cyclopean eye and
/// carries no per-eye physical metrics (diameter, openness, sensor
/// position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    Combine,
    Left,
    Right,
}

impl Eye {
    pub const ALL: [Eye; 3] = [Eye::Combine, Eye::Left, Eye::Right];

    /// Label used in channel keys and CSV headers, e.g. `Right_GazeDir`.
    pub fn label(&self) -> &'static str {
        match self {
            Eye::Combine => "Combine",
            Eye::Left => "Left",
            Eye::Right => "Right",
        }
    }
}

/// Measurements for a single eye (or the synthetic combined eye).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeSample {
    /// Gaze origin relative to the lens, millimetres
    pub origin_mm: Vec3,
    /// Normalized gaze direction in the eye-local frame
    pub gaze_dir: Vec3,
    /// Pupil position on the sensor, normalized
    pub pupil_sensor: Vec2,
    /// Pupil diameter, millimetres
    pub pupil_diameter_mm: f32,
    /// Eye openness, 0 (closed) to 1 (open)
    pub openness: f32,
    pub validity: EyeValidity,
}

/// One raw sample from the tracker SDK.
///
/// `frame_sequence` increases with every new hardware frame (it may wrap)
/// and is the only reliable novelty signal: a successful poll can return
/// the same frame more than once.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawSample {
    pub frame_sequence: i64,
    pub timestamp_ms: i64,
    pub combine: EyeSample,
    pub left: EyeSample,
    pub right: EyeSample,
}

impl RawSample {
    /// Measurement record for one eye selector.
    pub fn eye(&self, eye: Eye) -> &EyeSample {
        match eye {
            Eye::Combine => &self.combine,
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }
}

/// Hardware seam: one poll yields whatever sample the SDK currently
/// holds. `None` signals a transient failure and is retried on the next
/// iteration; `Some` does not imply the frame is new.
pub trait SampleSource: Send {
    fn poll(&mut self) -> Option<RawSample>;

    /// Gate owned by the collaborator framework. While this is `false`
    /// the worker skips the iteration entirely; it is never an error.
    fn ready(&self) -> bool {
        true
    }
}
