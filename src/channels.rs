//! Named numeric channels: the flat per-sample representation used for
//! recording and fan-out, and the parser that produces it.

use std::collections::HashMap;

use bitflags::bitflags;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::sample::{Eye, EyeValidity, RawSample};

/// Channel carrying the monotonic pipeline tick at parse time.
pub const CH_TIMING: &str = "ViveTiming";
/// Channel carrying the hardware frame sequence.
pub const CH_FRAMES: &str = "EyeFrames";

/// Flat mapping of channel name to a fixed-length numeric vector.
///
/// The key set is fully determined by the active [`ChannelConfig`] and is
/// stable for a session; a given key always maps to the same vector
/// length. Maps are created fresh per sample and never mutated after
/// being published.
pub type ChannelMap = HashMap<String, Vec<f64>>;

/// Converts a vector to its 3-component channel value.
pub fn vec3_channel(v: Vec3) -> Vec<f64> {
    vec![v.x as f64, v.y as f64, v.z as f64]
}

/// Converts a rotation to its 4-component channel value.
pub fn quat_channel(q: Quat) -> Vec<f64> {
    vec![q.x as f64, q.y as f64, q.z as f64, q.w as f64]
}

/// Per-eye measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Origin,
    GazeDir,
    PupilSensor,
    Diameter,
    Openness,
    Validity,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Origin,
        Field::GazeDir,
        Field::PupilSensor,
        Field::Diameter,
        Field::Openness,
        Field::Validity,
    ];

    /// Label used in channel keys, e.g. `Left_Openness`.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Origin => "Origin",
            Field::GazeDir => "GazeDir",
            Field::PupilSensor => "PupilSensor",
            Field::Diameter => "Diameter",
            Field::Openness => "Openness",
            Field::Validity => "Validity",
        }
    }

    /// Number of components this field occupies in a channel value.
    pub fn components(&self) -> usize {
        match self {
            Field::Origin | Field::GazeDir => 3,
            Field::PupilSensor => 2,
            Field::Diameter | Field::Openness | Field::Validity => 1,
        }
    }

    /// Physical per-eye metrics that do not exist for the combined eye.
    pub fn per_eye_only(&self) -> bool {
        matches!(self, Field::PupilSensor | Field::Diameter | Field::Openness)
    }
}

bitflags! {
    /// Which eyes are parsed into channels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EyeSelection: u8 {
        const COMBINE = 1 << 0;
        const LEFT = 1 << 1;
        const RIGHT = 1 << 2;
    }
}

impl From<Eye> for EyeSelection {
    fn from(eye: Eye) -> Self {
        match eye {
            Eye::Combine => EyeSelection::COMBINE,
            Eye::Left => EyeSelection::LEFT,
            Eye::Right => EyeSelection::RIGHT,
        }
    }
}

impl FromIterator<Eye> for EyeSelection {
    fn from_iter<I: IntoIterator<Item = Eye>>(iter: I) -> Self {
        iter.into_iter()
            .fold(EyeSelection::empty(), |acc, e| acc | e.into())
    }
}

bitflags! {
    /// Which per-eye fields are parsed into channels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldSelection: u8 {
        const ORIGIN = 1 << 0;
        const GAZE_DIR = 1 << 1;
        const PUPIL_SENSOR = 1 << 2;
        const DIAMETER = 1 << 3;
        const OPENNESS = 1 << 4;
        const VALIDITY = 1 << 5;
    }
}

impl From<Field> for FieldSelection {
    fn from(field: Field) -> Self {
        match field {
            Field::Origin => FieldSelection::ORIGIN,
            Field::GazeDir => FieldSelection::GAZE_DIR,
            Field::PupilSensor => FieldSelection::PUPIL_SENSOR,
            Field::Diameter => FieldSelection::DIAMETER,
            Field::Openness => FieldSelection::OPENNESS,
            Field::Validity => FieldSelection::VALIDITY,
        }
    }
}

impl FromIterator<Field> for FieldSelection {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        iter.into_iter()
            .fold(FieldSelection::empty(), |acc, f| acc | f.into())
    }
}

/// Ordered list of `(channel name, component count)` pairs.
///
/// Fixed once a recording session starts; the recorder derives its CSV
/// header from this and rejects duplicate keys up front instead of
/// discovering mismatches row by row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSchema {
    fields: Vec<(String, usize)>,
}

impl ChannelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, components: usize) {
        self.fields.push((name.into(), components));
    }

    pub fn extend_from(&mut self, other: &ChannelSchema) {
        self.fields.extend(other.fields.iter().cloned());
    }

    pub fn fields(&self) -> &[(String, usize)] {
        &self.fields
    }

    /// Total data columns across all fields.
    pub fn column_count(&self) -> usize {
        self.fields.iter().map(|(_, n)| n).sum()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }
}

/// Active eye/field selection for channel parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub eyes: EyeSelection,
    pub fields: FieldSelection,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            eyes: EyeSelection::all(),
            fields: FieldSelection::all(),
        }
    }
}

impl ChannelConfig {
    pub fn new(eyes: EyeSelection, fields: FieldSelection) -> Self {
        Self { eyes, fields }
    }

    fn includes(&self, eye: Eye, field: Field) -> bool {
        if !self.eyes.contains(eye.into()) || !self.fields.contains(field.into()) {
            return false;
        }
        // no physical metrics for the synthetic combined eye
        !(eye == Eye::Combine && field.per_eye_only())
    }

    /// Schema of every channel [`ChannelParser::parse`] will emit under
    /// this configuration, timing and frame channels included.
    pub fn schema(&self) -> ChannelSchema {
        let mut schema = ChannelSchema::new();
        schema.push(CH_FRAMES, 1);
        schema.push(CH_TIMING, 1);
        for eye in Eye::ALL {
            for field in Field::ALL {
                if self.includes(eye, field) {
                    schema.push(
                        format!("{}_{}", eye.label(), field.label()),
                        field.components(),
                    );
                }
            }
        }
        schema
    }
}

/// Pure parser from [`RawSample`] to [`ChannelMap`].
///
/// The timestamp tick is an argument rather than an ambient clock read,
/// so identical inputs always produce identical maps.
#[derive(Debug, Clone, Default)]
pub struct ChannelParser {
    config: ChannelConfig,
}

impl ChannelParser {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn parse(&self, sample: &RawSample, tick: f64) -> ChannelMap {
        let mut values = ChannelMap::with_capacity(2 + 3 * Field::ALL.len());
        values.insert(CH_TIMING.to_owned(), vec![tick]);
        values.insert(CH_FRAMES.to_owned(), vec![sample.frame_sequence as f64]);

        for eye in Eye::ALL {
            let data = sample.eye(eye);
            for field in Field::ALL {
                if !self.config.includes(eye, field) {
                    continue;
                }
                let value = match field {
                    Field::Origin => vec3_channel(data.origin_mm),
                    Field::GazeDir => vec3_channel(data.gaze_dir),
                    Field::PupilSensor => {
                        vec![data.pupil_sensor.x as f64, data.pupil_sensor.y as f64]
                    }
                    Field::Diameter => vec![data.pupil_diameter_mm as f64],
                    Field::Openness => vec![data.openness as f64],
                    Field::Validity => {
                        let valid = data.validity.contains(EyeValidity::GAZE_DIRECTION);
                        vec![if valid { 1.0 } else { 0.0 }]
                    }
                };
                values.insert(format!("{}_{}", eye.label(), field.label()), value);
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    fn sample() -> RawSample {
        let mut s = RawSample {
            frame_sequence: 42,
            timestamp_ms: 7,
            ..Default::default()
        };
        s.right.origin_mm = Vec3::new(1.0, 2.0, 3.0);
        s.right.gaze_dir = Vec3::new(0.0, 0.0, 1.0);
        s.right.pupil_sensor = Vec2::new(0.5, 0.25);
        s.right.pupil_diameter_mm = 3.5;
        s.right.openness = 1.0;
        s.right.validity = EyeValidity::all();
        s
    }

    #[test]
    fn parse_is_deterministic() {
        let parser = ChannelParser::default();
        let s = sample();
        assert_eq!(parser.parse(&s, 123.0), parser.parse(&s, 123.0));
    }

    #[test]
    fn key_set_matches_schema() {
        let config = ChannelConfig::new(
            [Eye::Combine, Eye::Right].into_iter().collect(),
            FieldSelection::all(),
        );
        let parser = ChannelParser::new(config);
        let values = parser.parse(&sample(), 0.0);

        let schema = config.schema();
        assert_eq!(values.len(), schema.fields().len());
        for (name, len) in schema.fields() {
            let value = values
                .get(name)
                .unwrap_or_else(|| panic!("missing channel {name}"));
            assert_eq!(value.len(), *len, "wrong width for {name}");
        }
    }

    #[test]
    fn combined_eye_has_no_physical_metrics() {
        let values = ChannelParser::default().parse(&sample(), 0.0);
        assert!(values.contains_key("Combine_GazeDir"));
        assert!(!values.contains_key("Combine_Diameter"));
        assert!(!values.contains_key("Combine_Openness"));
        assert!(!values.contains_key("Combine_PupilSensor"));
        assert!(values.contains_key("Right_Diameter"));
    }

    #[test]
    fn validity_encoded_as_flag() {
        let values = ChannelParser::default().parse(&sample(), 0.0);
        assert_eq!(values["Right_Validity"], vec![1.0]);
        assert_eq!(values["Left_Validity"], vec![0.0]);
    }

    #[test]
    fn frame_and_timing_channels_present() {
        let values = ChannelParser::default().parse(&sample(), 55.5);
        assert_eq!(values[CH_FRAMES], vec![42.0]);
        assert_eq!(values[CH_TIMING], vec![55.5]);
    }
}
