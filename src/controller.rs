//! The pipeline context object: owns the worker, recorder, delay buffer
//! and handoff channels, and runs the per-sample geometry pass on the
//! acquisition thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use parking_lot::RwLock;
use tracing::info;

use crate::bridge::{latest_channel, GazeFrame, GazeState, LatestReceiver, LatestSender};
use crate::channels::{quat_channel, vec3_channel, ChannelMap, ChannelParser, ChannelSchema, Field};
use crate::config::RigConfig;
use crate::device::{EyeTrackerDevice, PipelineClock};
use crate::error::{GazeError, GazeResult};
use crate::geometry;
use crate::pose::{PoseDelayBuffer, PoseFrame, PoseSnapshot, PoseSource};
use crate::recorder::DataRecorder;
use crate::sample::{Eye, RawSample, SampleSource};
use crate::stats::{ValidationMonitor, ValidationSnapshot};

/// Head forward vector, world frame.
pub const CH_HMD_VEC: &str = "HMDVec";
/// Head position, world frame.
pub const CH_HMD_POS: &str = "HMDPos";
/// Head rotation quaternion.
pub const CH_HMD_ROT: &str = "HMDRot";
/// Active gaze target position.
pub const CH_GAZE_TARGET: &str = "GazeTarget";

/// Per-eye derived channel suffixes.
pub const DERIVED_TARGET_ANGLES: &str = "HMD2TargAng";
pub const DERIVED_EYE_ANGLES: &str = "HMD2EyeAng";
pub const DERIVED_GAZE_POINT: &str = "GazePoint";

/// Hook for caller-defined channels appended to every sample.
pub type ChannelExtension = Box<dyn FnMut(&PoseFrame, &mut ChannelMap) + Send>;

/// Explicitly constructed, explicitly owned pipeline context.
///
/// Wires a [`SampleSource`] and a [`PoseSource`] into the acquisition
/// worker, computes world-relative gaze channels per novel sample on the
/// worker thread, and exposes main-context state through [`GazeState`]
/// plus a coalesced [`ValidationSnapshot`]. Start and stop are an
/// explicit method pair; one controller drives one acquisition run.
pub struct GazeController {
    config: RigConfig,
    device: EyeTrackerDevice,
    recorder: Arc<DataRecorder>,
    clock: PipelineClock,
    target: Arc<RwLock<Option<Vec3>>>,
    schema: ChannelSchema,
    state: GazeState,
    validation_receiver: LatestReceiver<ValidationSnapshot>,
    validation: ValidationSnapshot,
    // staged until start
    source: Option<Box<dyn SampleSource>>,
    poses: Option<Box<dyn PoseSource>>,
    bridge_sender: Option<LatestSender<GazeFrame>>,
    monitor: Option<ValidationMonitor>,
    extension: Option<ChannelExtension>,
}

impl GazeController {
    pub fn new(
        config: RigConfig,
        source: Box<dyn SampleSource>,
        poses: Box<dyn PoseSource>,
    ) -> Self {
        let parser = ChannelParser::new(config.channels.to_channel_config());
        let clock = PipelineClock::new();
        let mut device = EyeTrackerDevice::with_clock(parser, clock.clone());
        device.set_stop_grace(config.acquisition.stop_grace());

        let recorder = Arc::new(DataRecorder::with_delay_write(
            config.output_dir(),
            config.recording.delay_write,
        ));
        let (bridge_sender, bridge_receiver) = latest_channel();
        let (monitor, validation_receiver) = ValidationMonitor::new(config.validation.window);
        let schema = session_schema(&config);

        Self {
            config,
            device,
            recorder,
            clock,
            target: Arc::new(RwLock::new(None)),
            schema,
            state: GazeState::new(bridge_receiver),
            validation_receiver,
            validation: ValidationSnapshot::default(),
            source: Some(source),
            poses: Some(poses),
            bridge_sender: Some(bridge_sender),
            monitor: Some(monitor),
            extension: None,
        }
    }

    /// Register extra channels computed per sample, for callers layering
    /// their own measurements on the stream. Must be called before
    /// [`GazeController::start`] and before any session begins so the
    /// header schema stays consistent.
    pub fn add_channels(
        &mut self,
        schema: ChannelSchema,
        extension: impl FnMut(&PoseFrame, &mut ChannelMap) + Send + 'static,
    ) {
        self.schema.extend_from(&schema);
        self.extension = Some(Box::new(extension));
    }

    /// Wait for the device-ready gate, then start the acquisition
    /// worker. Fails with [`GazeError::DeviceNotReady`] if the gate
    /// never opens within the configured window: no experiment can run
    /// without the tracker, so this is fatal for the session.
    pub fn start(&mut self) -> GazeResult<()> {
        let source = self.source.take().ok_or(GazeError::AlreadyRunning)?;
        let poses = self.poses.take().ok_or(GazeError::AlreadyRunning)?;

        let timeout = self.config.acquisition.ready_timeout();
        let deadline = Instant::now() + timeout;
        while !source.ready() {
            if Instant::now() >= deadline {
                self.source = Some(source);
                self.poses = Some(poses);
                return Err(GazeError::DeviceNotReady(timeout));
            }
            thread::sleep(Duration::from_millis(10));
        }

        let mut processor = SampleProcessor {
            delay: PoseDelayBuffer::with_delay_all(
                self.config.acquisition.queue_depth,
                self.config.acquisition.delay_all,
            ),
            poses,
            eyes: self.config.channels.selected_eyes(),
            target: Arc::clone(&self.target),
            recorder: Arc::clone(&self.recorder),
            monitor: self.monitor.take().ok_or(GazeError::AlreadyRunning)?,
            bridge: self.bridge_sender.take().ok_or(GazeError::AlreadyRunning)?,
            clock: self.clock.clone(),
            extension: self.extension.take(),
        };
        self.device
            .subscribe_channels(move |values| processor.process(values));
        self.device.start(source)?;
        info!("gaze controller started");
        Ok(())
    }

    /// Stop the worker (bounded grace) and close any open session.
    pub fn stop(&mut self) {
        self.device.stop();
        self.recorder.stop();
        info!("gaze controller stopped");
    }

    pub fn is_running(&self) -> bool {
        self.device.is_running()
    }

    /// Drain the cross-thread queues. Call once per main-context tick;
    /// returns `true` when a newer gaze frame was applied.
    pub fn tick(&mut self) -> bool {
        if let Some(snapshot) = self.validation_receiver.drain_latest() {
            self.validation = snapshot;
        }
        self.state.tick()
    }

    /// Newest gaze frame as of the last [`GazeController::tick`].
    pub fn gaze(&self) -> &GazeFrame {
        self.state.frame()
    }

    pub fn state(&self) -> &GazeState {
        &self.state
    }

    /// Newest validation snapshot as of the last tick.
    pub fn validation(&self) -> ValidationSnapshot {
        self.validation
    }

    /// Most recent raw sample, independent of the fan-out.
    pub fn latest_raw(&self) -> Option<RawSample> {
        self.device.latest_raw()
    }

    pub fn set_target(&self, position: Vec3) {
        *self.target.write() = Some(position);
    }

    /// With no target the pipeline falls back to one unit in front of
    /// the current head position.
    pub fn clear_target(&self) {
        *self.target.write() = None;
    }

    /// Header schema for recording sessions started by this controller.
    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    /// Set up a session file and optionally start recording into it.
    pub fn start_recording(&self, tag: &str, immediate_start: bool) -> GazeResult<()> {
        self.recorder.begin_session(&self.schema, immediate_start, tag)
    }

    /// Session with the configured default tag, recording immediately.
    pub fn start_recording_default(&self) -> GazeResult<()> {
        self.start_recording(&self.config.recording.default_tag, true)
    }

    pub fn stop_recording(&self) {
        self.recorder.stop();
    }

    pub fn recorder(&self) -> &DataRecorder {
        &self.recorder
    }
}

impl Drop for GazeController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Full header schema: continuous head channels, the parser's channels,
/// then the derived channels for each selected eye.
fn session_schema(config: &RigConfig) -> ChannelSchema {
    let mut schema = ChannelSchema::new();
    schema.push(CH_HMD_VEC, 3);
    schema.push(CH_HMD_POS, 3);
    schema.push(CH_HMD_ROT, 4);
    schema.push(CH_GAZE_TARGET, 3);
    schema.extend_from(&config.channels.to_channel_config().schema());
    for eye in config.channels.selected_eyes() {
        let label = eye.label();
        schema.push(format!("{label}_{DERIVED_TARGET_ANGLES}"), 3);
        schema.push(format!("{label}_{DERIVED_EYE_ANGLES}"), 3);
        schema.push(format!("{label}_{DERIVED_GAZE_POINT}"), 3);
    }
    schema
}

/// Runs on the acquisition thread, once per novel sample.
struct SampleProcessor {
    delay: PoseDelayBuffer,
    poses: Box<dyn PoseSource>,
    eyes: Vec<Eye>,
    target: Arc<RwLock<Option<Vec3>>>,
    recorder: Arc<DataRecorder>,
    monitor: ValidationMonitor,
    bridge: LatestSender<GazeFrame>,
    clock: PipelineClock,
    extension: Option<ChannelExtension>,
}

impl SampleProcessor {
    fn process(&mut self, values: &ChannelMap) {
        // published maps are snapshots; our additions go on a copy
        let mut values = values.clone();

        // pose captured now, delayed to line up with the tracker's
        // internal pipeline latency
        let current = self.poses.sample();
        let frame = self.delay.delay(current);
        let head = frame.head;

        values.insert(CH_HMD_POS.to_owned(), vec3_channel(head.position));
        values.insert(CH_HMD_ROT.to_owned(), quat_channel(head.rotation));
        let head_vector = head.forward();
        values.insert(CH_HMD_VEC.to_owned(), vec3_channel(head_vector));

        let target = (*self.target.read()).unwrap_or(head.position + Vec3::Z);

        for eye in self.eyes.clone() {
            eye_gaze_channels(eye, head, target, &mut values);
        }

        if let Some(primary) = self.primary_eye() {
            self.publish_frame(primary, head, head_vector, target, &values);
        }

        values.insert(CH_GAZE_TARGET.to_owned(), vec3_channel(target));

        if let Some(extension) = self.extension.as_mut() {
            extension(&frame, &mut values);
        }

        if self.recorder.is_recording() {
            self.recorder.record_row(&values, self.clock.ticks());
        }

        self.monitor.observe(&values);
    }

    /// Eye whose vectors feed the main-context frame.
    fn primary_eye(&self) -> Option<Eye> {
        [Eye::Combine, Eye::Right, Eye::Left]
            .into_iter()
            .find(|eye| self.eyes.contains(eye))
    }

    fn publish_frame(
        &self,
        eye: Eye,
        head: PoseSnapshot,
        head_vector: Vec3,
        target: Vec3,
        values: &ChannelMap,
    ) {
        let Some((eye_vector, origin_offset)) = eye_local_gaze(eye, values) else {
            return;
        };
        let world_gaze = geometry::eye_forward_world(eye_vector, head.rotation);
        let gaze_point = geometry::gaze_point_to_target(head.position, target, world_gaze);
        self.bridge.publish(GazeFrame {
            head_position: head.position,
            eye_vector,
            head_vector,
            head_rotation: head.rotation,
            world_gaze_vector: world_gaze,
            gaze_point,
            gaze_origin_offset: origin_offset,
        });
    }
}

/// Eye-local gaze direction (normalized) and origin offset in metres,
/// read back out of the parsed channels.
fn eye_local_gaze(eye: Eye, values: &ChannelMap) -> Option<(Vec3, Vec3)> {
    let direction = values.get(&format!("{}_{}", eye.label(), Field::GazeDir.label()))?;
    let origin = values.get(&format!("{}_{}", eye.label(), Field::Origin.label()))?;
    if direction.len() < 3 || origin.len() < 3 {
        return None;
    }
    let eye_vector = Vec3::new(direction[0] as f32, direction[1] as f32, direction[2] as f32)
        .normalize_or_zero();
    // origin is reported in millimetres
    let origin_offset = Vec3::new(origin[0] as f32, origin[1] as f32, origin[2] as f32) * 0.001;
    Some((eye_vector, origin_offset))
}

/// Derived gaze values for one eye: estimated fixation point, head
/// angles relative to the target, and eye-in-head angles.
fn eye_gaze_channels(eye: Eye, head: PoseSnapshot, target: Vec3, values: &mut ChannelMap) {
    let Some((eye_vector, origin_offset)) = eye_local_gaze(eye, values) else {
        return;
    };
    let label = eye.label();

    let world_gaze = geometry::eye_forward_world(eye_vector, head.rotation);
    let eye_position = head.position - origin_offset;
    let gaze_location = geometry::gaze_point_to_target(eye_position, target, world_gaze);
    values.insert(
        format!("{label}_{DERIVED_GAZE_POINT}"),
        vec3_channel(gaze_location),
    );

    let to_target = (target - eye_position).normalize_or_zero();
    let head_angles = geometry::angles_to_target(to_target, head.rotation, 90.0);
    values.insert(
        format!("{label}_{DERIVED_TARGET_ANGLES}"),
        vec3_channel(head_angles),
    );

    // vertical axis flipped so upward gaze reads positive
    let eye_angles = geometry::angles_local(eye_vector * Vec3::new(1.0, -1.0, 1.0), 0.0);
    values.insert(
        format!("{label}_{DERIVED_EYE_ANGLES}"),
        vec3_channel(eye_angles),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelParser;
    use crate::sample::{EyeSample, EyeValidity, RawSample};
    use glam::Quat;

    fn straight_ahead_sample() -> RawSample {
        let eye = EyeSample {
            gaze_dir: Vec3::Z,
            validity: EyeValidity::all(),
            openness: 1.0,
            ..Default::default()
        };
        RawSample {
            frame_sequence: 1,
            combine: eye,
            left: eye,
            right: eye,
            ..Default::default()
        }
    }

    #[test]
    fn derived_channels_for_straight_ahead_gaze() {
        let parser = ChannelParser::default();
        let mut values = parser.parse(&straight_ahead_sample(), 0.0);
        let head = PoseSnapshot::default();
        let target = Vec3::Z;

        eye_gaze_channels(Eye::Combine, head, target, &mut values);

        let gaze_point = &values["Combine_GazePoint"];
        assert!((gaze_point[0]).abs() < 1e-4);
        assert!((gaze_point[1]).abs() < 1e-4);
        assert!((gaze_point[2] - 1.0).abs() < 1e-4);

        // eyes and head both dead on target
        let target_angles = &values["Combine_HMD2TargAng"];
        assert!(target_angles[0].abs() < 1e-3);
        assert!(target_angles[1].abs() < 1e-3);
        let eye_angles = &values["Combine_HMD2EyeAng"];
        assert!(eye_angles[0].abs() < 1e-3);
        assert!(eye_angles[1].abs() < 1e-3);
    }

    #[test]
    fn session_schema_covers_continuous_and_derived_channels() {
        let config = RigConfig::default();
        let schema = session_schema(&config);
        for name in [
            CH_HMD_VEC,
            CH_HMD_POS,
            CH_HMD_ROT,
            CH_GAZE_TARGET,
            "EyeFrames",
            "ViveTiming",
            "Combine_GazeDir",
            "Right_Openness",
            "Combine_HMD2TargAng",
            "Right_GazePoint",
        ] {
            assert!(schema.contains(name), "schema missing {name}");
        }
        // default selection excludes the left eye entirely
        assert!(!schema.contains("Left_GazeDir"));
        assert!(!schema.contains("Left_GazePoint"));
    }

    #[test]
    fn rotated_head_keeps_target_angles_stable() {
        // head yawed 30 degrees away from a target straight ahead
        let head = PoseSnapshot::new(Vec3::ZERO, Quat::from_rotation_y(30f32.to_radians()));
        let parser = ChannelParser::default();
        let mut values = parser.parse(&straight_ahead_sample(), 0.0);
        eye_gaze_channels(Eye::Combine, head, Vec3::Z, &mut values);

        let target_angles = &values["Combine_HMD2TargAng"];
        assert!((target_angles[1].abs() - 30.0).abs() < 0.5);
    }
}
