//! End-to-end pipeline tests: scripted tracker and rig through the
//! controller, checking the main-context snapshot, the validation
//! numbers and the recorded CSV.

use std::fs;
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use tempfile::TempDir;

use vive_gaze_capture::{
    EyeSample, EyeValidity, GazeController, GazeError, PoseFrame, PoseSnapshot, PoseSource,
    RawSample, RigConfig, SampleSource,
};

const FRAME_COUNT: i64 = 50;

/// Fifty novel frames of straight-ahead gaze, then duplicates forever.
struct FixedGazeSource {
    next_frame: i64,
}

impl FixedGazeSource {
    fn new() -> Self {
        Self { next_frame: 1 }
    }

    fn sample(frame: i64) -> RawSample {
        let eye = EyeSample {
            origin_mm: Vec3::new(0.0, 0.0, -30.0),
            gaze_dir: Vec3::Z,
            openness: 1.0,
            pupil_diameter_mm: 3.0,
            validity: EyeValidity::all(),
            ..Default::default()
        };
        RawSample {
            frame_sequence: frame,
            combine: eye,
            left: eye,
            right: eye,
            ..Default::default()
        }
    }
}

impl SampleSource for FixedGazeSource {
    fn poll(&mut self) -> Option<RawSample> {
        let frame = self.next_frame.min(FRAME_COUNT);
        if self.next_frame <= FRAME_COUNT {
            self.next_frame += 1;
        }
        Some(Self::sample(frame))
    }
}

struct NeverReadySource(FixedGazeSource);

impl SampleSource for NeverReadySource {
    fn poll(&mut self) -> Option<RawSample> {
        self.0.poll()
    }

    fn ready(&self) -> bool {
        false
    }
}

/// Head at the origin, facing +Z.
struct StaticRig;

impl PoseSource for StaticRig {
    fn sample(&mut self) -> PoseFrame {
        PoseFrame::head_only(PoseSnapshot::new(Vec3::ZERO, Quat::IDENTITY))
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn test_config(dir: &TempDir) -> RigConfig {
    let mut config = RigConfig::default();
    config.recording.output_dir = Some(dir.path().to_path_buf());
    config
}

#[test]
fn end_to_end_records_and_publishes() {
    let dir = TempDir::new().expect("temp dir");
    let mut controller = GazeController::new(
        test_config(&dir),
        Box::new(FixedGazeSource::new()),
        Box::new(StaticRig),
    );
    controller.set_target(Vec3::new(0.0, 0.0, 1.0));
    controller
        .start_recording("p01", true)
        .expect("session starts");
    controller.start().expect("pipeline starts");

    assert!(wait_until(Duration::from_secs(2), || {
        controller
            .latest_raw()
            .is_some_and(|sample| sample.frame_sequence == FRAME_COUNT)
    }));
    // the last row is written moments after the last sample is visible
    std::thread::sleep(Duration::from_millis(200));

    // main-context snapshot: looking straight at the target
    assert!(controller.tick());
    let gaze = controller.gaze();
    assert!((gaze.world_gaze_vector - Vec3::Z).length() < 1e-4);
    assert!((gaze.gaze_point - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-4);
    assert!((gaze.head_position - Vec3::ZERO).length() < 1e-6);

    // perfectly steady, perfectly on target
    let validation = controller.validation();
    assert!(validation.precision[0].abs() < 1e-3);
    assert!(validation.accuracy[0].abs() < 1e-3);
    assert!(validation.accuracy[1].abs() < 1e-3);
    assert!(validation.valid);
    assert!((validation.openness - 1.0).abs() < 1e-6);

    controller.stop_recording();
    controller.stop();
    assert!(!controller.is_running());

    // one session file, named from the tag with sequence zero
    let entries: Vec<_> = fs::read_dir(dir.path())
        .expect("output dir")
        .map(|entry| entry.expect("entry").file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("p01_000_"));
    assert!(entries[0].ends_with(".csv"));

    let contents = fs::read_to_string(dir.path().join(&entries[0])).expect("session file");
    let mut lines = contents.lines();
    let header = lines.next().expect("header row");
    assert!(header.starts_with("S0100_RecTime,"));
    assert!(header.contains("V0300_HMDPos"));
    assert!(header.contains("S0100_EyeFrames"));
    assert!(header.contains("V0300_Combine_GazeDir"));
    assert!(header.contains("V0300_Combine_GazePoint"));

    // every column of every row is addressed by the fixed schema
    let expected_columns = controller.schema().column_count() + 1;
    assert_eq!(header.split(',').count(), expected_columns);
    let rows: Vec<_> = lines.collect();
    assert_eq!(rows.len(), FRAME_COUNT as usize);
    for row in rows {
        assert_eq!(row.split(',').count(), expected_columns);
    }
}

#[test]
fn ready_gate_timeout_is_fatal() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = test_config(&dir);
    config.acquisition.ready_timeout_secs = 0;

    let mut controller = GazeController::new(
        config,
        Box::new(NeverReadySource(FixedGazeSource::new())),
        Box::new(StaticRig),
    );
    let error = controller.start().expect_err("gate never opens");
    assert!(matches!(error, GazeError::DeviceNotReady(_)));
    assert!(!controller.is_running());
}

#[test]
fn default_target_sits_ahead_of_head() {
    let dir = TempDir::new().expect("temp dir");
    let mut controller = GazeController::new(
        test_config(&dir),
        Box::new(FixedGazeSource::new()),
        Box::new(StaticRig),
    );
    // no target set: falls back to head position + 1m along +Z
    controller.start().expect("pipeline starts");

    assert!(wait_until(Duration::from_secs(2), || controller.tick()));
    let gaze = controller.gaze();
    assert!((gaze.gaze_point - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-4);
    controller.stop();
}

#[test]
fn extension_channels_are_recorded() {
    let dir = TempDir::new().expect("temp dir");
    let mut controller = GazeController::new(
        test_config(&dir),
        Box::new(FixedGazeSource::new()),
        Box::new(StaticRig),
    );

    let mut extra = vive_gaze_capture::ChannelSchema::new();
    extra.push("TrialPhase", 1);
    controller.add_channels(extra, |_, values| {
        values.insert("TrialPhase".to_owned(), vec![2.0]);
    });

    controller
        .start_recording("ext", true)
        .expect("session starts");
    controller.start().expect("pipeline starts");
    assert!(wait_until(Duration::from_secs(2), || {
        controller
            .latest_raw()
            .is_some_and(|sample| sample.frame_sequence == FRAME_COUNT)
    }));
    std::thread::sleep(Duration::from_millis(200));
    controller.stop();

    let entry = fs::read_dir(dir.path())
        .expect("output dir")
        .next()
        .expect("session file")
        .expect("entry");
    let contents = fs::read_to_string(entry.path()).expect("session file");
    let mut lines = contents.lines();
    let header = lines.next().expect("header row");
    let column = header
        .split(',')
        .position(|name| name == "S0100_TrialPhase")
        .expect("extension column present");
    let row = lines.next().expect("data row");
    assert_eq!(row.split(',').nth(column), Some("2"));
}
