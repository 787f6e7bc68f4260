//! Demo capture run against a synthetic tracker: starts the full
//! pipeline, records a short session to CSV and prints the live
//! validation numbers.

use std::time::{Duration, Instant};

use anyhow::Result;
use glam::{Quat, Vec2, Vec3};
use tracing::info;

use vive_gaze_capture::{
    EyeSample, EyeValidity, GazeController, PoseFrame, PoseSnapshot, PoseSource, RawSample,
    RigConfig, SampleSource,
};

/// Synthetic 120 Hz tracker: gaze sweeps a small sinusoid around
/// straight ahead. Frames advance with wall time, so busy-polling sees
/// plenty of duplicates, just like the real SDK.
struct SimulatedTracker {
    started: Instant,
    rate_hz: f64,
}

impl SimulatedTracker {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            rate_hz: 120.0,
        }
    }
}

impl SampleSource for SimulatedTracker {
    fn poll(&mut self) -> Option<RawSample> {
        let elapsed = self.started.elapsed().as_secs_f64();
        let frame = (elapsed * self.rate_hz) as i64;

        // a few degrees of horizontal sweep
        let sweep = (elapsed * 2.0).sin() as f32 * 5f32.to_radians();
        let direction = Vec3::new(sweep.sin(), 0.0, sweep.cos()).normalize();
        let eye = EyeSample {
            origin_mm: Vec3::new(0.0, 0.0, -30.0),
            gaze_dir: direction,
            pupil_sensor: Vec2::new(0.5, 0.5),
            pupil_diameter_mm: 3.5,
            openness: 1.0,
            validity: EyeValidity::all(),
        };
        Some(RawSample {
            frame_sequence: frame,
            timestamp_ms: (elapsed * 1000.0) as i64,
            combine: eye,
            left: eye,
            right: eye,
        })
    }
}

/// Stationary rig: head at the origin, facing +Z.
struct StaticRig;

impl PoseSource for StaticRig {
    fn sample(&mut self) -> PoseFrame {
        PoseFrame::head_only(PoseSnapshot::new(Vec3::ZERO, Quat::IDENTITY))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = RigConfig::default();
    config.recording.output_dir = Some(std::env::temp_dir().join("vive-gaze-capture-demo"));

    let mut controller = GazeController::new(
        config,
        Box::new(SimulatedTracker::new()),
        Box::new(StaticRig),
    );
    controller.set_target(Vec3::new(0.0, 0.0, 1.0));
    controller.start()?;
    controller.start_recording("demo", true)?;

    let session = controller
        .recorder()
        .session_path()
        .expect("session was just initialized");
    info!(path = %session.display(), "recording demo session");

    // main-context loop: drain the bridge at a GUI-like cadence
    let run_until = Instant::now() + Duration::from_secs(2);
    while Instant::now() < run_until {
        if controller.tick() {
            let gaze = controller.gaze();
            let validation = controller.validation();
            info!(
                gaze_point = ?gaze.gaze_point.to_array(),
                precision = ?validation.precision,
                accuracy = ?validation.accuracy,
                "sample"
            );
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    controller.stop_recording();
    controller.stop();
    info!(path = %session.display(), "demo session written");
    Ok(())
}
