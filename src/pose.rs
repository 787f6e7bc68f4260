//! Device poses and the delay buffer that compensates for the tracker's
//! internal pipeline latency.

use std::collections::VecDeque;

use glam::{Quat, Vec3};

/// World pose of one tracked device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSnapshot {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for PoseSnapshot {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl PoseSnapshot {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Forward direction under the source convention (+Z forward).
    pub fn forward(&self) -> Vec3 {
        (self.rotation * Vec3::Z).normalize_or_zero()
    }
}

/// Head pose plus whatever secondary devices are tracked this tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseFrame {
    pub head: PoseSnapshot,
    pub secondary: Vec<PoseSnapshot>,
}

impl PoseFrame {
    pub fn head_only(head: PoseSnapshot) -> Self {
        Self {
            head,
            secondary: Vec::new(),
        }
    }
}

/// Pose seam: sampled once per worker iteration, at tracker cadence
/// rather than any GUI frame rate.
pub trait PoseSource: Send {
    fn sample(&mut self) -> PoseFrame;
}

/// Bounded FIFO pairing "now's" eye sample with the pose captured a few
/// polls earlier.
///
/// The tracker pipeline has an inherent multi-frame internal latency, so
/// geometry computed against the instantaneous pose is misaligned;
/// delaying the pose by `depth - 1` polls matches the two streams up.
/// During warm-up the freshest frame is used instead, with degraded
/// accuracy expected at session start.
#[derive(Debug, Clone)]
pub struct PoseDelayBuffer {
    frames: VecDeque<PoseFrame>,
    depth: usize,
    delay_all: bool,
}

impl PoseDelayBuffer {
    /// A depth of 1 disables the delay entirely.
    pub fn new(depth: usize) -> Self {
        Self::with_delay_all(depth, true)
    }

    /// `delay_all` selects whether secondary device poses are delayed
    /// along with the head or passed through current.
    pub fn with_delay_all(depth: usize, delay_all: bool) -> Self {
        let depth = depth.max(1);
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
            delay_all,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Warmed up once `depth` frames have been buffered.
    pub fn is_warm(&self) -> bool {
        self.frames.len() >= self.depth
    }

    /// Append a frame, keeping at most `depth` buffered.
    pub fn push(&mut self, frame: PoseFrame) {
        self.frames.push_back(frame);
        while self.frames.len() > self.depth {
            self.frames.pop_front();
        }
    }

    /// Remove and return the oldest buffered frame.
    pub fn pop_oldest(&mut self) -> Option<PoseFrame> {
        self.frames.pop_front()
    }

    /// Push the current capture and get back the frame geometry should
    /// use: the one captured `depth - 1` polls ago once warm, the
    /// current one before that.
    pub fn delay(&mut self, frame: PoseFrame) -> PoseFrame {
        let current_secondary = (!self.delay_all).then(|| frame.secondary.clone());
        self.push(frame);
        if !self.is_warm() {
            return self.frames.back().cloned().unwrap_or_default();
        }
        let mut delayed = self.pop_oldest().unwrap_or_default();
        if let Some(secondary) = current_secondary {
            delayed.secondary = secondary;
        }
        delayed
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: f32) -> PoseFrame {
        PoseFrame::head_only(PoseSnapshot::new(Vec3::new(tag, 0.0, 0.0), Quat::IDENTITY))
    }

    #[test]
    fn warm_up_returns_current_frame() {
        let mut buffer = PoseDelayBuffer::new(3);
        assert_eq!(buffer.delay(frame(1.0)).head.position.x, 1.0);
        assert_eq!(buffer.delay(frame(2.0)).head.position.x, 2.0);
    }

    #[test]
    fn warm_buffer_delays_by_depth_minus_one() {
        let mut buffer = PoseDelayBuffer::new(3);
        for tag in 1..=2 {
            buffer.delay(frame(tag as f32));
        }
        // from the third push on, the returned frame lags by two polls
        for tag in 3..=10 {
            let delayed = buffer.delay(frame(tag as f32));
            assert_eq!(delayed.head.position.x, (tag - 2) as f32);
        }
    }

    #[test]
    fn pop_oldest_returns_pose_pushed_depth_ago() {
        let depth = 4;
        let mut buffer = PoseDelayBuffer::new(depth);
        for tag in 1..=9 {
            buffer.push(frame(tag as f32));
        }
        // len is capped at depth, so the front is the depth-th most recent
        assert_eq!(buffer.len(), depth);
        let oldest = buffer.pop_oldest().expect("buffer is warm");
        assert_eq!(oldest.head.position.x, (9 - depth + 1) as f32);
    }

    #[test]
    fn depth_one_disables_delay() {
        let mut buffer = PoseDelayBuffer::new(1);
        for tag in 1..=5 {
            let delayed = buffer.delay(frame(tag as f32));
            assert_eq!(delayed.head.position.x, tag as f32);
        }
    }

    #[test]
    fn secondary_poses_pass_through_when_not_delayed() {
        let mut buffer = PoseDelayBuffer::with_delay_all(2, false);
        let mut first = frame(1.0);
        first.secondary.push(PoseSnapshot::new(Vec3::splat(1.0), Quat::IDENTITY));
        buffer.delay(first);

        let mut second = frame(2.0);
        second
            .secondary
            .push(PoseSnapshot::new(Vec3::splat(2.0), Quat::IDENTITY));
        let delayed = buffer.delay(second);

        // head lags one poll, secondary devices stay current
        assert_eq!(delayed.head.position.x, 1.0);
        assert_eq!(delayed.secondary[0].position, Vec3::splat(2.0));
    }
}
