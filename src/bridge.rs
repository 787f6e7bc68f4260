//! Worker-to-consumer handoff where only the newest value matters.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use glam::{Quat, Vec3};

/// Sending half of a [`latest_channel`]. Never blocks.
#[derive(Debug)]
pub struct LatestSender<T>(Sender<T>);

/// Receiving half of a [`latest_channel`].
#[derive(Debug)]
pub struct LatestReceiver<T>(Receiver<T>);

/// Unbounded multi-producer channel with coalescing reads: the consumer
/// drains everything pending on each call and keeps only the last item.
/// Consumers observe a suffix of the publish order; intermediate values
/// carry no guarantee.
pub fn latest_channel<T>() -> (LatestSender<T>, LatestReceiver<T>) {
    let (tx, rx) = unbounded();
    (LatestSender(tx), LatestReceiver(rx))
}

impl<T> Clone for LatestSender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> LatestSender<T> {
    /// Publish a value. Returns `false` once the consumer side is gone.
    pub fn publish(&self, value: T) -> bool {
        self.0.send(value).is_ok()
    }
}

impl<T> LatestReceiver<T> {
    /// Drain all pending values and return the newest, if any.
    pub fn drain_latest(&self) -> Option<T> {
        let mut latest = None;
        loop {
            match self.0.try_recv() {
                Ok(value) => latest = Some(value),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        latest
    }
}

/// Per-sample tuple the worker publishes for main-context consumption.
#[derive(Debug, Clone, Copy, Default)]
pub struct GazeFrame {
    pub head_position: Vec3,
    /// Eye-local gaze direction of the primary eye, normalized
    pub eye_vector: Vec3,
    /// Head forward direction in world space
    pub head_vector: Vec3,
    pub head_rotation: Quat,
    /// Gaze direction rotated into the world frame
    pub world_gaze_vector: Vec3,
    /// Estimated fixation point
    pub gaze_point: Vec3,
    /// Eye origin relative to the head, metres
    pub gaze_origin_offset: Vec3,
}

/// Main-context snapshot of the newest published frame.
///
/// Call [`GazeState::tick`] once per scheduling tick; the fields then
/// read as plain state, the way the rest of the application expects.
#[derive(Debug)]
pub struct GazeState {
    receiver: LatestReceiver<GazeFrame>,
    frame: GazeFrame,
    has_data: bool,
}

impl GazeState {
    pub fn new(receiver: LatestReceiver<GazeFrame>) -> Self {
        Self {
            receiver,
            frame: GazeFrame::default(),
            has_data: false,
        }
    }

    /// Drain the bridge. Returns `true` when a newer frame was applied.
    pub fn tick(&mut self) -> bool {
        match self.receiver.drain_latest() {
            Some(frame) => {
                self.frame = frame;
                self.has_data = true;
                true
            }
            None => false,
        }
    }

    /// Whether any sample has arrived since construction.
    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn frame(&self) -> &GazeFrame {
        &self.frame
    }

    pub fn head_position(&self) -> Vec3 {
        self.frame.head_position
    }

    pub fn head_rotation(&self) -> Quat {
        self.frame.head_rotation
    }

    pub fn world_gaze_vector(&self) -> Vec3 {
        self.frame.world_gaze_vector
    }

    pub fn gaze_point(&self) -> Vec3 {
        self.frame.gaze_point
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_keeps_only_newest() {
        let (tx, rx) = latest_channel();
        for i in 0..100 {
            tx.publish(i);
        }
        assert_eq!(rx.drain_latest(), Some(99));
        assert_eq!(rx.drain_latest(), None);
    }

    #[test]
    fn state_tick_applies_latest_frame() {
        let (tx, rx) = latest_channel();
        let mut state = GazeState::new(rx);
        assert!(!state.tick());
        assert!(!state.has_data());

        tx.publish(GazeFrame {
            gaze_point: Vec3::new(0.0, 0.0, 2.0),
            ..Default::default()
        });
        tx.publish(GazeFrame {
            gaze_point: Vec3::new(0.0, 0.0, 5.0),
            ..Default::default()
        });

        assert!(state.tick());
        assert!(state.has_data());
        assert_eq!(state.gaze_point(), Vec3::new(0.0, 0.0, 5.0));

        // no new publishes: state is stable, tick reports nothing fresh
        assert!(!state.tick());
        assert_eq!(state.gaze_point(), Vec3::new(0.0, 0.0, 5.0));
    }
}
