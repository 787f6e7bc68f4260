//! Moving-window statistics for the validation overlay: windowed
//! precision (sample-to-sample jitter) and accuracy (mean offset from
//! the target).

use crate::bridge::{latest_channel, LatestReceiver, LatestSender};
use crate::channels::ChannelMap;
use std::collections::VecDeque;

/// Fixed-capacity FIFO with an incrementally maintained running sum.
///
/// The sum is updated as values enter and leave the window, never
/// recomputed from scratch, keeping each push O(1).
#[derive(Debug, Clone)]
pub struct MovingWindow {
    values: VecDeque<f64>,
    sum: f64,
    capacity: usize,
}

impl MovingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            sum: 0.0,
            capacity,
        }
    }

    /// Push a value and return the updated window mean.
    pub fn push(&mut self, value: f64) -> f64 {
        self.values.push_back(value);
        self.sum += value;
        while self.values.len() > self.capacity {
            if let Some(oldest) = self.values.pop_front() {
                self.sum -= oldest;
            }
        }
        self.mean()
    }

    /// Mean of the current window contents; 0 while empty. The count may
    /// be below capacity during warm-up.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

/// Windowed mean of |v_n - v_{n-1}|.
///
/// Approximates precision through successive differences rather than
/// deviation from a reference: it measures jitter, not bias.
#[derive(Debug, Clone)]
pub struct PrecisionWindow {
    window: MovingWindow,
    previous: f64,
}

impl PrecisionWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: MovingWindow::new(capacity),
            previous: 0.0,
        }
    }

    /// Push a sample and return the updated jitter estimate.
    pub fn push(&mut self, value: f64) -> f64 {
        let difference = (value - self.previous).abs();
        self.previous = value;
        self.window.push(difference)
    }

    pub fn value(&self) -> f64 {
        self.window.mean()
    }
}

/// Windowed mean of values already expressed as offsets from ground
/// truth; 0 means perfectly accurate.
#[derive(Debug, Clone)]
pub struct AccuracyWindow {
    window: MovingWindow,
}

impl AccuracyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: MovingWindow::new(capacity),
        }
    }

    pub fn push(&mut self, value: f64) -> f64 {
        self.window.push(value)
    }

    pub fn value(&self) -> f64 {
        self.window.mean()
    }
}

/// Snapshot for a validation overlay: per-axis precision and accuracy in
/// degrees, the combined-eye validity flag and mean eyelid openness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationSnapshot {
    /// Jitter, degrees: [horizontal, vertical]
    pub precision: [f64; 2],
    /// Mean offset from target, degrees: [horizontal, vertical]
    pub accuracy: [f64; 2],
    pub valid: bool,
    pub openness: f64,
}

/// Worker-side accumulator feeding the validation overlay.
///
/// Observes each published channel map, updates the per-axis windows and
/// publishes a coalesced snapshot for the main context to drain.
pub struct ValidationMonitor {
    horizontal_precision: PrecisionWindow,
    vertical_precision: PrecisionWindow,
    horizontal_accuracy: AccuracyWindow,
    vertical_accuracy: AccuracyWindow,
    sender: LatestSender<ValidationSnapshot>,
}

impl ValidationMonitor {
    pub fn new(window: usize) -> (Self, LatestReceiver<ValidationSnapshot>) {
        let (sender, receiver) = latest_channel();
        let monitor = Self {
            horizontal_precision: PrecisionWindow::new(window),
            vertical_precision: PrecisionWindow::new(window),
            horizontal_accuracy: AccuracyWindow::new(window),
            vertical_accuracy: AccuracyWindow::new(window),
            sender,
        };
        (monitor, receiver)
    }

    /// Update from one published sample. Samples without the combined-eye
    /// angle channels are skipped quietly.
    pub fn observe(&mut self, values: &ChannelMap) {
        let Some(eye_angles) = values.get("Combine_HMD2EyeAng") else {
            return;
        };
        let Some(target_angles) = values.get("Combine_HMD2TargAng") else {
            return;
        };
        if eye_angles.len() < 2 || target_angles.len() < 2 {
            return;
        }

        let horizontal_eye = eye_angles[1];
        let vertical_eye = eye_angles[0];
        let precision = [
            self.horizontal_precision.push(horizontal_eye),
            self.vertical_precision.push(vertical_eye),
        ];
        // eye-in-head plus head-to-target gives total offset from target
        let accuracy = [
            self.horizontal_accuracy.push(horizontal_eye + target_angles[1]),
            self.vertical_accuracy.push(vertical_eye + target_angles[0]),
        ];

        let valid = values
            .get("Combine_Validity")
            .and_then(|v| v.first())
            .is_some_and(|&v| v >= 1.0);

        let openness_sides: Vec<f64> = ["Right_Openness", "Left_Openness"]
            .iter()
            .filter_map(|key| values.get(*key).and_then(|v| v.first()).copied())
            .collect();
        let openness = if openness_sides.is_empty() {
            0.0
        } else {
            openness_sides.iter().sum::<f64>() / openness_sides.len() as f64
        };

        self.sender.publish(ValidationSnapshot {
            precision,
            accuracy,
            valid,
            openness,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_mean_covers_last_capacity_values() {
        let capacity = 5;
        let mut window = MovingWindow::new(capacity);
        let values: Vec<f64> = (1..=12).map(|v| v as f64 * 0.25).collect();
        for &v in &values {
            window.push(v);
        }
        let expected: f64 =
            values[values.len() - capacity..].iter().sum::<f64>() / capacity as f64;
        assert!((window.mean() - expected).abs() < 1e-9);
        assert_eq!(window.len(), capacity);
    }

    #[test]
    fn window_mean_during_warm_up() {
        let mut window = MovingWindow::new(30);
        window.push(2.0);
        window.push(4.0);
        assert!((window.mean() - 3.0).abs() < 1e-9);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn precision_tracks_successive_differences() {
        let mut precision = PrecisionWindow::new(3);
        precision.push(1.0); // diff from initial 0 -> 1
        precision.push(3.0); // 2
        precision.push(2.0); // 1
        assert!((precision.value() - (1.0 + 2.0 + 1.0) / 3.0).abs() < 1e-9);

        precision.push(2.0); // 0, evicts the first diff
        assert!((precision.value() - (2.0 + 1.0 + 0.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn accuracy_is_window_mean_of_offsets() {
        let mut accuracy = AccuracyWindow::new(4);
        for v in [1.0, -1.0, 3.0, 1.0] {
            accuracy.push(v);
        }
        assert!((accuracy.value() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn monitor_publishes_snapshot_per_sample() {
        let (mut monitor, receiver) = ValidationMonitor::new(10);
        let mut values = ChannelMap::new();
        values.insert("Combine_HMD2EyeAng".into(), vec![1.0, 2.0, 0.0]);
        values.insert("Combine_HMD2TargAng".into(), vec![-1.0, -2.0, 0.0]);
        values.insert("Combine_Validity".into(), vec![1.0]);
        values.insert("Right_Openness".into(), vec![0.8]);
        values.insert("Left_Openness".into(), vec![0.6]);

        monitor.observe(&values);
        let snapshot = receiver.drain_latest().expect("snapshot published");
        // perfectly opposed angles: zero total offset from the target
        assert!((snapshot.accuracy[0]).abs() < 1e-9);
        assert!((snapshot.accuracy[1]).abs() < 1e-9);
        assert!(snapshot.valid);
        assert!((snapshot.openness - 0.7).abs() < 1e-9);
    }

    #[test]
    fn monitor_skips_samples_without_angles() {
        let (mut monitor, receiver) = ValidationMonitor::new(10);
        monitor.observe(&ChannelMap::new());
        assert!(receiver.drain_latest().is_none());
    }
}
