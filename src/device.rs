//! The acquisition worker: a dedicated thread that polls the tracker SDK
//! at its native rate and fans out one event per novel frame.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::channels::{ChannelMap, ChannelParser};
use crate::error::{GazeError, GazeResult};
use crate::sample::{RawSample, SampleSource};

/// Default grace period the owner waits for the worker to observe
/// cancellation before disposing its resources.
pub const STOP_GRACE: Duration = Duration::from_millis(350);

/// Subscriber receiving the parsed channel map for each novel frame.
pub type ChannelSubscriber = Box<dyn FnMut(&ChannelMap) + Send>;
/// Subscriber receiving the unparsed sample for each novel frame.
pub type RawSubscriber = Box<dyn FnMut(&RawSample) + Send>;

/// Shared monotonic clock for the timing channels. All timestamps in a
/// pipeline come from one epoch so rows and samples are comparable.
#[derive(Debug, Clone)]
pub struct PipelineClock {
    epoch: Instant,
}

impl PipelineClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Microseconds since the pipeline epoch.
    pub fn ticks(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1e6
    }
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls a [`SampleSource`] continuously on its own thread, independent
/// of any GUI frame rate, publishing exactly one event per novel frame.
///
/// The loop busy-polls to match hardware cadence: no sleeps, no yields.
/// Duplicate frames and poll failures are retried silently at the next
/// iteration. Cancellation is cooperative, checked once per iteration;
/// [`EyeTrackerDevice::stop`] waits out a bounded grace period and then
/// proceeds regardless, accepting a possible leak of the native SDK
/// handle if the worker is wedged inside the driver.
pub struct EyeTrackerDevice {
    parser: ChannelParser,
    parse_channels: bool,
    clock: PipelineClock,
    channel_subscribers: Vec<ChannelSubscriber>,
    raw_subscribers: Vec<RawSubscriber>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    last_raw: Arc<RwLock<Option<RawSample>>>,
    handle: Option<JoinHandle<()>>,
    stop_grace: Duration,
}

impl EyeTrackerDevice {
    pub fn new(parser: ChannelParser) -> Self {
        Self::with_clock(parser, PipelineClock::new())
    }

    pub fn with_clock(parser: ChannelParser, clock: PipelineClock) -> Self {
        Self {
            parser,
            parse_channels: true,
            clock,
            channel_subscribers: Vec::new(),
            raw_subscribers: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            last_raw: Arc::new(RwLock::new(None)),
            handle: None,
            stop_grace: STOP_GRACE,
        }
    }

    /// Disabling channel parsing keeps only the raw fan-out active.
    pub fn set_channel_parsing(&mut self, enabled: bool) {
        self.parse_channels = enabled;
    }

    pub fn set_stop_grace(&mut self, grace: Duration) {
        self.stop_grace = grace;
    }

    pub fn clock(&self) -> PipelineClock {
        self.clock.clone()
    }

    /// Register a parsed-channel subscriber. Subscribers are moved onto
    /// the worker thread at [`EyeTrackerDevice::start`] and invoked there
    /// synchronously; they must not block.
    pub fn subscribe_channels(&mut self, subscriber: impl FnMut(&ChannelMap) + Send + 'static) {
        self.channel_subscribers.push(Box::new(subscriber));
    }

    /// Register a raw-sample subscriber. Same threading rules as
    /// [`EyeTrackerDevice::subscribe_channels`].
    pub fn subscribe_raw(&mut self, subscriber: impl FnMut(&RawSample) + Send + 'static) {
        self.raw_subscribers.push(Box::new(subscriber));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Most recent sample seen by the worker, for consumers polling
    /// independently of the fan-out. Cleared when the worker exits.
    pub fn latest_raw(&self) -> Option<RawSample> {
        *self.last_raw.read()
    }

    /// Spawn the worker thread. Registered subscribers move onto the
    /// worker; register them again before any restart.
    pub fn start(&mut self, source: Box<dyn SampleSource>) -> GazeResult<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(GazeError::AlreadyRunning);
        }
        self.cancel.store(false, Ordering::Release);
        let mut worker = Worker {
            source,
            parser: self.parser.clone(),
            parse_channels: self.parse_channels,
            clock: self.clock.clone(),
            channel_subscribers: std::mem::take(&mut self.channel_subscribers),
            raw_subscribers: std::mem::take(&mut self.raw_subscribers),
            cancel: Arc::clone(&self.cancel),
            running: Arc::clone(&self.running),
            last_raw: Arc::clone(&self.last_raw),
        };
        self.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name("eye-acquisition".into())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(error) => {
                self.running.store(false, Ordering::Release);
                Err(error.into())
            }
        }
    }

    /// Request cancellation and wait out the grace period. The worker
    /// never signals completion itself; after the ceiling the owner
    /// assumes termination and moves on.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::Acquire) {
            self.handle = None;
            return;
        }
        self.cancel.store(true, Ordering::Release);

        let deadline = Instant::now() + self.stop_grace;
        while self.running.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if self.running.load(Ordering::Acquire) {
            warn!(
                grace_ms = self.stop_grace.as_millis() as u64,
                "acquisition worker did not observe cancellation in time; abandoning thread"
            );
            self.handle = None;
        } else if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EyeTrackerDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    source: Box<dyn SampleSource>,
    parser: ChannelParser,
    parse_channels: bool,
    clock: PipelineClock,
    channel_subscribers: Vec<ChannelSubscriber>,
    raw_subscribers: Vec<RawSubscriber>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    last_raw: Arc<RwLock<Option<RawSample>>>,
}

impl Worker {
    fn run(&mut self) {
        debug!("acquisition worker started");
        let mut previous_frame: Option<i64> = None;

        while !self.cancel.load(Ordering::Acquire) {
            // Collaborator framework not working yet (or any more): skip
            // the iteration entirely, matching hardware cadence.
            if !self.source.ready() {
                continue;
            }

            let Some(sample) = self.source.poll() else {
                // transient failure: retry immediately, no backoff
                continue;
            };

            if previous_frame == Some(sample.frame_sequence) {
                continue;
            }
            previous_frame = Some(sample.frame_sequence);

            *self.last_raw.write() = Some(sample);

            // A panicking subscriber must not take the loop down with it;
            // the cleanup below always runs.
            let published = panic::catch_unwind(AssertUnwindSafe(|| self.publish(&sample)));
            if published.is_err() {
                warn!(
                    frame = sample.frame_sequence,
                    "subscriber panicked; sample dropped"
                );
            }
        }

        // Release the last native-owned sample promptly before reporting
        // the worker gone.
        *self.last_raw.write() = None;
        self.running.store(false, Ordering::Release);
        debug!("acquisition worker exited");
    }

    fn publish(&mut self, sample: &RawSample) {
        if self.parse_channels && !self.channel_subscribers.is_empty() {
            let values = self.parser.parse(sample, self.clock.ticks());
            for subscriber in &mut self.channel_subscribers {
                subscriber(&values);
            }
        }
        for subscriber in &mut self.raw_subscribers {
            subscriber(sample);
        }
    }
}
