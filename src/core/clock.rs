use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Abstraction over wall-clock sources.
/// Implementations: SystemTimeSource (production), ManualTimeSource (testing).
pub trait TimeSource {
    /// Time elapsed since an arbitrary, fixed epoch.
    fn now(&self) -> Duration;
}

impl<T: TimeSource + ?Sized> TimeSource for Rc<T> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Monotonic time based on `std::time::Instant`.
pub struct SystemTimeSource {
    epoch: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Hand-driven time for deterministic tests.
#[derive(Default)]
pub struct ManualTimeSource {
    current: Cell<Duration>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, t: Duration) {
        self.current.set(t);
    }

    pub fn set_secs(&self, secs: f32) {
        self.current.set(Duration::from_secs_f32(secs));
    }

    pub fn advance(&self, delta: Duration) {
        self.current.set(self.current.get() + delta);
    }

    pub fn advance_secs(&self, secs: f32) {
        self.advance(Duration::from_secs_f32(secs));
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration {
        self.current.get()
    }
}

/// The single authoritative song time.
///
/// Elapsed time excludes every paused interval and is independent of the
/// playback rate; fast mode only changes how far notes travel per second.
pub struct SongClock<T: TimeSource> {
    time: T,
    wall_start: Option<Duration>,
    accumulated_pause: Duration,
    paused: bool,
    pause_started_at: Option<Duration>,
}

impl<T: TimeSource> SongClock<T> {
    pub fn new(time: T) -> Self {
        Self {
            time,
            wall_start: None,
            accumulated_pause: Duration::ZERO,
            paused: false,
            pause_started_at: None,
        }
    }

    pub fn start(&mut self) {
        self.wall_start = Some(self.time.now());
        self.accumulated_pause = Duration::ZERO;
        self.paused = false;
        self.pause_started_at = None;
    }

    /// Returns the clock to its never-started state.
    pub fn reset(&mut self) {
        self.wall_start = None;
        self.accumulated_pause = Duration::ZERO;
        self.paused = false;
        self.pause_started_at = None;
    }

    pub fn pause(&mut self) {
        if self.paused || self.wall_start.is_none() {
            return;
        }
        self.paused = true;
        self.pause_started_at = Some(self.time.now());
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        if let Some(at) = self.pause_started_at.take() {
            self.accumulated_pause += self.time.now().saturating_sub(at);
        }
        self.paused = false;
    }

    #[inline(always)]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[inline(always)]
    pub fn is_started(&self) -> bool {
        self.wall_start.is_some()
    }

    /// Seconds of song time. Zero before `start`, frozen while paused.
    pub fn elapsed(&self) -> f32 {
        let Some(start) = self.wall_start else {
            return 0.0;
        };
        let now = match (self.paused, self.pause_started_at) {
            (true, Some(at)) => at,
            _ => self.time.now(),
        };
        now.saturating_sub(start)
            .saturating_sub(self.accumulated_pause)
            .as_secs_f32()
    }

    pub fn time_source(&self) -> &T {
        &self.time
    }
}
