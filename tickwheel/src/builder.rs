use std::time::Duration;

use crate::error::Error;
use crate::timer::Timer;

/// Configures and creates a [`Timer`].
///
/// # Examples
///
/// A timer firing after one second and every 500ms thereafter, at most five
/// times:
///
/// ```no_run
/// use std::time::Duration;
/// use tickwheel::TimerBuilder;
///
/// let timer = TimerBuilder::new()
///     .expiry(Duration::from_secs(1))
///     .interval(Duration::from_millis(500))
///     .max_expirations(5)
///     .build(|_timer, _arg| println!("fired"), Vec::new())
///     .unwrap();
/// timer.start().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct TimerBuilder {
    expiry: Duration,
    interval: Duration,
    max_expirations: u32,
    exponential: bool,
}

impl Default for TimerBuilder {
    #[must_use]
    fn default() -> Self {
        TimerBuilder::new()
    }
}

impl TimerBuilder {
    /// Create a builder with no expiry, no interval, no expiration cap and
    /// a linear schedule.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expiry: Duration::ZERO,
            interval: Duration::ZERO,
            max_expirations: 0,
            exponential: false,
        }
    }

    /// Initial expiry.
    #[must_use]
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Period after the initial expiry. Ignored for exponential timers,
    /// which re-arm themselves after every fire.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Cap on callback invocations; the timer cancels itself once the cap
    /// is exceeded. Zero (the default) means unbounded.
    #[must_use]
    pub fn max_expirations(mut self, max: u32) -> Self {
        self.max_expirations = max;
        self
    }

    /// Double the delay after every fire, starting from the expiry.
    #[must_use]
    pub fn exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// Create the timer in its initial, unarmed state.
    ///
    /// The callback runs on a fresh thread for every expiry and receives a
    /// handle to the firing timer plus the argument bytes. Fails when the
    /// host timer facility cannot be brought up.
    pub fn build<F>(self, callback: F, arg: impl Into<Box<[u8]>>) -> Result<Timer, Error>
    where
        F: FnMut(&Timer, &[u8]) + Send + 'static,
    {
        Timer::init(
            Box::new(callback),
            arg.into(),
            self.expiry.as_millis() as u64,
            self.interval.as_millis() as u64,
            self.max_expirations,
            self.exponential,
        )
    }
}
