//! Lifecycle-managed timers.
//!
//! A [`Timer`] couples one host timer with a small state machine covering
//! the whole lifecycle: start, pause, resume, restart, reschedule, cancel
//! and delete. Schedules may be one-shot, periodic, or exponential — in the
//! exponential mode the timer re-arms itself after every fire with twice
//! the previous delay.
//!
//! Expiries are delivered on freshly spawned threads; the library wrapper
//! around the user callback maintains the invocation count, enforces the
//! expiration threshold and performs the exponential / post-resume
//! re-arming. Overlapping expiries are serialized, and the user callback
//! never runs under the state lock, so it may freely call back into the
//! timer it was invoked for.

pub(crate) mod os;

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::Error;
use crate::timer::os::{timespec_from_ms, ArmSpec, OsTimer};

/// Lifecycle states of a [`Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Created but never started.
    Init,
    /// Armed and counting down.
    Running,
    /// Disarmed by [`Timer::cancel`]; counters reset.
    Cancelled,
    /// Terminal; every further operation fails.
    Deleted,
    /// Disarmed with the residual time saved for [`Timer::resume`].
    Paused,
    /// Re-armed from the saved residue; reverts to `Running` at the next
    /// fire.
    Resumed,
}

/// Callback invoked on each expiry, outside any internal lock.
pub(crate) type TimerCallback = Box<dyn FnMut(&Timer, &[u8]) + Send + 'static>;

struct State {
    /// The spec written to the host timer by the next arm.
    spec: ArmSpec,
    /// Initial expiry in ms.
    exp_time: u64,
    /// Period after the initial expiry in ms; unused when exponential.
    exp_interval: u64,
    /// Max callback invocations; 0 is unbounded.
    threshold: u32,
    is_exponential: bool,
    /// Residue saved by pause, consumed by resume.
    time_remaining: u64,
    invocation_count: u32,
    /// Delay of the *next* exponential fire; doubles at each expiry.
    backoff: u64,
    state: TimerState,
}

struct CallbackCell {
    callback: TimerCallback,
    /// Dropped by delete; absent thereafter.
    arg: Option<Box<[u8]>>,
}

struct Shared {
    os: OsTimer,
    state: Mutex<State>,
    callback: Mutex<CallbackCell>,
}

/// A single timer with full lifecycle control.
///
/// `Timer` is a cheaply cloneable handle; the callback receives one for the
/// timer that fired. Dropping the last handle stops the underlying host
/// timer.
#[derive(Clone)]
pub struct Timer {
    shared: Arc<Shared>,
}

impl Timer {
    pub(crate) fn init(
        callback: TimerCallback,
        arg: Box<[u8]>,
        expiry_ms: u64,
        interval_ms: u64,
        max_expirations: u32,
        is_exponential: bool,
    ) -> Result<Timer, Error> {
        let os = OsTimer::create()?;

        let spec = if is_exponential {
            ArmSpec::from_ms(expiry_ms, 0)
        } else {
            ArmSpec::from_ms(expiry_ms, interval_ms)
        };
        let backoff = if is_exponential { spec.value_ms() } else { 0 };

        let shared = Arc::new(Shared {
            os,
            state: Mutex::new(State {
                spec,
                exp_time: expiry_ms,
                exp_interval: interval_ms,
                threshold: max_expirations,
                is_exponential,
                time_remaining: 0,
                invocation_count: 0,
                backoff,
                state: TimerState::Init,
            }),
            callback: Mutex::new(CallbackCell {
                callback,
                arg: Some(arg),
            }),
        });

        let weak = Arc::downgrade(&shared);
        shared.os.set_handler(Arc::new(move || Shared::on_expiry(&weak)));

        Ok(Timer { shared })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TimerState {
        self.lock_state().state
    }

    /// Number of times the wrapper has observed an expiry since the last
    /// restart or cancel.
    pub fn invocation_count(&self) -> u32 {
        self.lock_state().invocation_count
    }

    /// The configured initial expiry.
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.lock_state().exp_time)
    }

    /// The configured period after the initial expiry.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.lock_state().exp_interval)
    }

    /// Arm the current spec and transition to `Running`. Legal from any
    /// non-terminal state.
    pub fn start(&self) -> Result<(), Error> {
        let mut st = self.lock_state();
        if st.state == TimerState::Deleted {
            return Err(Error::Deleted);
        }
        self.shared.os.arm(st.spec)?;
        st.state = TimerState::Running;
        debug_trace!("timer started");
        Ok(())
    }

    /// Write the current spec to the host timer without touching the state
    /// machine. An all-zero spec disarms.
    pub fn toggle(&self) -> Result<(), Error> {
        let st = self.lock_state();
        if st.state == TimerState::Deleted {
            return Err(Error::Deleted);
        }
        self.shared.os.arm(st.spec)
    }

    /// Save the residual time and disarm. Refused when already paused.
    pub fn pause(&self) -> Result<(), Error> {
        let mut st = self.lock_state();
        match st.state {
            TimerState::Deleted => return Err(Error::Deleted),
            TimerState::Paused => return Err(Error::Transition(TimerState::Paused)),
            _ => {}
        }
        st.time_remaining = self.shared.os.remaining_ms();
        st.spec = ArmSpec::zeroed();
        self.shared.os.arm(st.spec)?;
        st.state = TimerState::Paused;
        debug_trace!("timer paused, {}ms remaining", st.time_remaining);
        Ok(())
    }

    /// Re-arm from the saved residue. Refused when already resumed.
    ///
    /// The arm is one-off: the wrapper restores the steady schedule at the
    /// next fire.
    pub fn resume(&self) -> Result<(), Error> {
        let mut st = self.lock_state();
        match st.state {
            TimerState::Deleted => return Err(Error::Deleted),
            TimerState::Resumed => return Err(Error::Transition(TimerState::Resumed)),
            _ => {}
        }
        st.spec.it_value = timespec_from_ms(st.time_remaining);
        st.spec.it_interval = timespec_from_ms(st.exp_interval);
        st.time_remaining = 0;
        self.shared.os.arm(st.spec)?;
        st.state = TimerState::Resumed;
        Ok(())
    }

    /// Cancel, reload the original schedule, reset the counters and arm.
    pub fn restart(&self) -> Result<(), Error> {
        let mut st = self.lock_state();
        if st.state == TimerState::Deleted {
            return Err(Error::Deleted);
        }
        let _ = Shared::cancel_locked(&self.shared.os, &mut st);
        st.spec.it_value = timespec_from_ms(st.exp_time);
        st.spec.it_interval =
            timespec_from_ms(if st.is_exponential { 0 } else { st.exp_interval });
        st.invocation_count = 0;
        st.time_remaining = 0;
        st.backoff = if st.is_exponential { st.exp_time } else { 0 };
        self.shared.os.arm(st.spec)?;
        st.state = TimerState::Running;
        Ok(())
    }

    /// Disarm and reset the counters. Refused before the first start and
    /// after delete; a second consecutive cancel is refused as well.
    pub fn cancel(&self) -> Result<(), Error> {
        let mut st = self.lock_state();
        Shared::cancel_locked(&self.shared.os, &mut st)
    }

    /// Install a new expiry and interval, preserving the invocation count,
    /// then arm. When exponential, the interval is zeroed and the backoff
    /// reset to the new expiry.
    pub fn reschedule(&self, expiry: Duration, interval: Duration) -> Result<(), Error> {
        let mut st = self.lock_state();
        if st.state == TimerState::Deleted {
            return Err(Error::Deleted);
        }
        Shared::reschedule_locked(
            &self.shared.os,
            &mut st,
            expiry.as_millis() as u64,
            interval.as_millis() as u64,
        )
    }

    /// Tear down the host timer and drop the argument. Terminal: every
    /// later operation fails with [`Error::Deleted`].
    pub fn delete(&self) -> Result<(), Error> {
        {
            let mut st = self.lock_state();
            if st.state == TimerState::Deleted {
                return Err(Error::Deleted);
            }
            st.state = TimerState::Deleted;
        }
        self.shared.os.destroy();
        // a callback mid-flight holds the cell; its arg is then dropped
        // with the timer instead
        if let Ok(mut cell) = self.shared.callback.try_lock() {
            cell.arg = None;
        }
        Ok(())
    }

    /// Residual time until the next expiry.
    ///
    /// `None` when cancelled or deleted; elsewhere the host residual, which
    /// is zero whenever the timer is disarmed.
    pub fn remaining(&self) -> Option<Duration> {
        let st = self.lock_state();
        match st.state {
            TimerState::Deleted | TimerState::Cancelled => None,
            _ => Some(Duration::from_millis(self.shared.os.remaining_ms())),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().expect("timer state lock poisoned")
    }
}

impl Shared {
    /// The wrapper run for every host expiry, on the expiry's own thread.
    fn on_expiry(weak: &Weak<Shared>) {
        let shared = match weak.upgrade() {
            Some(shared) => shared,
            None => return,
        };

        {
            let mut st = shared.state.lock().expect("timer state lock poisoned");
            if st.state == TimerState::Deleted {
                return;
            }
            // a resumed timer goes back to steady running, provided it
            // still has an expiry to run on
            if st.state == TimerState::Resumed && st.exp_time != 0 {
                st.state = TimerState::Running;
            }
            st.invocation_count += 1;
            if st.threshold > 0 && st.invocation_count > st.threshold {
                debug_trace!("threshold reached, auto-cancelling");
                let _ = Self::cancel_locked(&shared.os, &mut st);
                return;
            }
        }

        let timer = Timer {
            shared: Arc::clone(&shared),
        };
        {
            let mut cell = shared.callback.lock().expect("timer callback lock poisoned");
            let CallbackCell { callback, arg } = &mut *cell;
            if let Some(arg) = arg.as_deref() {
                (callback)(&timer, arg);
            }
        }

        let mut st = shared.state.lock().expect("timer state lock poisoned");
        if st.state == TimerState::Deleted || st.state == TimerState::Cancelled {
            // cancelled or deleted from inside the callback; do not re-arm
            return;
        }
        if st.is_exponential && st.backoff != 0 {
            // the stored value is always the delay of the next fire
            st.backoff *= 2;
            let next = st.backoff;
            let _ = Self::reschedule_locked(&shared.os, &mut st, next, 0);
        } else if st.state == TimerState::Resumed {
            let (expiry, interval) = (st.exp_time, st.exp_interval);
            let _ = Self::reschedule_locked(&shared.os, &mut st, expiry, interval);
        }
    }

    fn cancel_locked(os: &OsTimer, st: &mut State) -> Result<(), Error> {
        match st.state {
            TimerState::Init => return Err(Error::Transition(TimerState::Init)),
            TimerState::Cancelled => return Err(Error::Transition(TimerState::Cancelled)),
            TimerState::Deleted => return Err(Error::Deleted),
            _ => {}
        }
        st.spec = ArmSpec::zeroed();
        st.invocation_count = 0;
        st.time_remaining = 0;
        os.arm(st.spec)?;
        st.state = TimerState::Cancelled;
        Ok(())
    }

    fn reschedule_locked(
        os: &OsTimer,
        st: &mut State,
        expiry_ms: u64,
        interval_ms: u64,
    ) -> Result<(), Error> {
        let saved = st.invocation_count;
        if st.state != TimerState::Cancelled {
            let _ = Self::cancel_locked(os, st);
        }
        st.invocation_count = saved;

        st.exp_time = expiry_ms;
        st.exp_interval = interval_ms;
        st.spec.it_value = timespec_from_ms(expiry_ms);
        if st.is_exponential {
            st.spec.it_interval = timespec_from_ms(0);
            st.backoff = expiry_ms;
        } else {
            st.spec.it_interval = timespec_from_ms(interval_ms);
        }
        os.arm(st.spec)?;
        st.state = TimerState::Running;
        Ok(())
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock_state();
        fmt.debug_struct("Timer")
            .field("state", &st.state)
            .field("expiry_ms", &st.exp_time)
            .field("interval_ms", &st.exp_interval)
            .field("threshold", &st.threshold)
            .field("exponential", &st.is_exponential)
            .field("invocation_count", &st.invocation_count)
            .field("time_remaining_ms", &st.time_remaining)
            .field("backoff_ms", &st.backoff)
            .finish()
    }
}
