//! Host timer adapter.
//!
//! The natural host facility here would be the per-process POSIX timer
//! (`timer_create` with thread delivery), but reaching it through `libc`
//! requires a vendored C shim for the notify-function member of
//! `sigevent`. The adapter emulates it instead: a dedicated scheduling
//! thread owns the armed deadline and waits on a condvar, and every expiry
//! is handed to a freshly spawned thread, matching the thread-per-expiry
//! delivery of `SIGEV_THREAD`.
//!
//! Arm requests use the `itimerspec` encoding: an initial value plus an
//! interval, each split into seconds and nanoseconds, with the all-zero
//! value spec meaning "disarm".

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Error;

const NANOS_PER_MS: u64 = 1_000_000;

/// Write a millisecond count as seconds plus nanoseconds. Zero yields the
/// all-zero spec, which the adapter interprets as "disarm".
pub(crate) fn timespec_from_ms(ms: u64) -> libc::timespec {
    libc::timespec {
        tv_sec: (ms / 1000) as libc::time_t,
        tv_nsec: ((ms % 1000) * NANOS_PER_MS) as _,
    }
}

/// Inverse of [`timespec_from_ms`]; sub-millisecond residue is truncated.
pub(crate) fn timespec_to_ms(ts: &libc::timespec) -> u64 {
    ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / NANOS_PER_MS
}

/// An arm request: initial expiry plus subsequent interval.
#[derive(Clone, Copy)]
pub(crate) struct ArmSpec {
    pub(crate) it_value: libc::timespec,
    pub(crate) it_interval: libc::timespec,
}

impl ArmSpec {
    pub(crate) fn zeroed() -> Self {
        ArmSpec {
            it_value: timespec_from_ms(0),
            it_interval: timespec_from_ms(0),
        }
    }

    pub(crate) fn from_ms(value_ms: u64, interval_ms: u64) -> Self {
        ArmSpec {
            it_value: timespec_from_ms(value_ms),
            it_interval: timespec_from_ms(interval_ms),
        }
    }

    pub(crate) fn value_ms(&self) -> u64 {
        timespec_to_ms(&self.it_value)
    }

    pub(crate) fn interval_ms(&self) -> u64 {
        timespec_to_ms(&self.it_interval)
    }

    /// An all-zero value disarms rather than arms.
    pub(crate) fn disarms(&self) -> bool {
        self.value_ms() == 0
    }
}

impl std::fmt::Debug for ArmSpec {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("ArmSpec")
            .field("value_ms", &self.value_ms())
            .field("interval_ms", &self.interval_ms())
            .finish()
    }
}

/// Invoked on its own thread for every expiry.
pub(crate) type ExpiryHandler = Arc<dyn Fn() + Send + Sync + 'static>;

struct ArmState {
    deadline: Option<Instant>,
    interval: Duration,
    destroyed: bool,
}

struct Shared {
    state: Mutex<ArmState>,
    cond: Condvar,
    handler: Mutex<Option<ExpiryHandler>>,
}

/// One host timer: a scheduling thread plus the armed state it watches.
pub(crate) struct OsTimer {
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl OsTimer {
    /// Bring up the scheduling thread. Fails when the host refuses the
    /// thread.
    pub(crate) fn create() -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ArmState {
                deadline: None,
                interval: Duration::ZERO,
                destroyed: false,
            }),
            cond: Condvar::new(),
            handler: Mutex::new(None),
        });

        let worker = thread::Builder::new().name("timer-sched".to_string()).spawn({
            let shared = Arc::clone(&shared);
            move || shared.run()
        })?;

        Ok(OsTimer {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Install the expiry handler. Expiries before this are dropped.
    pub(crate) fn set_handler(&self, handler: ExpiryHandler) {
        *self.shared.handler.lock().expect("handler lock poisoned") = Some(handler);
    }

    /// Install value and interval in one step. A zero value disarms.
    pub(crate) fn arm(&self, spec: ArmSpec) -> Result<(), Error> {
        let mut state = self.shared.state.lock().expect("timer lock poisoned");
        if state.destroyed {
            return Err(Error::Arm);
        }
        if spec.disarms() {
            state.deadline = None;
            state.interval = Duration::ZERO;
        } else {
            state.deadline = Some(Instant::now() + Duration::from_millis(spec.value_ms()));
            state.interval = Duration::from_millis(spec.interval_ms());
        }
        debug_trace!("armed host timer: {:?}", spec);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Milliseconds until the next expiry; zero when disarmed.
    pub(crate) fn remaining_ms(&self) -> u64 {
        let state = self.shared.state.lock().expect("timer lock poisoned");
        match state.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            None => 0,
        }
    }

    /// Stop and join the scheduling thread. Expiries already dispatched run
    /// to completion on their own threads.
    pub(crate) fn destroy(&self) {
        {
            let mut state = self.shared.state.lock().expect("timer lock poisoned");
            state.destroyed = true;
            state.deadline = None;
            self.shared.cond.notify_all();
        }
        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl Drop for OsTimer {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Shared {
    fn run(&self) {
        let mut state = self.state.lock().expect("timer lock poisoned");
        loop {
            if state.destroyed {
                break;
            }
            let deadline = match state.deadline {
                None => {
                    state = self.cond.wait(state).expect("timer lock poisoned");
                    continue;
                }
                Some(deadline) => deadline,
            };

            let now = Instant::now();
            if now < deadline {
                let (guard, _) = self
                    .cond
                    .wait_timeout(state, deadline - now)
                    .expect("timer lock poisoned");
                // the deadline may have been re-armed while we slept
                state = guard;
                continue;
            }

            state.deadline = if state.interval.is_zero() {
                None
            } else {
                Some(deadline + state.interval)
            };
            drop(state);
            self.dispatch();
            state = self.state.lock().expect("timer lock poisoned");
        }
    }

    /// Hand one expiry to a fresh thread, as the original facility does.
    fn dispatch(&self) {
        let handler = self.handler.lock().expect("handler lock poisoned").clone();
        if let Some(handler) = handler {
            debug_trace!("dispatching expiry");
            let _ = thread::Builder::new()
                .name("timer-expiry".to_string())
                .spawn(move || handler());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn timespec_split() {
        let ts = timespec_from_ms(1500);
        assert_eq!(ts.tv_sec, 1);
        assert_eq!(ts.tv_nsec, 500_000_000);
        assert_eq!(timespec_to_ms(&ts), 1500);

        let zero = timespec_from_ms(0);
        assert_eq!(zero.tv_sec, 0);
        assert_eq!(zero.tv_nsec, 0);
    }

    #[test]
    fn timespec_truncates_sub_ms() {
        let ts = libc::timespec {
            tv_sec: 2,
            tv_nsec: 1_999_999,
        };
        assert_eq!(timespec_to_ms(&ts), 2001);
    }

    #[test]
    fn one_shot_fires_once() {
        let timer = OsTimer::create().unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        timer.set_handler({
            let fired = Arc::clone(&fired);
            Arc::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        });
        timer.arm(ArmSpec::from_ms(30, 0)).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining_ms(), 0);
    }

    #[test]
    fn interval_fires_repeatedly_until_disarmed() {
        let timer = OsTimer::create().unwrap();
        let fired = Arc::new(AtomicU32::new(0));
        timer.set_handler({
            let fired = Arc::clone(&fired);
            Arc::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        });
        timer.arm(ArmSpec::from_ms(40, 40)).unwrap();
        thread::sleep(Duration::from_millis(230));
        let seen = fired.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 fires, saw {seen}");

        timer.arm(ArmSpec::zeroed()).unwrap();
        let settled = fired.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(120));
        let after = fired.load(Ordering::SeqCst);
        assert!(after <= settled + 1, "disarm did not stop the timer");
    }

    #[test]
    fn arm_after_destroy_is_refused() {
        let timer = OsTimer::create().unwrap();
        timer.destroy();
        assert!(timer.arm(ArmSpec::from_ms(10, 0)).is_err());
    }
}
