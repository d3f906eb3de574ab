//! Composable timing primitives.
//!
//! This crate offers two scheduling building blocks:
//!
//! * [`Timer`] — a single timer with full lifecycle control (start, pause,
//!   resume, restart, reschedule, cancel, delete) over a high-resolution
//!   host timer, supporting one-shot, periodic and exponential-backoff
//!   schedules.
//! * [`TimerWheel`] — a hashed timer wheel that dispatches an unbounded
//!   number of events at integer tick granularity from bounded memory, by
//!   hashing each event into a ring slot indexed by its due time.
//!
//! The wheel applies all registrations, reschedules and cancellations at
//! tick boundaries through a deferred-mutation waitlist, so its API is safe
//! to call from any thread — including from inside a firing event callback.
//!
//! # Examples
//!
//! Print once a second, three times:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let timer = tickwheel::TimerBuilder::new()
//!     .expiry(Duration::from_secs(1))
//!     .interval(Duration::from_secs(1))
//!     .max_expirations(3)
//!     .build(|_timer, arg| println!("{}", String::from_utf8_lossy(arg)), &b"tick"[..])
//!     .unwrap();
//! timer.start().unwrap();
//! ```

#![warn(missing_docs, unreachable_pub)]

#[macro_use]
mod macros;

mod builder;
mod error;
mod utils;

pub mod timer;
pub mod wheel;

pub use builder::TimerBuilder;
pub use error::Error;
pub use timer::{Timer, TimerState};
pub use wheel::{EventId, TimerWheel, WheelHandle};
