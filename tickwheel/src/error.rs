use std::io;

use thiserror::Error;

use crate::timer::TimerState;

/// Errors surfaced by timer and wheel operations.
///
/// Every fallible operation returns `Result<_, Error>`; nothing panics in
/// library paths and nothing is logged on the caller's behalf.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The host timer facility could not be brought up.
    #[error("unable to create host timer: {0}")]
    Create(#[from] io::Error),

    /// The host timer rejected an arm request.
    #[error("unable to arm host timer")]
    Arm,

    /// The requested transition is not legal from the current state.
    #[error("operation not legal in state {0:?}")]
    Transition(TimerState),

    /// The timer has been deleted; no further operations are possible.
    #[error("timer has been deleted")]
    Deleted,

    /// The event handle no longer names a live event.
    #[error("stale event handle")]
    StaleEvent,

    /// The wheel's tick thread is already running.
    #[error("wheel already started")]
    AlreadyStarted,
}
