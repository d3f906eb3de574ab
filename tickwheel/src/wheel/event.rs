use std::time::Duration;

use crate::utils::list::{Node, Pointers};

/// The pending intent of an event, applied by the tick thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    /// Registered, waiting for first placement.
    Create,
    /// Re-placement requested with a new interval.
    Rescheduled,
    /// Removal and teardown requested.
    Delete,
    /// Placed in a ring slot.
    Scheduled,
    /// Detached: fired one-shot, not in any slot or on the waitlist.
    Unknown,
}

/// Identifies a registered event.
///
/// Handles stay valid until the event is unregistered; a handle naming a
/// torn-down event is detected as stale rather than aliasing a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    pub(crate) key: usize,
    pub(crate) serial: u64,
}

/// Invoked by the tick thread (outside the wheel lock) when the event is
/// due.
pub(crate) type EventCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Link family for ring-slot lists.
pub(crate) struct SlotTag;

/// Link family for the waitlist.
pub(crate) struct WaitTag;

pub(crate) struct Event {
    pub(crate) serial: u64,
    pub(crate) opcode: Opcode,
    /// Firing period, in wall-clock time; quantized to ticks on placement.
    pub(crate) interval: Duration,
    /// Written by register/reschedule, consumed on promotion.
    pub(crate) new_interval: Duration,
    /// Revolution at which this event is due.
    pub(crate) r: u64,
    /// Slot the event occupies, or is bound for.
    pub(crate) slot_n: u64,
    /// Taken while the callback runs, then restored.
    pub(crate) callback: Option<EventCallback>,
    pub(crate) arg: Box<[u8]>,
    pub(crate) is_recurring: bool,
    /// How many times this event has been placed into a slot.
    pub(crate) n_scheduled: u64,
    pub(crate) slot_node: Pointers,
    pub(crate) wait_node: Pointers,
    /// Index of the slot whose list holds this event, when any does.
    pub(crate) slot_head: Option<usize>,
}

impl Node<SlotTag> for Event {
    fn pointers(&self) -> &Pointers {
        &self.slot_node
    }

    fn pointers_mut(&mut self) -> &mut Pointers {
        &mut self.slot_node
    }
}

impl Node<WaitTag> for Event {
    fn pointers(&self) -> &Pointers {
        &self.wait_node
    }

    fn pointers_mut(&mut self) -> &mut Pointers {
        &mut self.wait_node
    }
}
