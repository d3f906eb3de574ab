//! Hashed timer wheel.
//!
//! The wheel hashes every event into one of `ring_size` slots by its due
//! time: an event `interval / tick_interval` ticks away lands in slot
//! `absolute_slot % ring_size` with due revolution `absolute_slot /
//! ring_size`, where `absolute_slot = n_revolutions * ring_size +
//! current_tick` is the wheel's monotonic logical clock. A dedicated tick
//! thread advances the wheel once per `tick_interval`, fires the events of
//! the current slot whose due revolution has arrived, and re-hashes
//! recurring ones.
//!
//! Registrations, reschedules and cancellations never touch the ring
//! directly. They queue the event on a waitlist together with an opcode,
//! and the tick thread applies the intent at the next tick boundary after
//! the slot walk. This keeps all ring mutation on one thread and makes the
//! whole API safe to call from event callbacks.
//!
//! Slot lists are kept ascending by due revolution (ties preserve
//! insertion order), so the slot walk stops at the first event that is not
//! yet due.

mod event;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub use self::event::EventId;
use self::event::{Event, EventCallback, Opcode, SlotTag, WaitTag};
use crate::error::Error;
use crate::utils::list::{List, Pointers};
use crate::utils::slab::Slab;

const LOCK: &str = "wheel registry lock poisoned";

struct Registry {
    arena: Slab<Event>,
    slots: Box<[List<SlotTag>]>,
    waitlist: List<WaitTag>,
    /// Events currently installed in the ring.
    n_slots: usize,
    next_serial: u64,
    started: bool,
}

struct Inner {
    ring_size: u64,
    tick_interval: Duration,
    current_tick: AtomicU64,
    revolutions: AtomicU64,
    shutdown: AtomicBool,
    registry: Mutex<Registry>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

/// A hashed timer wheel dispatching events from a dedicated tick thread.
///
/// The wheel is the owning end: dropping it (or calling
/// [`stop`](TimerWheel::stop)) shuts the tick thread down. Cloneable
/// [`WheelHandle`]s provide the registration surface to other threads and
/// to event callbacks.
pub struct TimerWheel {
    inner: Arc<Inner>,
}

/// A cloneable handle for registering against a [`TimerWheel`].
#[derive(Clone)]
pub struct WheelHandle {
    inner: Arc<Inner>,
}

impl TimerWheel {
    /// Allocate a wheel with `ring_size` slots advancing every
    /// `tick_interval`.
    ///
    /// # Panics
    ///
    /// Panics when `ring_size` or `tick_interval` is zero.
    pub fn new(ring_size: usize, tick_interval: Duration) -> TimerWheel {
        assert!(ring_size > 0, "ring_size must be non-zero");
        assert!(!tick_interval.is_zero(), "tick_interval must be non-zero");

        let slots: Box<[List<SlotTag>]> = (0..ring_size).map(|_| List::new()).collect();

        TimerWheel {
            inner: Arc::new(Inner {
                ring_size: ring_size as u64,
                tick_interval,
                current_tick: AtomicU64::new(0),
                revolutions: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                registry: Mutex::new(Registry {
                    arena: Slab::new(),
                    slots,
                    waitlist: List::new(),
                    n_slots: 0,
                    next_serial: 0,
                    started: false,
                }),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the tick thread. Refused when already running.
    ///
    /// Events registered beforehand anchor at the wheel's start; events
    /// registered afterwards anchor at the next tick boundary.
    pub fn start(&self) -> Result<(), Error> {
        let mut reg = self.inner.registry.lock().expect(LOCK);
        if reg.started {
            return Err(Error::AlreadyStarted);
        }
        let inner = Arc::clone(&self.inner);
        let worker = thread::Builder::new()
            .name("tick-wheel".to_string())
            .spawn(move || inner.run())?;
        reg.started = true;
        *self.inner.worker.lock().expect(LOCK) = Some(worker);
        Ok(())
    }

    /// Stop and join the tick thread. Also performed on drop.
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let worker = self.inner.worker.lock().expect(LOCK).take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }

    /// A cloneable registration handle.
    pub fn handle(&self) -> WheelHandle {
        WheelHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Queue an event for placement at the next tick boundary.
    ///
    /// The callback fires every `interval` (rounded down to whole ticks,
    /// minimum one) until unregistered; a non-recurring event fires once.
    pub fn register<F>(
        &self,
        callback: F,
        arg: impl Into<Box<[u8]>>,
        interval: Duration,
        recurring: bool,
    ) -> EventId
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.inner.register_ev(Box::new(callback), arg.into(), interval, recurring)
    }

    /// Queue a re-placement of `ev` with a new interval, taking effect at
    /// the next tick boundary.
    pub fn reschedule(&self, ev: EventId, next_interval: Duration) -> Result<(), Error> {
        self.inner.reschedule_ev(ev, next_interval)
    }

    /// Queue removal of `ev`. The event may fire once more if the current
    /// slot walk already passed it.
    pub fn unregister(&self, ev: EventId) -> Result<(), Error> {
        self.inner.unregister_ev(ev)
    }

    /// Wall-clock time until `ev` is due; zero while it awaits placement.
    pub fn time_remaining(&self, ev: EventId) -> Result<Duration, Error> {
        self.inner.time_remaining_ev(ev)
    }

    /// Number of events currently installed in the ring.
    pub fn len(&self) -> usize {
        self.inner.registry.lock().expect(LOCK).n_slots
    }

    /// Whether no events are installed in the ring.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The slot the wheel currently points at.
    pub fn current_tick(&self) -> u64 {
        self.inner.current_tick.load(Ordering::Relaxed)
    }

    /// Completed revolutions of the ring.
    pub fn revolutions(&self) -> u64 {
        self.inner.revolutions.load(Ordering::Relaxed)
    }

    /// Rewind the logical clock to tick zero, revolution zero. Installed
    /// events are untouched. A test affordance: racy against a live tick
    /// thread.
    pub fn reset(&self) {
        self.inner.current_tick.store(0, Ordering::Relaxed);
        self.inner.revolutions.store(0, Ordering::Relaxed);
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WheelHandle {
    /// See [`TimerWheel::register`].
    pub fn register<F>(
        &self,
        callback: F,
        arg: impl Into<Box<[u8]>>,
        interval: Duration,
        recurring: bool,
    ) -> EventId
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.inner.register_ev(Box::new(callback), arg.into(), interval, recurring)
    }

    /// See [`TimerWheel::reschedule`].
    pub fn reschedule(&self, ev: EventId, next_interval: Duration) -> Result<(), Error> {
        self.inner.reschedule_ev(ev, next_interval)
    }

    /// See [`TimerWheel::unregister`].
    pub fn unregister(&self, ev: EventId) -> Result<(), Error> {
        self.inner.unregister_ev(ev)
    }

    /// See [`TimerWheel::time_remaining`].
    pub fn time_remaining(&self, ev: EventId) -> Result<Duration, Error> {
        self.inner.time_remaining_ev(ev)
    }
}

impl Inner {
    fn register_ev(
        &self,
        callback: EventCallback,
        arg: Box<[u8]>,
        interval: Duration,
        recurring: bool,
    ) -> EventId {
        let mut reg = self.registry.lock().expect(LOCK);
        let registry = &mut *reg;
        let serial = registry.next_serial;
        registry.next_serial += 1;

        let key = registry.arena.insert(Event {
            serial,
            opcode: Opcode::Create,
            interval: Duration::ZERO,
            new_interval: interval,
            r: 0,
            slot_n: 0,
            callback: Some(callback),
            arg,
            is_recurring: recurring,
            n_scheduled: 0,
            slot_node: Pointers::new(),
            wait_node: Pointers::new(),
            slot_head: None,
        });
        registry.waitlist.push_back(&mut registry.arena, key);
        debug_trace!("registered event {} (interval {:?})", serial, interval);

        EventId { key, serial }
    }

    fn reschedule_ev(&self, id: EventId, next_interval: Duration) -> Result<(), Error> {
        let mut reg = self.registry.lock().expect(LOCK);
        let registry = &mut *reg;
        let ev = registry
            .arena
            .get_mut(id.key)
            .filter(|ev| ev.serial == id.serial)
            .ok_or(Error::StaleEvent)?;
        ev.opcode = Opcode::Rescheduled;
        ev.new_interval = next_interval;
        let queued = ev.wait_node.is_linked();
        if queued {
            registry.waitlist.remove(&mut registry.arena, id.key);
        }
        registry.waitlist.push_front(&mut registry.arena, id.key);
        Ok(())
    }

    fn unregister_ev(&self, id: EventId) -> Result<(), Error> {
        let mut reg = self.registry.lock().expect(LOCK);
        let registry = &mut *reg;
        let ev = registry
            .arena
            .get_mut(id.key)
            .filter(|ev| ev.serial == id.serial)
            .ok_or(Error::StaleEvent)?;
        ev.opcode = Opcode::Delete;
        let queued = ev.wait_node.is_linked();
        if queued {
            registry.waitlist.remove(&mut registry.arena, id.key);
        }
        registry.waitlist.push_front(&mut registry.arena, id.key);
        Ok(())
    }

    fn time_remaining_ev(&self, id: EventId) -> Result<Duration, Error> {
        let reg = self.registry.lock().expect(LOCK);
        let ev = reg
            .arena
            .get(id.key)
            .filter(|ev| ev.serial == id.serial)
            .ok_or(Error::StaleEvent)?;
        if ev.opcode != Opcode::Scheduled {
            return Ok(Duration::ZERO);
        }
        let absolute_due = ev.r * self.ring_size + ev.slot_n;
        let absolute_now = self.absolute_slot();
        let ticks = absolute_due.saturating_sub(absolute_now);
        Ok(Duration::from_nanos(
            (self.tick_interval.as_nanos() as u64).saturating_mul(ticks),
        ))
    }

    fn absolute_slot(&self) -> u64 {
        self.revolutions.load(Ordering::Relaxed) * self.ring_size
            + self.current_tick.load(Ordering::Relaxed)
    }

    /// Whole ticks covered by `interval`, never less than one.
    fn interval_ticks(&self, interval: Duration) -> u64 {
        ((interval.as_nanos() / self.tick_interval.as_nanos()) as u64).max(1)
    }

    /// Project `interval` forward from `absolute`, yielding the due
    /// revolution and slot.
    fn project(&self, absolute: u64, interval: Duration) -> (u64, u64) {
        let next_absolute = absolute + self.interval_ticks(interval);
        (next_absolute / self.ring_size, next_absolute % self.ring_size)
    }

    /// The tick routine, run by the dedicated worker thread.
    fn run(&self) {
        // anchor everything registered before start at absolute slot 0
        {
            let mut reg = self.registry.lock().expect(LOCK);
            self.drain_waitlist(&mut reg);
        }

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            // advance, starting a new revolution on wrap
            let mut next_tick = self.current_tick.load(Ordering::Relaxed) + 1;
            if next_tick == self.ring_size {
                next_tick = 0;
                self.revolutions.fetch_add(1, Ordering::Relaxed);
            }
            self.current_tick.store(next_tick, Ordering::Relaxed);

            thread::sleep(self.tick_interval);
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let tick = self.current_tick.load(Ordering::Relaxed);
            let rev = self.revolutions.load(Ordering::Relaxed);
            let absolute = rev * self.ring_size + tick;
            debug_trace!("tick {} (revolution {})", tick, rev);

            let mut reg = self.registry.lock().expect(LOCK);
            let mut cursor = reg.slots[tick as usize].head();
            while let Some(key) = cursor {
                // cache the successor: the body may unlink or re-link `key`
                cursor = reg.arena[key].slot_node.next;

                let due = reg.arena[key].r;
                if due > rev {
                    // slot lists ascend by r; nothing further is due
                    break;
                }
                if due < rev {
                    continue;
                }

                // fire with the registry unlocked so the callback can
                // reach back into the wheel
                let (mut callback, arg) = {
                    let ev = &mut reg.arena[key];
                    (ev.callback.take(), std::mem::take(&mut ev.arg))
                };
                drop(reg);
                if let Some(callback) = callback.as_mut() {
                    callback(&arg);
                }
                reg = self.registry.lock().expect(LOCK);
                {
                    let ev = &mut reg.arena[key];
                    ev.callback = callback;
                    ev.arg = arg;
                }

                let registry = &mut *reg;
                if registry.arena[key].is_recurring {
                    let interval = registry.arena[key].interval;
                    let (next_rev, next_slot) = self.project(absolute, interval);
                    registry.slots[tick as usize].remove(&mut registry.arena, key);
                    {
                        let ev = &mut registry.arena[key];
                        ev.r = next_rev;
                        ev.slot_n = next_slot;
                        ev.slot_head = Some(next_slot as usize);
                        ev.n_scheduled += 1;
                    }
                    registry.slots[next_slot as usize].insert_sorted(
                        &mut registry.arena,
                        key,
                        |a, b| a.r.cmp(&b.r),
                    );
                } else {
                    registry.slots[tick as usize].remove(&mut registry.arena, key);
                    let ev = &mut registry.arena[key];
                    ev.slot_head = None;
                    if ev.opcode == Opcode::Scheduled {
                        ev.opcode = Opcode::Unknown;
                    }
                }
            }

            self.drain_waitlist(&mut reg);
        }
    }

    /// Apply every queued intent to the ring. Runs after the slot walk, so
    /// intents issued from callbacks take effect no earlier than the next
    /// tick.
    fn drain_waitlist(&self, reg: &mut Registry) {
        let absolute = self.absolute_slot();
        let registry = &mut *reg;

        let mut cursor = registry.waitlist.head();
        while let Some(key) = cursor {
            cursor = registry.arena[key].wait_node.next;

            let opcode = registry.arena[key].opcode;
            match opcode {
                Opcode::Create | Opcode::Rescheduled => {
                    if let Some(slot) = registry.arena[key].slot_head.take() {
                        registry.slots[slot].remove(&mut registry.arena, key);
                    }
                    let interval = registry.arena[key].new_interval;
                    let (next_rev, next_slot) = self.project(absolute, interval);
                    {
                        let ev = &mut registry.arena[key];
                        ev.interval = interval;
                        ev.r = next_rev;
                        ev.slot_n = next_slot;
                        ev.slot_head = Some(next_slot as usize);
                        ev.n_scheduled += 1;
                        ev.opcode = Opcode::Scheduled;
                    }
                    registry.slots[next_slot as usize].insert_sorted(
                        &mut registry.arena,
                        key,
                        |a, b| a.r.cmp(&b.r),
                    );
                    registry.waitlist.remove(&mut registry.arena, key);
                    if opcode == Opcode::Create {
                        registry.n_slots += 1;
                    }
                    debug_trace!(
                        "placed event {} in slot {} (revolution {})",
                        registry.arena[key].serial,
                        next_slot,
                        next_rev
                    );
                }
                Opcode::Delete => {
                    registry.waitlist.remove(&mut registry.arena, key);
                    if let Some(slot) = registry.arena[key].slot_head.take() {
                        registry.slots[slot].remove(&mut registry.arena, key);
                    }
                    registry.arena.remove(key);
                    registry.n_slots = registry.n_slots.saturating_sub(1);
                }
                Opcode::Scheduled | Opcode::Unknown => {
                    registry.waitlist.remove(&mut registry.arena, key);
                }
            }
        }
    }
}

impl std::fmt::Debug for TimerWheel {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("TimerWheel")
            .field("ring_size", &self.inner.ring_size)
            .field("tick_interval", &self.inner.tick_interval)
            .field("current_tick", &self.current_tick())
            .field("revolutions", &self.revolutions())
            .finish()
    }
}

impl std::fmt::Debug for WheelHandle {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "WheelHandle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel(ring: usize, tick_ms: u64) -> TimerWheel {
        TimerWheel::new(ring, Duration::from_millis(tick_ms))
    }

    #[test]
    fn projection_uses_modulo_for_any_ring_size() {
        // non-power-of-two ring: masking instead of modulo would misplace
        let wheel = wheel(6, 10);
        assert_eq!(wheel.inner.project(0, Duration::from_millis(30)), (0, 3));
        assert_eq!(wheel.inner.project(5, Duration::from_millis(60)), (1, 5));
        assert_eq!(wheel.inner.project(11, Duration::from_millis(10)), (2, 0));
    }

    #[test]
    fn sub_tick_intervals_round_up_to_one_tick() {
        let wheel = wheel(8, 10);
        assert_eq!(wheel.inner.interval_ticks(Duration::from_millis(3)), 1);
        assert_eq!(wheel.inner.interval_ticks(Duration::ZERO), 1);
        assert_eq!(wheel.inner.interval_ticks(Duration::from_millis(25)), 2);
    }

    #[test]
    fn register_queues_on_the_waitlist() {
        let wheel = wheel(8, 10);
        let ev = wheel.register(|_| {}, &b"x"[..], Duration::from_millis(30), false);
        {
            let reg = wheel.inner.registry.lock().unwrap();
            assert_eq!(reg.waitlist.len(), 1);
            assert_eq!(reg.arena[ev.key].opcode, Opcode::Create);
            assert_eq!(reg.n_slots, 0);
        }
        // not placed yet: nothing is due
        assert_eq!(wheel.time_remaining(ev).unwrap(), Duration::ZERO);
    }

    #[test]
    fn drain_places_creates_and_frees_deletes() {
        let wheel = wheel(8, 10);
        let a = wheel.register(|_| {}, &b"a"[..], Duration::from_millis(30), true);
        let b = wheel.register(|_| {}, &b"b"[..], Duration::from_millis(50), false);

        {
            let mut reg = wheel.inner.registry.lock().unwrap();
            wheel.inner.drain_waitlist(&mut reg);
            assert_eq!(reg.n_slots, 2);
            assert_eq!(reg.arena[a.key].opcode, Opcode::Scheduled);
            assert_eq!(reg.arena[a.key].slot_n, 3);
            assert_eq!(reg.arena[b.key].slot_n, 5);
            assert!(reg.waitlist.is_empty());
        }

        wheel.unregister(a).unwrap();
        {
            let mut reg = wheel.inner.registry.lock().unwrap();
            wheel.inner.drain_waitlist(&mut reg);
            assert_eq!(reg.n_slots, 1);
            assert!(reg.arena.get(a.key).is_none());
        }
        assert!(wheel.time_remaining(a).is_err());
        assert!(wheel.time_remaining(b).is_ok());
    }

    #[test]
    fn slot_lists_stay_sorted_by_revolution() {
        let wheel = wheel(4, 10);
        // 90ms = 9 ticks -> slot 1 rev 2; 10ms = 1 tick -> slot 1 rev 0
        let late = wheel.register(|_| {}, &b"l"[..], Duration::from_millis(90), false);
        let soon = wheel.register(|_| {}, &b"s"[..], Duration::from_millis(10), false);

        let mut reg = wheel.inner.registry.lock().unwrap();
        wheel.inner.drain_waitlist(&mut reg);
        let slot = &reg.slots[1];
        let first = slot.head().unwrap();
        assert_eq!(reg.arena[first].serial, soon.serial);
        let second = reg.arena[first].slot_node.next.unwrap();
        assert_eq!(reg.arena[second].serial, late.serial);
        assert!(reg.arena[first].r < reg.arena[second].r);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let wheel = wheel(8, 10);
        let ev = wheel.register(|_| {}, &b"x"[..], Duration::from_millis(10), false);
        wheel.unregister(ev).unwrap();
        {
            let mut reg = wheel.inner.registry.lock().unwrap();
            wheel.inner.drain_waitlist(&mut reg);
        }
        assert!(matches!(wheel.reschedule(ev, Duration::from_millis(10)), Err(Error::StaleEvent)));
        assert!(matches!(wheel.unregister(ev), Err(Error::StaleEvent)));
    }

    #[test]
    fn reset_rewinds_the_logical_clock() {
        let wheel = wheel(8, 10);
        wheel.inner.current_tick.store(5, Ordering::Relaxed);
        wheel.inner.revolutions.store(2, Ordering::Relaxed);
        wheel.reset();
        assert_eq!(wheel.current_tick(), 0);
        assert_eq!(wheel.revolutions(), 0);
    }
}
