use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tickwheel::{EventId, TimerWheel};

const TICK: Duration = Duration::from_millis(50);

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[test]
fn recurring_event_fires_every_interval() {
    let wheel = TimerWheel::new(8, TICK);
    let instants = Arc::new(Mutex::new(Vec::new()));

    // three ticks apart: due at wheel ticks 3, 6, 9
    wheel.register(
        {
            let instants = Arc::clone(&instants);
            move |arg| {
                assert_eq!(arg, b"ev");
                instants.lock().unwrap().push(Instant::now());
            }
        },
        &b"ev"[..],
        ms(150),
        true,
    );

    wheel.start().unwrap();
    thread::sleep(ms(520));
    wheel.stop();

    let instants = instants.lock().unwrap();
    assert!(
        (3..=4).contains(&instants.len()),
        "expected ~3 fires, saw {}",
        instants.len()
    );
    for pair in instants.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= ms(100) && gap <= ms(250),
            "cadence off: consecutive fires {gap:?} apart"
        );
    }
}

#[test]
fn same_slot_fires_in_registration_order() {
    let wheel = TimerWheel::new(8, TICK);
    let order = Arc::new(Mutex::new(Vec::new()));

    let recorder = |name: &'static str| {
        let order = Arc::clone(&order);
        move |_arg: &[u8]| order.lock().unwrap().push(name)
    };

    // a and b share a slot every time; c joins them at tick 4
    wheel.register(recorder("a"), Vec::new(), ms(100), true);
    wheel.register(recorder("b"), Vec::new(), ms(100), true);
    wheel.register(recorder("c"), Vec::new(), ms(200), true);

    wheel.start().unwrap();
    thread::sleep(ms(230));
    wheel.stop();

    let order = order.lock().unwrap();
    // tick 2: a b (registration order); tick 4: c was placed in slot 4
    // first, then a and b re-anchored behind it, still in order
    assert_eq!(&order[..], &["a", "b", "c", "a", "b"]);
}

#[test]
fn reschedule_during_a_fire_is_deferred_one_tick() {
    let wheel = TimerWheel::new(8, TICK);
    let handle = wheel.handle();
    let instants = Arc::new(Mutex::new(Vec::new()));
    let id_cell: Arc<Mutex<Option<EventId>>> = Arc::new(Mutex::new(None));

    let ev = wheel.register(
        {
            let handle = handle.clone();
            let instants = Arc::clone(&instants);
            let id_cell = Arc::clone(&id_cell);
            move |_arg| {
                let mut instants = instants.lock().unwrap();
                instants.push(Instant::now());
                if instants.len() == 1 {
                    let id = id_cell.lock().unwrap().expect("id not stored yet");
                    handle.reschedule(id, ms(100)).unwrap();
                }
            }
        },
        Vec::new(),
        ms(150),
        true,
    );
    *id_cell.lock().unwrap() = Some(ev);

    wheel.start().unwrap();
    // first fire at tick 3; the reschedule applies at the tick-3 drain, so
    // the second fire lands at tick 5 and the cadence is 2 ticks after
    thread::sleep(ms(480));
    wheel.stop();

    let instants = instants.lock().unwrap();
    assert!(instants.len() >= 3, "saw only {} fires", instants.len());
    let deferred = instants[1] - instants[0];
    assert!(
        deferred >= ms(75),
        "reschedule took effect within the same tick: {deferred:?}"
    );
    for pair in instants[1..].windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= ms(50) && gap <= ms(200),
            "new cadence off: {gap:?}"
        );
    }
}

#[test]
fn unregister_stops_a_recurring_event() {
    let wheel = TimerWheel::new(8, TICK);
    let fired = Arc::new(AtomicU32::new(0));

    let ev = wheel.register(
        {
            let fired = Arc::clone(&fired);
            move |_arg| {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        },
        Vec::new(),
        ms(100),
        true,
    );

    wheel.start().unwrap();
    thread::sleep(ms(120));
    assert!(fired.load(Ordering::SeqCst) >= 1);

    wheel.unregister(ev).unwrap();
    // the deferred delete may let at most one more fire through
    thread::sleep(ms(150));
    let settled = fired.load(Ordering::SeqCst);
    thread::sleep(ms(250));
    assert_eq!(fired.load(Ordering::SeqCst), settled, "event fired after unregister");
    assert!(wheel.is_empty());
}

#[test]
fn events_are_placed_at_tick_boundaries() {
    let wheel = TimerWheel::new(8, TICK);
    let a = wheel.register(|_| {}, Vec::new(), ms(200), true);
    let b = wheel.register(|_| {}, Vec::new(), ms(300), true);

    // nothing is installed until the wheel runs a drain
    assert!(wheel.is_empty());
    assert_eq!(wheel.time_remaining(a).unwrap(), Duration::ZERO);

    wheel.start().unwrap();
    thread::sleep(ms(80));
    assert_eq!(wheel.len(), 2);

    let rem_a = wheel.time_remaining(a).unwrap();
    let rem_b = wheel.time_remaining(b).unwrap();
    assert!(rem_a > Duration::ZERO && rem_a <= ms(200));
    assert!(rem_b > rem_a, "later event reports earlier due time");

    wheel.unregister(b).unwrap();
    thread::sleep(ms(100));
    assert_eq!(wheel.len(), 1);
    wheel.stop();
}

#[test]
fn callbacks_can_register_new_events() {
    let wheel = TimerWheel::new(8, TICK);
    let handle = wheel.handle();
    let chained = Arc::new(AtomicU32::new(0));

    wheel.register(
        {
            let handle = handle.clone();
            let chained = Arc::clone(&chained);
            move |_arg| {
                let chained = Arc::clone(&chained);
                handle.register(
                    move |_arg| {
                        chained.fetch_add(1, Ordering::SeqCst);
                    },
                    Vec::new(),
                    ms(100),
                    false,
                );
            }
        },
        Vec::new(),
        ms(100),
        false,
    );

    wheel.start().unwrap();
    thread::sleep(ms(400));
    wheel.stop();

    assert_eq!(chained.load(Ordering::SeqCst), 1, "chained event did not fire");
}

#[test]
fn one_shot_fires_once_and_can_be_rescheduled() {
    let wheel = TimerWheel::new(8, TICK);
    let fired = Arc::new(AtomicU32::new(0));

    let ev = wheel.register(
        {
            let fired = Arc::clone(&fired);
            move |_arg| {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        },
        Vec::new(),
        ms(100),
        false,
    );

    wheel.start().unwrap();
    thread::sleep(ms(300));
    assert_eq!(fired.load(Ordering::SeqCst), 1, "one-shot fired more than once");
    // fired but still registered: the handle can be re-armed
    assert_eq!(wheel.time_remaining(ev).unwrap(), Duration::ZERO);

    wheel.reschedule(ev, ms(100)).unwrap();
    thread::sleep(ms(250));
    wheel.stop();
    assert_eq!(fired.load(Ordering::SeqCst), 2, "rescheduled one-shot did not refire");
}
