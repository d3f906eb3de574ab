//! A timer firing once a second, printing its argument each time, until the
//! process receives a termination signal.

use std::sync::mpsc;
use std::time::Duration;

fn main() {
    let timer = tickwheel::TimerBuilder::new()
        .expiry(Duration::from_millis(1000))
        .interval(Duration::from_millis(1000))
        .build(
            |_timer, arg| println!("data = {}", String::from_utf8_lossy(arg)),
            &b"demo"[..],
        )
        .expect("unable to create timer");

    timer.start().expect("unable to start timer");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("unable to install signal handler");

    let _ = rx.recv();
    let _ = timer.delete();
}
