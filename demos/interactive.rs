//! Drive a single timer from standard input.
//!
//! Reads an integer selector per line and maps it onto the timer API, which
//! makes it easy to poke at the state machine by hand.

use std::io::{self, BufRead};
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

    println!("\t\tTimer Demo\n");
    println!("(1) pause\n(2) resume\n(3) restart\n(4) reschedule\n(5) delete\n(6) cancel\n(7) show time remaining\n(8) show timer state\n");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        let selection: u32 = match line.trim().parse() {
            Ok(selection) => selection,
            Err(_) => continue,
        };

        let result = match selection {
            1 => timer.pause(),
            2 => timer.resume(),
            3 => timer.restart(),
            4 => timer.reschedule(timer.expiry(), timer.interval()),
            5 => timer.delete(),
            6 => timer.cancel(),
            7 => {
                match timer.remaining() {
                    Some(remaining) => println!("Time remaining = {remaining:?}"),
                    None => println!("Timer is not running"),
                }
                Ok(())
            }
            8 => {
                println!("{timer:?}");
                Ok(())
            }
            _ => continue,
        };

        if let Err(err) = result {
            println!("operation failed: {err}");
        }
    }
}
