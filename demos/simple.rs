use std::env;
use std::io::{self, BufRead};

use log::info;

use fsmonitor::{Constraints, Event, Monitor};

fn main() {
    pretty_env_logger::init();
    let root = env::args().nth(1).unwrap_or_else(|| String::from("./"));
    let mut monitor = Monitor::new(
        root,
        Constraints::default().with_recursive(true),
        |event: Event| info!("{}", event),
    );
    monitor.start().expect("monitor to be started");

    info!("Press enter to stop.");
    let mut line = String::new();
    drop(io::stdin().lock().read_line(&mut line));
    monitor.stop();
}
