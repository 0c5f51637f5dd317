//! Three small animals taking turns on one scheduler
//!
//! Run with `RUST_LOG=debug` to watch the dispatcher work.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use cats::{OnReturn, Scheduler, StdClock, Task};

fn main() {
    env_logger::init();

    let mut scheduler = Scheduler::new(StdClock::new());
    scheduler.spawn(Task::new("rabbits", rabbits).nice(50).on_return(OnReturn::Halt));
    scheduler.spawn(Task::new("hamsters", hamsters).nice(100).on_return(OnReturn::Halt));
    scheduler.spawn(Task::new("cats", cats_task).nice(30).on_return(OnReturn::Halt));
    scheduler.join();

    log::info!("Everybody has gone home");
}

fn rabbits() {
    for _ in 0..4 {
        log::info!("Rabbit! (back in 50)");
        cats::sleep(0);
    }
}

fn hamsters() {
    for _ in 0..4 {
        log::info!("Hamster! (back in 100)");
        cats::sleep(0);
    }
}

fn cats_task() {
    for _ in 0..4 {
        log::info!("Cat! (back in 30)");
        cats::sleep(0);
    }
}

// End of File
