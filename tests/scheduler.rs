//! End-to-end scheduler scenarios on a virtual clock
//!
//! Tasks record what happened into per-module statics and every
//! assertion that matters is repeated on the host side after `join`
//! returns. The clock advances instantly on sleep, so scenario time is
//! deterministic.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use cats::{Clock, Error, Mutex, Notify, OnReturn, ScopedLock, Scheduler, Task, Tick};

/// A virtual clock: sleeping advances the tick count and nothing else,
/// so an idle scheduler skips straight to the next deadline
struct TestClock {
    ticks: AtomicU64,
    sleeps: AtomicUsize,
}

impl TestClock {
    const fn new() -> TestClock {
        TestClock {
            ticks: AtomicU64::new(0),
            sleeps: AtomicUsize::new(0),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> Tick {
        self.ticks.load(Ordering::Relaxed)
    }

    fn sleep(&self, duration: Tick) {
        self.sleeps.fetch_add(1, Ordering::Relaxed);
        self.ticks.fetch_add(duration, Ordering::Relaxed);
    }
}

/// A test task: halts when its entry returns so `join` can finish
fn task(name: &'static str, entry: fn()) -> Task {
    Task::new(name, entry)
        .stack_size(64 * 1024)
        .on_return(OnReturn::Halt)
}

mod priority_tie_break {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static ORDER: std::sync::Mutex<Vec<&'static str>> = std::sync::Mutex::new(Vec::new());

    fn low() {
        for _ in 0..3 {
            ORDER.lock().unwrap().push("low");
            cats::sleep(0);
        }
    }

    fn high() {
        for _ in 0..3 {
            ORDER.lock().unwrap().push("high");
            cats::sleep(0);
        }
    }

    // Both tasks share a nice interval, so their deadlines always tie;
    // the higher priority must be dispatched first every round.
    #[test]
    fn higher_priority_wins_deadline_ties() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("low", low).nice(100).priority(1));
        scheduler.spawn(task("high", high).nice(100).priority(5));
        assert!(!scheduler.join());
        assert_eq!(
            *ORDER.lock().unwrap(),
            ["high", "low", "high", "low", "high", "low"]
        );
    }
}

mod nice_cadence {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static WAKEUPS: std::sync::Mutex<Vec<Tick>> = std::sync::Mutex::new(Vec::new());

    fn metronome() {
        for _ in 0..3 {
            cats::sleep(0);
            WAKEUPS.lock().unwrap().push(cats::now());
        }
    }

    // A plain yield suspends for exactly the nice interval on a virtual
    // clock.
    #[test]
    fn plain_yield_sleeps_for_the_nice_interval() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("metronome", metronome).nice(100));
        assert!(!scheduler.join());
        assert_eq!(*WAKEUPS.lock().unwrap(), [100, 200, 300]);
    }
}

mod wait_timeout {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static ENDPOINT: u8 = 0;
    static OUTCOME: std::sync::Mutex<Option<(Result<usize, Error>, Tick)>> =
        std::sync::Mutex::new(None);

    fn waiter() {
        let result = cats::wait(&ENDPOINT, 1, 2000);
        *OUTCOME.lock().unwrap() = Some((result, cats::now()));
    }

    // Nobody notifies, so the wait must fail once the deadline passes.
    #[test]
    fn unanswered_wait_times_out() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("waiter", waiter));
        assert!(!scheduler.join());
        let (result, when) = OUTCOME.lock().unwrap().expect("waiter never finished");
        assert_eq!(result, Err(Error::Timeout));
        assert!(when >= 2000, "timed out early, at {when}");
    }
}

mod forever_park {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static ENDPOINT: u8 = 0;
    static OUTCOME: std::sync::Mutex<Option<(Result<usize, Error>, Tick)>> =
        std::sync::Mutex::new(None);
    static DELIVERED: AtomicUsize = AtomicUsize::new(0);

    fn waiter() {
        let result = cats::wait(&ENDPOINT, 7, 0);
        *OUTCOME.lock().unwrap() = Some((result, cats::now()));
    }

    fn notifier() {
        cats::sleep(5000);
        DELIVERED.store(cats::notify(&ENDPOINT, 7, 42, 0, Notify::One), Ordering::Relaxed);
    }

    // A zero timeout parks with no deadline: long after any plausible
    // deadline has passed, the waiter is still there for the notify.
    #[test]
    fn zero_timeout_waits_indefinitely() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("waiter", waiter));
        scheduler.spawn(task("notifier", notifier));
        assert!(!scheduler.join());
        let (result, when) = OUTCOME.lock().unwrap().expect("waiter never finished");
        assert_eq!(result, Ok(42));
        assert!(when >= 5000);
        assert_eq!(DELIVERED.load(Ordering::Relaxed), 1);
    }
}

mod parked_forever {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static ENDPOINT: u8 = 0;
    static REACHED: AtomicUsize = AtomicUsize::new(0);

    fn loner() {
        REACHED.store(1, Ordering::Relaxed);
        let _ = cats::wait(&ENDPOINT, 1, 0);
        REACHED.store(2, Ordering::Relaxed);
    }

    // One task parked with no deadline and nobody to wake it: the
    // scheduler must give up rather than sleep the host forever.
    #[test]
    fn join_bails_out_when_nothing_can_run() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("loner", loner));
        assert!(!scheduler.join());
        assert_eq!(REACHED.load(Ordering::Relaxed), 1);
        assert_eq!(scheduler.len(), 1, "the parked task is still attached");
    }
}

mod rendezvous_stream {
    use super::*;

    const LAPS: usize = 20;

    static CLOCK: TestClock = TestClock::new();
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    static SEEN: std::sync::Mutex<Vec<usize>> = std::sync::Mutex::new(Vec::new());
    static MISSED: AtomicUsize = AtomicUsize::new(0);

    fn producer() {
        for _ in 0..LAPS {
            let value = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
            if cats::notify(&COUNTER, 1, value, 2000, Notify::One) == 0 {
                MISSED.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }

    fn consumer() {
        for _ in 0..LAPS {
            match cats::wait(&COUNTER, 1, 2000) {
                Ok(value) => SEEN.lock().unwrap().push(value),
                Err(_) => return,
            }
        }
    }

    // Each increment pairs with exactly one wait: the consumer sees a
    // gap-free monotonic stream.
    #[test]
    fn every_notify_pairs_with_one_wait() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("producer", producer));
        scheduler.spawn(task("consumer", consumer));
        assert!(!scheduler.join());
        assert_eq!(MISSED.load(Ordering::Relaxed), 0);
        let expected: Vec<usize> = (1..=LAPS).collect();
        assert_eq!(*SEEN.lock().unwrap(), expected);
    }
}

mod exact_match {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static ENDPOINT: u8 = 0;
    static WRONG_KIND: AtomicUsize = AtomicUsize::new(usize::MAX);
    static RIGHT_KIND: AtomicUsize = AtomicUsize::new(usize::MAX);
    static RECEIVED: std::sync::Mutex<Option<Result<usize, Error>>> = std::sync::Mutex::new(None);

    fn waiter() {
        *RECEIVED.lock().unwrap() = Some(cats::wait(&ENDPOINT, 2, 300));
    }

    fn notifier() {
        cats::sleep(10);
        // Same endpoint, different message type: must not match
        WRONG_KIND.store(cats::notify(&ENDPOINT, 1, 111, 0, Notify::All), Ordering::Relaxed);
        RIGHT_KIND.store(cats::notify(&ENDPOINT, 2, 222, 0, Notify::All), Ordering::Relaxed);
    }

    #[test]
    fn notify_matches_on_type_exactly() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("waiter", waiter));
        scheduler.spawn(task("notifier", notifier));
        assert!(!scheduler.join());
        assert_eq!(WRONG_KIND.load(Ordering::Relaxed), 0);
        assert_eq!(RIGHT_KIND.load(Ordering::Relaxed), 1);
        assert_eq!(*RECEIVED.lock().unwrap(), Some(Ok(222)));
    }
}

mod no_listeners {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static ENDPOINT: u8 = 0;
    static WOKEN: AtomicUsize = AtomicUsize::new(usize::MAX);

    fn shouter() {
        WOKEN.store(cats::notify(&ENDPOINT, 1, 9, 0, Notify::All), Ordering::Relaxed);
    }

    // A fire-and-forget notify with no waiters is not an error, it just
    // reports zero.
    #[test]
    fn notify_without_waiters_returns_zero() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("shouter", shouter));
        assert!(!scheduler.join());
        assert_eq!(WOKEN.load(Ordering::Relaxed), 0);
    }
}

mod reader_writer {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static LOCK: Mutex = Mutex::new();
    static VALUE: AtomicUsize = AtomicUsize::new(0);
    static EVENTS: std::sync::Mutex<Vec<&'static str>> = std::sync::Mutex::new(Vec::new());

    fn push(event: &'static str) {
        EVENTS.lock().unwrap().push(event);
    }

    fn first_reader() {
        assert!(LOCK.shared_lock(0));
        push("r1 in");
        cats::sleep(50);
        push("r1 out");
        LOCK.shared_unlock();
    }

    fn writer() {
        cats::sleep(10);
        push("w wants");
        assert!(LOCK.lock(0));
        push("w in");
        VALUE.store(1, Ordering::Relaxed);
        LOCK.unlock();
        push("w out");
    }

    fn second_reader() {
        cats::sleep(20);
        push("r2 wants");
        // The writer got in line first, so this blocks until it is done
        assert!(LOCK.shared_lock(0));
        push("r2 in");
        assert_eq!(VALUE.load(Ordering::Relaxed), 1);
        LOCK.shared_unlock();
    }

    #[test]
    fn writers_take_precedence_over_late_readers() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("r1", first_reader));
        scheduler.spawn(task("w", writer));
        scheduler.spawn(task("r2", second_reader));
        assert!(!scheduler.join());
        assert_eq!(
            *EVENTS.lock().unwrap(),
            ["r1 in", "w wants", "r2 wants", "r1 out", "w in", "w out", "r2 in"]
        );
        assert!(!LOCK.is_locked());
        assert_eq!(LOCK.shared_count(), 0);
    }
}

mod try_locks {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static LOCK: Mutex = Mutex::new();
    static DONE: AtomicUsize = AtomicUsize::new(0);

    fn prober() {
        assert!(LOCK.shared_lock(0));
        // With a reader inside, neither try variant may succeed or
        // disturb the counters
        assert!(!LOCK.try_lock());
        assert!(!LOCK.try_shared_lock());
        assert_eq!(LOCK.shared_count(), 1);
        assert!(!LOCK.is_locked());
        LOCK.shared_unlock();
        assert!(LOCK.try_lock());
        LOCK.unlock();
        DONE.store(1, Ordering::Relaxed);
    }

    #[test]
    fn try_variants_need_a_completely_free_lock() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("prober", prober));
        assert!(!scheduler.join());
        assert_eq!(DONE.load(Ordering::Relaxed), 1);
    }
}

mod scoped_guard {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static LOCK: Mutex = Mutex::new();
    static DONE: AtomicUsize = AtomicUsize::new(0);

    fn guarded() {
        {
            let mut guard = ScopedLock::new(&LOCK);
            assert!(guard.lock(0));
            assert!(LOCK.is_locked());
            // One acquisition per guard
            assert!(!guard.shared_lock(0));
            assert!(!guard.lock(0));
        }
        assert!(!LOCK.is_locked(), "drop must release the exclusive hold");
        {
            let mut guard = ScopedLock::new(&LOCK);
            assert!(guard.shared_lock(0));
            assert_eq!(guard.shared_count(), 1);
        }
        assert_eq!(LOCK.shared_count(), 0, "drop must release the shared hold");
        DONE.store(1, Ordering::Relaxed);
    }

    #[test]
    fn guard_releases_on_drop_and_holds_once() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("guarded", guarded));
        assert!(!scheduler.join());
        assert_eq!(DONE.load(Ordering::Relaxed), 1);
    }
}

mod stack_integrity {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static INTACT: AtomicUsize = AtomicUsize::new(0);

    fn patterned<const SEED: u8>() {
        let mut buffer = [0u8; 1024];
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = (i as u8) ^ SEED;
        }
        for _ in 0..5 {
            cats::sleep(10);
            for (i, byte) in buffer.iter().enumerate() {
                assert_eq!(*byte, (i as u8) ^ SEED, "stack corrupted at byte {i}");
            }
        }
        INTACT.fetch_add(1, Ordering::Relaxed);
    }

    // Local state must survive any number of suspensions, for every
    // task, even as the tasks interleave.
    #[test]
    fn locals_survive_suspension() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(task("pattern-a", patterned::<0xA5>));
        scheduler.spawn(task("pattern-b", patterned::<0x3C>));
        assert!(!scheduler.join());
        assert_eq!(INTACT.load(Ordering::Relaxed), 2);
    }
}

mod empty_registry {
    use super::*;

    static CLOCK: TestClock = TestClock::new();

    // Nothing to run: join reports it immediately and never consults
    // the clock's sleep.
    #[test]
    fn join_on_empty_returns_false_without_sleeping() {
        let mut scheduler = Scheduler::new(&CLOCK);
        assert!(!scheduler.join());
        assert_eq!(CLOCK.sleeps.load(Ordering::Relaxed), 0);
    }
}

mod remove_before_join {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static RAN: std::sync::Mutex<Vec<&'static str>> = std::sync::Mutex::new(Vec::new());

    fn dropped() {
        RAN.lock().unwrap().push("dropped");
    }

    fn kept() {
        RAN.lock().unwrap().push("kept");
    }

    #[test]
    fn removed_tasks_never_run() {
        let mut scheduler = Scheduler::new(&CLOCK);
        let doomed = scheduler.spawn(task("dropped", dropped));
        scheduler.spawn(task("kept", kept));
        assert_eq!(scheduler.len(), 2);
        assert!(scheduler.remove(doomed));
        assert!(!scheduler.remove(doomed), "second removal must fail");
        assert_eq!(scheduler.len(), 1);
        assert!(!scheduler.join());
        assert_eq!(*RAN.lock().unwrap(), ["kept"]);
    }
}

mod restart_policy {
    use super::*;

    static CLOCK: TestClock = TestClock::new();
    static ENDPOINT: u8 = 0;
    static LAPS: AtomicUsize = AtomicUsize::new(0);

    // Each entry return is one lap; the default policy re-enters the
    // entry at the next dispatch. On the final lap the task parks with
    // no deadline, leaving the scheduler nothing to run.
    fn lap() {
        let laps = LAPS.fetch_add(1, Ordering::Relaxed) + 1;
        if laps >= 4 {
            let _ = cats::wait(&ENDPOINT, 1, 0);
        } else {
            cats::sleep(10);
        }
    }

    #[test]
    fn restart_reenters_the_entry() {
        let mut scheduler = Scheduler::new(&CLOCK);
        scheduler.spawn(Task::new("lap", lap).stack_size(64 * 1024).nice(10));
        assert!(!scheduler.join());
        assert_eq!(LAPS.load(Ordering::Relaxed), 4);
    }
}

// End of File
