//! # CATS - a Cooperative, Attentive Task Scheduler
//!
//! A scheduler for a fixed or growing set of lightweight tasks that
//! share one host thread and hand control to each other at explicit
//! suspension points. Every task has its own stack, a deadline, a
//! priority for breaking deadline ties, and a `nice` interval that says
//! how long a plain yield should suspend it for. Dispatch is earliest
//! deadline first; when nothing is due yet, the host clock is asked to
//! sleep, so an idle system idles the host too.
//!
//! On top of the dispatcher sit a wait/notify rendezvous — tasks block
//! on an (endpoint, message type) pair and other tasks wake them with a
//! one-word payload — and a reader/writer [`Mutex`] built entirely out
//! of that rendezvous.
//!
//! The crate is `no_std` + `alloc` unless the (default) `std` feature is
//! enabled, which adds [`StdClock`], panic capture off task stacks and a
//! per-host-thread notion of the running scheduler. Logging goes through
//! [`log`](https://crates.io/crates/log) by default or
//! [`defmt`](https://crates.io/crates/defmt) via the `defmt` feature.
//!
//! ## Example
//!
//! ```
//! use cats::{OnReturn, Scheduler, StdClock, Task};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! static LAPS: AtomicU32 = AtomicU32::new(0);
//!
//! fn wheel() {
//!     for _ in 0..3 {
//!         LAPS.fetch_add(1, Ordering::Relaxed);
//!         // Suspend for this task's nice interval
//!         cats::sleep(0);
//!     }
//! }
//!
//! let mut scheduler = Scheduler::new(StdClock::new());
//! scheduler.spawn(Task::new("wheel", wheel).nice(1).on_return(OnReturn::Halt));
//! scheduler.join();
//! assert_eq!(LAPS.load(Ordering::Relaxed), 3);
//! ```

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[macro_use]
mod macros;

mod asm;
mod clock;
mod mutex;
mod registry;
mod scheduler;
mod stack;
mod task;
mod timeout;

pub use clock::Clock;
#[cfg(feature = "std")]
pub use clock::StdClock;
pub use mutex::{Mutex, ScopedLock};
pub use scheduler::Scheduler;
pub use stack::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use task::{EntryFn, Notify, OnReturn, Status, Task, TaskId, TaskInfo};
pub use timeout::Timeout;

use task::{Channel, Message};

/// Host-monotonic time, in whatever unit the host [`Clock`] counts.
///
/// All deadlines in the system are absolute ticks. As a *duration*
/// argument, zero means "no deadline": a plain yield falls back to the
/// task's nice interval, and a wait parks until notified.
pub type Tick = u64;

/// The ways a wait can fail
///
/// Lock acquisition reports failure through its boolean returns; only
/// the rendezvous surface needs a payload-or-error shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The deadline expired before the rendezvous matched
    Timeout,
    /// The call suspends, but no task is running
    NoCurrentTask,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Error::Timeout => "timed out",
            Error::NoCurrentTask => "no task is running",
        };
        f.write_str(text)
    }
}

/// Get the current time in ticks
///
/// Zero when no scheduler is running on this host thread.
pub fn now() -> Tick {
    scheduler::with_active(|scheduler| scheduler.clock_now()).unwrap_or(0)
}

/// Give every other due task a turn, then continue as soon as possible
///
/// No effect outside a running task.
pub fn yield_now() {
    scheduler::with_active(|scheduler| {
        scheduler.yield_with(0, Status::Now);
    });
}

/// Suspend the current task for at least `duration` ticks
///
/// A `duration` of zero suspends for the task's nice interval. No
/// effect outside a running task.
pub fn sleep(duration: Tick) {
    scheduler::with_active(|scheduler| {
        scheduler.yield_with(duration, Status::Sleep);
    });
}

/// Block the current task on a rendezvous until a matching
/// [`notify`] delivers a payload.
///
/// The rendezvous is named by the address of `endpoint` plus the caller
/// chosen message type `kind`; both must match the notifier exactly.
/// `timeout` is in ticks; zero parks with no deadline at all, in which
/// case only a notify can resume the task.
pub fn wait<T>(endpoint: &T, kind: usize, timeout: Tick) -> Result<usize, Error> {
    scheduler::with_active(|scheduler| {
        scheduler.generic_wait(Channel::User, endpoint_addr(endpoint), kind, timeout)
    })
    .unwrap_or(Err(Error::NoCurrentTask))
}

/// Deliver `payload` to tasks [`wait`]ing on this rendezvous.
///
/// Wakes [`Notify::One`] or [`Notify::All`] of the tasks whose
/// (endpoint, kind) match exactly. If none are parked yet and `timeout`
/// is non-zero, waits up to that long for one to arrive. Returns the
/// number of tasks woken; zero means nobody was listening in time. A
/// `timeout` of zero makes this a fire-and-forget poll.
///
/// Returns 0 outside a running task.
pub fn notify<T>(endpoint: &T, kind: usize, payload: usize, timeout: Tick, how: Notify) -> usize {
    scheduler::with_active(|scheduler| {
        scheduler.generic_notify(
            Channel::User,
            endpoint_addr(endpoint),
            Message { kind, payload },
            timeout,
            how,
        )
    })
    .unwrap_or(0)
}

/// A rendezvous endpoint is an object identity
fn endpoint_addr<T>(endpoint: &T) -> usize {
    endpoint as *const T as usize
}

// End of File
