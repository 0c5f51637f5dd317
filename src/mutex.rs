//! Holds the [`Mutex`] reader/writer lock and its [`ScopedLock`] guard

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::Cell;

use crate::scheduler::with_active;
use crate::task::{Channel, Message, Notify};
use crate::timeout::Timeout;
use crate::{Error, Tick};

/// Rendezvous message types on a lock's endpoint: the exclusive slot was
/// released, or the shared count changed
const KIND_EXCLUSIVE: usize = 1;
const KIND_SHARED: usize = 2;

/// A reader/writer lock for tasks.
///
/// Built entirely on the scheduler's wait/notify rendezvous, with the
/// lock's own address as the endpoint on the lock channel, so it costs
/// two words of state and nothing when uncontended.
///
/// Writers take precedence: [`Mutex::lock`] claims the exclusive slot
/// *before* draining the remaining readers, so readers arriving after a
/// writer queue up behind it.
///
/// Acquisition methods suspend, so they may only be called from inside a
/// running task; they return `false` when called anywhere else. The
/// `try_` variants never suspend.
pub struct Mutex {
    shared: Cell<usize>,
    exclusive: Cell<bool>,
}

// SAFETY: all tasks run interleaved on one host thread, so the Cells are
// never touched by two executions at once even when the lock lives in a
// static.
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Create an unlocked lock
    pub const fn new() -> Mutex {
        Mutex {
            shared: Cell::new(0),
            exclusive: Cell::new(false),
        }
    }

    /// The rendezvous endpoint for this lock is its own address
    fn endpoint(&self) -> usize {
        self as *const Mutex as usize
    }

    /// Is there a task currently running to suspend?
    fn in_task() -> bool {
        with_active(|scheduler| scheduler.current_id().is_some()).unwrap_or(false)
    }

    fn wait_on(&self, kind: usize, timeout: Tick) -> Result<(), Error> {
        with_active(|scheduler| {
            scheduler
                .generic_wait(Channel::Mutex, self.endpoint(), kind, timeout)
                .map(|_payload| ())
        })
        .unwrap_or(Err(Error::NoCurrentTask))
    }

    /// Fire-and-forget wake of tasks parked on this lock
    fn wake(&self, kind: usize, how: Notify) {
        with_active(|scheduler| {
            scheduler.generic_notify(
                Channel::Mutex,
                self.endpoint(),
                Message { kind, payload: 0 },
                0,
                how,
            )
        });
    }

    /// Acquire exclusively, waiting up to `timeout` ticks (zero waits
    /// forever).
    ///
    /// Returns false on timeout, with the exclusive claim released again
    /// if it had already been made.
    pub fn lock(&self, timeout: Tick) -> bool {
        if !Self::in_task() {
            return false;
        }
        let deadline = Timeout::new(timeout);

        // Claim the exclusive slot
        while self.exclusive.get() {
            if deadline.is_expired() || self.wait_on(KIND_EXCLUSIVE, deadline.remaining()).is_err()
            {
                return false;
            }
        }
        self.exclusive.set(true);

        // Then wait for the readers already inside to drain
        while self.shared.get() > 0 {
            if deadline.is_expired() || self.wait_on(KIND_SHARED, deadline.remaining()).is_err() {
                // Give the slot back so the release is not lost
                self.exclusive.set(false);
                self.wake(KIND_EXCLUSIVE, Notify::One);
                return false;
            }
        }
        true
    }

    /// Release an exclusive hold.
    ///
    /// Wakes every writer counting readers down, then the next exclusive
    /// contender. No effect if the lock is not exclusively held.
    pub fn unlock(&self) {
        if !Self::in_task() {
            return;
        }
        if self.exclusive.get() {
            self.exclusive.set(false);
            self.wake(KIND_SHARED, Notify::All);
            self.wake(KIND_EXCLUSIVE, Notify::One);
        }
    }

    /// Acquire shared, waiting up to `timeout` ticks (zero waits
    /// forever) for any exclusive holder to release
    pub fn shared_lock(&self, timeout: Tick) -> bool {
        if !Self::in_task() {
            return false;
        }
        let deadline = Timeout::new(timeout);

        while self.exclusive.get() {
            if deadline.is_expired() || self.wait_on(KIND_EXCLUSIVE, deadline.remaining()).is_err()
            {
                return false;
            }
        }
        self.shared.set(self.shared.get() + 1);
        // A writer draining readers keeps count through these
        self.wake(KIND_SHARED, Notify::One);
        true
    }

    /// Release a shared hold
    pub fn shared_unlock(&self) {
        if !Self::in_task() {
            return;
        }
        if self.shared.get() > 0 {
            self.shared.set(self.shared.get() - 1);
            self.wake(KIND_SHARED, Notify::One);
        }
    }

    /// Acquire exclusively only if the lock is completely free; never
    /// suspends
    pub fn try_lock(&self) -> bool {
        if self.exclusive.get() || self.shared.get() > 0 {
            return false;
        }
        self.exclusive.set(true);
        true
    }

    /// Acquire shared only if the lock is completely free; never
    /// suspends
    pub fn try_shared_lock(&self) -> bool {
        if self.exclusive.get() || self.shared.get() > 0 {
            return false;
        }
        self.shared.set(1);
        true
    }

    /// How many shared holds are outstanding
    pub fn shared_count(&self) -> usize {
        self.shared.get()
    }

    /// Is the exclusive slot claimed?
    pub fn is_locked(&self) -> bool {
        self.exclusive.get()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Mutex::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    None,
    Exclusive,
    Shared,
}

/// Holds a [`Mutex`] acquisition for its own lifetime.
///
/// Acquire through the guard and the matching release happens when the
/// guard is dropped, however the scope is left. A guard holds at most
/// one acquisition: asking again while it already holds one fails
/// without side effects.
pub struct ScopedLock<'a> {
    lock: &'a Mutex,
    kind: LockKind,
}

impl<'a> ScopedLock<'a> {
    /// Wrap a lock without acquiring anything yet
    pub fn new(lock: &'a Mutex) -> ScopedLock<'a> {
        ScopedLock {
            lock,
            kind: LockKind::None,
        }
    }

    /// Acquire exclusively; false on timeout or if this guard already
    /// holds an acquisition
    pub fn lock(&mut self, timeout: Tick) -> bool {
        if self.kind != LockKind::None {
            return false;
        }
        if self.lock.lock(timeout) {
            self.kind = LockKind::Exclusive;
            true
        } else {
            false
        }
    }

    /// Acquire shared; false on timeout or if this guard already holds
    /// an acquisition
    pub fn shared_lock(&mut self, timeout: Tick) -> bool {
        if self.kind != LockKind::None {
            return false;
        }
        if self.lock.shared_lock(timeout) {
            self.kind = LockKind::Shared;
            true
        } else {
            false
        }
    }

    /// How many shared holds the underlying lock has
    pub fn shared_count(&self) -> usize {
        self.lock.shared_count()
    }

    /// Is the underlying lock exclusively held?
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl Drop for ScopedLock<'_> {
    fn drop(&mut self) {
        match self.kind {
            LockKind::Exclusive => self.lock.unlock(),
            LockKind::Shared => self.lock.shared_unlock(),
            LockKind::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No scheduler is active here, so only the non-suspending paths can
    // be exercised; the contended paths are covered by the scenario
    // tests.

    #[test]
    fn try_lock_claims_and_rejects() {
        let m = Mutex::new();
        assert!(m.try_lock());
        assert!(m.is_locked());
        assert!(!m.try_lock());
        assert!(!m.try_shared_lock());
    }

    #[test]
    fn try_shared_lock_needs_a_free_lock() {
        let m = Mutex::new();
        assert!(m.try_shared_lock());
        assert_eq!(m.shared_count(), 1);
        // Even another reader is refused by the try variant
        assert!(!m.try_shared_lock());
        assert!(!m.try_lock());
        assert_eq!(m.shared_count(), 1);
    }

    #[test]
    fn blocking_calls_outside_a_task_fail() {
        let m = Mutex::new();
        assert!(!m.lock(10));
        assert!(!m.shared_lock(10));
        assert!(!m.is_locked());
        assert_eq!(m.shared_count(), 0);
    }

    #[test]
    fn guard_refuses_a_second_acquisition() {
        let m = Mutex::new();
        let mut guard = ScopedLock::new(&m);
        // Outside a task nothing can be acquired, so the guard stays empty
        assert!(!guard.lock(1));
        assert!(!guard.shared_lock(1));
        drop(guard);
        assert!(!m.is_locked());
    }
}

// End of File
