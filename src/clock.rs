//! Holds the [`Clock`] contract and the hosted [`StdClock`]

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::Tick;

/// The time source the scheduler runs against.
///
/// The host must supply one of these when building a
/// [`Scheduler`](crate::Scheduler). Two primitives are required:
///
/// * [`Clock::now`] — a monotonic, non-decreasing tick counter. The tick
///   unit is whatever the host wants it to be (the scheduler only ever
///   compares ticks and subtracts them), but every deadline in the system
///   is expressed in it.
/// * [`Clock::sleep`] — block the host for *at least* the given number of
///   ticks. This is where a power-conscious port can stop the core; a
///   simulation can simply advance its counter.
pub trait Clock {
    /// Get the current tick count
    fn now(&self) -> Tick;

    /// Block the host for at least `duration` ticks
    fn sleep(&self, duration: Tick);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn sleep(&self, duration: Tick) {
        (**self).sleep(duration)
    }
}

/// A millisecond clock for hosted targets
///
/// Ticks are milliseconds since the clock was created.
#[cfg(feature = "std")]
pub struct StdClock {
    epoch: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Create a clock whose tick zero is now
    pub fn new() -> StdClock {
        StdClock {
            epoch: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        StdClock::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now(&self) -> Tick {
        self.epoch.elapsed().as_millis() as Tick
    }

    fn sleep(&self, duration: Tick) {
        std::thread::sleep(std::time::Duration::from_millis(duration));
    }
}

// End of File
