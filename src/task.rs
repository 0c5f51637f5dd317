//! Holds the [`Task`] control block and its scheduling state

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::Tick;
use crate::asm::Context;
use crate::stack::TaskStack;

/// The function signature for our task entry functions.
///
/// Entries take no arguments; anything a task needs to share it reaches
/// through statics or through objects with interior mutability, which is
/// sound here because all tasks run interleaved on one host thread. An
/// entry may return: what happens next is governed by [`OnReturn`].
pub type EntryFn = fn();

/// What to do when a task's entry function returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OnReturn {
    /// Run the entry again at the task's next dispatch.
    ///
    /// This is the default: each task entry is a "main loop" and returning
    /// from it simply schedules another lap.
    #[default]
    Restart,
    /// Remove the task from the scheduler.
    Halt,
}

/// Everything a task can be observed doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Not yet attached to a scheduler
    #[default]
    None,
    /// Attached; the entry function will be (re-)entered at next dispatch
    Starting,
    /// Selected for dispatch, between the scheduler's stack and its own
    CtxSwitch,
    /// Suspended until its deadline
    Sleep,
    /// A wait deadline expired; observed transiently by the waiter
    Timeout,
    /// Finished; will be detached by the scheduler
    Halted,
    /// Excluded from scheduling until further notice
    Paused,
    /// Parked on a lock rendezvous
    Locked,
    /// Currently executing user code
    Running,
    /// Runnable as soon as possible
    Now,
    /// Parked on a user-channel rendezvous
    Wait,
    /// Parked waiting for a user-channel waiter to arrive
    SyncWait,
    /// Parked waiting for a kernel- or lock-channel waiter to arrive
    SyncSysWait,
    /// Parked on a kernel-channel rendezvous
    SysWait,
}

impl Status {
    /// A short fixed name, suitable for any log backend
    pub fn name(self) -> &'static str {
        match self {
            Status::None => "none",
            Status::Starting => "starting",
            Status::CtxSwitch => "ctxswitch",
            Status::Sleep => "sleep",
            Status::Timeout => "timeout",
            Status::Halted => "halted",
            Status::Paused => "paused",
            Status::Locked => "locked",
            Status::Running => "running",
            Status::Now => "now",
            Status::Wait => "wait",
            Status::SyncWait => "syncwait",
            Status::SyncSysWait => "syncsyswait",
            Status::SysWait => "syswait",
        }
    }

    /// Is this one of the parked-on-a-rendezvous statuses?
    ///
    /// A task dispatched while still in one of these was not woken by a
    /// notify, so its wait has timed out.
    pub(crate) fn is_wait(self) -> bool {
        matches!(
            self,
            Status::Wait
                | Status::SyncWait
                | Status::SysWait
                | Status::SyncSysWait
                | Status::Locked
        )
    }

    /// Statuses the scheduler must never select
    pub(crate) fn is_unschedulable(self) -> bool {
        matches!(self, Status::Halted | Status::Paused)
    }
}

/// How many parked tasks a notify may wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notify {
    /// Wake the first match only
    One,
    /// Wake every match
    All,
}

/// Which family of rendezvous an endpoint belongs to.
///
/// Lock and kernel rendezvous park under different statuses than user
/// ones, so a user-level notify can never wake (or be woken by) the
/// scheduler's own machinery even on a colliding endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Kernel,
    Mutex,
    User,
}

impl Channel {
    /// The status a waiter on this channel parks under
    pub(crate) fn wait_status(self) -> Status {
        match self {
            Channel::User => Status::Wait,
            Channel::Kernel => Status::SysWait,
            Channel::Mutex => Status::Locked,
        }
    }

    /// The status a notifier waiting for a waiter parks under
    pub(crate) fn sync_status(self) -> Status {
        match self {
            Channel::User => Status::SyncWait,
            Channel::Kernel | Channel::Mutex => Status::SyncSysWait,
        }
    }
}

/// A rendezvous message: a type tag chosen by the application plus one
/// word of payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Message {
    pub(crate) kind: usize,
    pub(crate) payload: usize,
}

/// Identifies a task within its [`Scheduler`](crate::Scheduler)
///
/// Ids are small arena indices and may be reused after a task is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub(crate) usize);

impl core::fmt::Display for TaskId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Represents a task the scheduler is managing
///
/// Build one with [`Task::new`] plus the builder methods, then hand it to
/// [`Scheduler::spawn`](crate::Scheduler::spawn). Once spawned the
/// scheduler owns it; observe it through
/// [`Scheduler::info`](crate::Scheduler::info).
pub struct Task {
    /// Fixed human-readable name, used in logs and diagnostics
    pub(crate) name: &'static str,
    /// The function to call when the task is (re-)started
    pub(crate) entry: EntryFn,
    pub(crate) status: Status,
    /// Higher wins a deadline tie
    pub(crate) priority: u8,
    /// Default suspension length when the task yields without a duration
    pub(crate) nice: Tick,
    /// Absolute tick at which the scheduler next considers this task
    pub(crate) next_event: Tick,
    /// `next_event - now` measured at dispatch; negative means late
    pub(crate) late: i64,
    /// Parked with no deadline; excluded from deadline selection
    pub(crate) no_timeout: bool,
    pub(crate) on_return: OnReturn,
    /// Saved machine context, valid once `started`
    pub(crate) ctx: Context,
    /// Has the context ever been entered?
    pub(crate) started: bool,
    /// Requested stack capacity in bytes; allocated at spawn
    pub(crate) stack_capacity: usize,
    pub(crate) stack: Option<TaskStack>,
    /// Bytes of stack live at the last suspension
    pub(crate) stack_used: usize,
    /// Stack pointer recorded at the last suspension
    pub(crate) end_stack: usize,
    /// Rendezvous record: endpoint address (0 = none), channel, message
    pub(crate) wait_endpoint: usize,
    pub(crate) wait_channel: Channel,
    pub(crate) message: Message,
    /// Registry links
    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
}

impl Task {
    /// Create a task description with default settings
    ///
    /// Defaults: [`DEFAULT_STACK_SIZE`](crate::DEFAULT_STACK_SIZE) bytes
    /// of stack, `nice` of 0 (a plain yield suspends to the current
    /// tick), priority 0 and [`OnReturn::Restart`].
    pub fn new(name: &'static str, entry: EntryFn) -> Task {
        Task {
            name,
            entry,
            status: Status::None,
            priority: 0,
            nice: 0,
            next_event: 0,
            late: 0,
            no_timeout: false,
            on_return: OnReturn::Restart,
            ctx: Context::new(),
            started: false,
            stack_capacity: crate::stack::DEFAULT_STACK_SIZE,
            stack: None,
            stack_used: 0,
            end_stack: 0,
            wait_endpoint: 0,
            wait_channel: Channel::Kernel,
            message: Message::default(),
            prev: None,
            next: None,
        }
    }

    /// Set the stack capacity in bytes
    ///
    /// Rounded up to [`MIN_STACK_SIZE`](crate::MIN_STACK_SIZE) and to a
    /// multiple of 16 when the stack is allocated.
    pub fn stack_size(mut self, bytes: usize) -> Task {
        self.stack_capacity = bytes;
        self
    }

    /// Set the default suspension length for a plain yield
    pub fn nice(mut self, interval: Tick) -> Task {
        self.nice = interval;
        self
    }

    /// Set the priority used to break deadline ties (higher wins)
    pub fn priority(mut self, priority: u8) -> Task {
        self.priority = priority;
        self
    }

    /// Choose what happens when the entry function returns
    pub fn on_return(mut self, policy: OnReturn) -> Task {
        self.on_return = policy;
        self
    }
}

/// A point-in-time snapshot of one task's observable state
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub name: &'static str,
    pub status: Status,
    pub priority: u8,
    pub nice: Tick,
    pub next_event: Tick,
    /// `next_event - now` at the last dispatch; negative means late
    pub late: i64,
    /// Bytes of stack live at the last suspension
    pub stack_used: usize,
    pub stack_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop() {}

    #[test]
    fn builder_defaults() {
        let t = Task::new("idle", nop);
        assert_eq!(t.name, "idle");
        assert_eq!(t.priority, 0);
        assert_eq!(t.nice, 0);
        assert_eq!(t.on_return, OnReturn::Restart);
        assert_eq!(t.status, Status::None);
        assert!(t.stack.is_none());
    }

    #[test]
    fn builder_overrides() {
        let t = Task::new("worker", nop)
            .nice(250)
            .priority(7)
            .stack_size(32 * 1024)
            .on_return(OnReturn::Halt);
        assert_eq!(t.nice, 250);
        assert_eq!(t.priority, 7);
        assert_eq!(t.stack_capacity, 32 * 1024);
        assert_eq!(t.on_return, OnReturn::Halt);
    }

    #[test]
    fn wait_statuses_classify() {
        for st in [
            Status::Wait,
            Status::SyncWait,
            Status::SysWait,
            Status::SyncSysWait,
            Status::Locked,
        ] {
            assert!(st.is_wait(), "{}", st.name());
        }
        for st in [Status::Sleep, Status::Now, Status::Running, Status::Starting] {
            assert!(!st.is_wait(), "{}", st.name());
        }
    }
}

// End of File
