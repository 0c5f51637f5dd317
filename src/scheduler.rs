//! Contains the [`Scheduler`] type

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use alloc::boxed::Box;

use crate::asm::{self, Context};
use crate::clock::Clock;
use crate::registry::Registry;
use crate::stack::TaskStack;
use crate::task::{Channel, Message, Notify, OnReturn, Status, Task, TaskId, TaskInfo};
use crate::{Error, Tick};

/// The location of the scheduler currently inside [`Scheduler::join`].
///
/// We need this so that the free functions in the crate root (and the
/// task trampoline, which enters on a brand new stack) can find the
/// system state. On hosted targets the slot is per host thread, so
/// independent schedulers on different threads stay independent.
#[cfg(feature = "std")]
mod active {
    use super::Scheduler;
    use core::cell::Cell;
    use core::ptr;

    std::thread_local! {
        static ACTIVE: Cell<*mut Scheduler> = const { Cell::new(ptr::null_mut()) };
    }

    pub(super) fn set(scheduler: *mut Scheduler) {
        ACTIVE.with(|slot| slot.set(scheduler));
    }

    pub(super) fn get() -> *mut Scheduler {
        ACTIVE.with(|slot| slot.get())
    }
}

#[cfg(not(feature = "std"))]
mod active {
    use super::Scheduler;
    use core::sync::atomic::{AtomicPtr, Ordering};

    static ACTIVE: AtomicPtr<Scheduler> = AtomicPtr::new(core::ptr::null_mut());

    pub(super) fn set(scheduler: *mut Scheduler) {
        ACTIVE.store(scheduler, Ordering::Release);
    }

    pub(super) fn get() -> *mut Scheduler {
        ACTIVE.load(Ordering::Acquire)
    }
}

/// Run `f` against the scheduler currently inside `join`, if any.
///
/// This is how code running on a task stack reaches back into the
/// system.
pub(crate) fn with_active<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    let scheduler = active::get();
    if scheduler.is_null() {
        None
    } else {
        // SAFETY: only `join` installs the pointer and it points at a
        // live Scheduler for the whole of `join`. The cooperative model
        // means exactly one logical execution is running at any moment,
        // so nothing else is touching the Scheduler right now.
        Some(f(unsafe { &mut *scheduler }))
    }
}

/// A cooperative, deadline-driven task scheduler
///
/// Tasks are [spawned](Scheduler::spawn) into the scheduler's registry
/// and then [`join`](Scheduler::join) runs them until none remain. Each
/// dispatch picks the attached task with the earliest deadline (priority
/// breaks ties) and resumes it on its own stack; the task runs until it
/// suspends itself through one of the crate's yielding calls.
///
/// When the earliest deadline is still in the future the host
/// [`Clock`] is asked to sleep, so an idle system consumes no cycles
/// beyond what the clock's sleep costs.
pub struct Scheduler {
    registry: Registry,
    /// The task last dispatched; anchors the cyclic selection walk
    current: Option<TaskId>,
    /// Where `join`'s dispatch loop parks while a task runs
    join_ctx: Context,
    clock: Box<dyn Clock>,
    /// A panic carried off a task stack, re-raised from `join`
    #[cfg(feature = "std")]
    panic: Option<Box<dyn core::any::Any + Send>>,
}

impl Scheduler {
    /// Build a scheduler running against the given clock
    pub fn new(clock: impl Clock + 'static) -> Scheduler {
        Scheduler {
            registry: Registry::new(),
            current: None,
            join_ctx: Context::new(),
            clock: Box::new(clock),
            #[cfg(feature = "std")]
            panic: None,
        }
    }

    /// Attach a task, allocating its stack
    ///
    /// The task will be considered at the next dispatch once
    /// [`join`](Scheduler::join) runs; fresh tasks have a deadline of
    /// tick zero so they run before anything that is merely sleeping.
    pub fn spawn(&mut self, mut task: Task) -> TaskId {
        let stack = TaskStack::new(task.stack_capacity);
        task.stack_capacity = stack.capacity();
        task.stack = Some(stack);
        task.status = Status::Starting;
        task.next_event = 0;
        let id = self.registry.attach(task);
        sched_debug!(
            "spawned {} as {} with {} bytes of stack",
            self.registry.get(id).name,
            id.0,
            self.registry.get(id).stack_capacity
        );
        id
    }

    /// Detach a task before `join` runs
    ///
    /// Returns false if the id is not attached.
    pub fn remove(&mut self, id: TaskId) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        let task = self.registry.detach(id);
        sched_debug!("removed {}", task.name);
        if self.current == Some(id) {
            self.current = None;
        }
        true
    }

    /// Number of attached tasks
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Snapshot one task's observable state
    pub fn info(&self, id: TaskId) -> Option<TaskInfo> {
        if !self.registry.contains(id) {
            return None;
        }
        let task = self.registry.get(id);
        Some(TaskInfo {
            name: task.name,
            status: task.status,
            priority: task.priority,
            nice: task.nice,
            next_event: task.next_event,
            late: task.late,
            stack_used: task.stack_used,
            stack_capacity: task.stack_capacity,
        })
    }

    /// Run the attached tasks until none remain
    ///
    /// Returns `false` once the registry is empty — immediately, without
    /// consulting the clock, if it was empty to begin with. Also returns
    /// `false` (with an error logged) if every remaining task is parked
    /// without a deadline and nothing can ever wake one, since the system
    /// would otherwise sleep forever.
    ///
    /// # Panics
    ///
    /// Panics if a scheduler is already running on this host thread, or
    /// to propagate a panic that escaped a task entry.
    pub fn join(&mut self) -> bool {
        if self.registry.is_empty() {
            return false;
        }
        if !active::get().is_null() {
            panic!("Tried to start a scheduler inside a running scheduler!");
        }
        active::set(self as *mut Scheduler);
        self.current = self.registry.tail();

        while !self.registry.is_empty() {
            if !self.run_once() {
                sched_error!("nothing schedulable: every task is parked without a deadline");
                break;
            }
            #[cfg(feature = "std")]
            if let Some(payload) = self.panic.take() {
                active::set(core::ptr::null_mut());
                self.current = None;
                std::panic::resume_unwind(payload);
            }
        }

        active::set(core::ptr::null_mut());
        self.current = None;
        false
    }

    /// One dispatch cycle: select, sleep to the deadline, run.
    ///
    /// Returns false if no task was eligible for selection.
    fn run_once(&mut self) -> bool {
        let Some(chosen) = self.select() else {
            return false;
        };

        let next_event = self.registry.get(chosen).next_event;
        let now = self.clock.now();
        if next_event > now {
            sched_debug!(
                "host sleep for {} ticks until {} is due",
                next_event - now,
                self.registry.get(chosen).name
            );
            self.clock.sleep(next_event - now);
        }

        let now = self.clock.now();
        {
            let task = self.registry.get_mut(chosen);
            task.late = next_event as i64 - now as i64;
            task.no_timeout = false;
            // A task still parked on a rendezvous at its deadline was
            // never notified: it resumes into a timeout
            task.status = if task.status.is_wait() {
                Status::Timeout
            } else {
                Status::CtxSwitch
            };
            sched_trace!(
                "dispatch {} [{}] late {}",
                task.name,
                task.status.name(),
                task.late
            );
        }

        self.current = Some(chosen);
        // SAFETY: `chosen` is attached, its stack allocation is live and
        // no other execution is using its context
        unsafe { self.switch_into(chosen) };

        // Back on the scheduler stack; retire the task if it finished
        if self.registry.contains(chosen) && self.registry.get(chosen).status == Status::Halted {
            let task = self.registry.detach(chosen);
            sched_debug!("retired {}", task.name);
            self.current = None;
        }
        true
    }

    /// Pick the task to dispatch next.
    ///
    /// Walks one full cyclic round starting after the incumbent
    /// (`current`, or the tail before the first dispatch) and keeps the
    /// earliest deadline, with higher priority winning ties and the
    /// incumbent keeping a full tie. Tasks parked without a deadline,
    /// halted or paused are skipped.
    fn select(&self) -> Option<TaskId> {
        let anchor = self.current.or_else(|| self.registry.tail())?;
        let eligible =
            |task: &Task| !task.no_timeout && !task.status.is_unschedulable();

        let mut best = Some(anchor).filter(|&id| eligible(self.registry.get(id)));
        let mut cursor = anchor;
        for _ in 0..self.registry.len() {
            cursor = self.registry.cyclic_next(cursor).expect("non-empty registry");
            if cursor == anchor {
                continue;
            }
            let candidate = self.registry.get(cursor);
            sched_trace!(
                "consider {} [{}] due {}",
                candidate.name,
                candidate.status.name(),
                candidate.next_event
            );
            if !eligible(candidate) {
                continue;
            }
            best = match best {
                None => Some(cursor),
                Some(incumbent) => {
                    let holder = self.registry.get(incumbent);
                    let wins = candidate.next_event < holder.next_event
                        || (candidate.next_event == holder.next_event
                            && candidate.priority > holder.priority);
                    if wins { Some(cursor) } else { Some(incumbent) }
                }
            };
        }
        best
    }

    /// Enter a task: build its first context if it has never run, then
    /// switch to it. Returns when the task next switches back.
    ///
    /// # Safety
    ///
    /// `id` must be attached with a live stack, and the task's context
    /// must not be executing anywhere else.
    unsafe fn switch_into(&mut self, id: TaskId) {
        let task = self.registry.get_mut(id);
        if !task.started {
            let top = task.stack.as_ref().expect("spawned task without a stack").top();
            // SAFETY: the stack is a live allocation with room below its top
            task.ctx = unsafe { Context::fresh(top, task_trampoline) };
            task.started = true;
        }
        let task_ctx: *const Context = &task.ctx;
        let join_ctx: *mut Context = &mut self.join_ctx;
        // SAFETY: per this function's contract; the save slot is the
        // dispatch loop's own context
        unsafe { asm::switch(join_ctx, task_ctx) };
    }

    /// Switch from the current task back to the dispatch loop.
    ///
    /// Returns when the scheduler next dispatches this task.
    pub(crate) fn back_to_join(&mut self) {
        let id = self.current.expect("no current task");
        let task_ctx: *mut Context = &mut self.registry.get_mut(id).ctx;
        let join_ctx: *const Context = &self.join_ctx;
        // SAFETY: join_ctx was saved by `switch_into` on this scheduler's
        // own live stack; our context slot is ours to save into
        unsafe { asm::switch(task_ctx, join_ctx) };
    }

    /// The one suspension primitive.
    ///
    /// Records the stack high-water mark, computes the task's next
    /// deadline (`duration` of zero means the task's nice interval;
    /// status [`Status::Now`] means immediately), parks the task under
    /// `status` and switches away. The return value is the status the
    /// scheduler left on the task at re-dispatch — [`Status::Timeout`]
    /// when a rendezvous deadline expired, otherwise the plain
    /// context-switch marker. The task is `Running` again by the time
    /// this returns.
    pub(crate) fn yield_with(&mut self, duration: Tick, status: Status) -> Status {
        let Some(id) = self.current else {
            return Status::None;
        };
        self.audit_stack(id);

        let now = self.clock.now();
        let task = self.registry.get_mut(id);
        task.next_event = if status == Status::Now {
            now
        } else if duration > 0 {
            now.saturating_add(duration)
        } else {
            now.saturating_add(task.nice)
        };
        task.status = status;

        self.back_to_join();

        let task = self.registry.get_mut(id);
        let observed = task.status;
        task.status = Status::Running;
        observed
    }

    /// Block on a rendezvous until a matching notify or the timeout.
    ///
    /// A `timeout` of zero parks with no deadline at all: the task is
    /// excluded from deadline selection and only a notify can bring it
    /// back. On success the payload delivered by the notifier is
    /// returned.
    pub(crate) fn generic_wait(
        &mut self,
        channel: Channel,
        endpoint: usize,
        kind: usize,
        timeout: Tick,
    ) -> Result<usize, Error> {
        let id = self.current.ok_or(Error::NoCurrentTask)?;
        let deadline = self.deadline_after(timeout);

        // Anyone already parked waiting for a waiter to turn up gets
        // released first, then a turn to run
        self.notify_matching(channel.sync_status(), channel, endpoint, kind, 0, Notify::All);
        self.yield_with(0, Status::Now);

        let remaining = self.remaining_until(deadline);
        self.install_rendezvous(id, channel, endpoint, kind, timeout == 0);
        let observed = self.yield_with(remaining, channel.wait_status());

        let task = self.registry.get_mut(id);
        task.wait_endpoint = 0;
        if observed == Status::Timeout {
            sched_trace!("{}: wait timed out", task.name);
            Err(Error::Timeout)
        } else {
            Ok(task.message.payload)
        }
    }

    /// Deliver a message to parked waiters on a rendezvous.
    ///
    /// If nobody is parked yet and `timeout` is non-zero, parks until a
    /// waiter arrives (the waiter's side releases us), then delivers.
    /// Returns how many tasks were woken; zero means no waiter was found
    /// within the timeout. A `timeout` of zero never parks: it is a
    /// fire-and-forget poll.
    pub(crate) fn generic_notify(
        &mut self,
        channel: Channel,
        endpoint: usize,
        message: Message,
        timeout: Tick,
        how: Notify,
    ) -> usize {
        let Some(id) = self.current else {
            return 0;
        };
        let deadline = self.deadline_after(timeout);

        let notified = loop {
            let notified = self.notify_matching(
                channel.wait_status(),
                channel,
                endpoint,
                message.kind,
                message.payload,
                how,
            );
            if notified > 0 {
                break notified;
            }
            let remaining = self.remaining_until(deadline);
            if remaining == 0 {
                break 0;
            }
            // Park until a waiter arrives and releases us
            self.install_rendezvous(id, channel, endpoint, message.kind, false);
            let observed = self.yield_with(remaining, channel.sync_status());
            self.registry.get_mut(id).wait_endpoint = 0;
            if observed == Status::Timeout {
                sched_trace!("notify timed out with no waiter");
                return 0;
            }
        };

        // Let whoever we woke run straight away
        self.yield_with(0, Status::Now);
        notified
    }

    /// Wake every task parked under `parked` whose rendezvous record
    /// matches exactly (channel, endpoint and message type all equal),
    /// or just the first if `how` says one.
    fn notify_matching(
        &mut self,
        parked: Status,
        channel: Channel,
        endpoint: usize,
        kind: usize,
        payload: usize,
        how: Notify,
    ) -> usize {
        let now = self.clock.now();
        let mut notified = 0;
        let mut cursor = self.registry.head();
        while let Some(id) = cursor {
            cursor = self.registry.get(id).next;
            let task = self.registry.get_mut(id);
            if task.status == parked
                && task.wait_channel == channel
                && task.wait_endpoint == endpoint
                && task.message.kind == kind
            {
                task.message.payload = payload;
                task.status = Status::Now;
                task.next_event = now;
                // A forever-parked waiter must be selectable again
                task.no_timeout = false;
                notified += 1;
                sched_trace!("woke {} on kind {}", task.name, kind);
                if how == Notify::One {
                    break;
                }
            }
        }
        notified
    }

    fn install_rendezvous(
        &mut self,
        id: TaskId,
        channel: Channel,
        endpoint: usize,
        kind: usize,
        forever: bool,
    ) {
        let task = self.registry.get_mut(id);
        task.wait_channel = channel;
        task.wait_endpoint = endpoint;
        task.message.kind = kind;
        task.no_timeout = forever;
    }

    /// Absolute deadline for a relative timeout; zero stays "none"
    fn deadline_after(&self, timeout: Tick) -> Tick {
        if timeout == 0 {
            0
        } else {
            self.clock.now().saturating_add(timeout)
        }
    }

    /// Ticks left until an absolute deadline; zero for "none" or passed
    fn remaining_until(&self, deadline: Tick) -> Tick {
        if deadline == 0 {
            return 0;
        }
        deadline.saturating_sub(self.clock.now())
    }

    /// Record the live stack span of the suspending task and stop the
    /// show if it has burst its allocation
    fn audit_stack(&mut self, id: TaskId) {
        let sp = stack_pointer_here();
        let task = self.registry.get_mut(id);
        let (top, capacity, canary_intact) = {
            let stack = task.stack.as_ref().expect("spawned task without a stack");
            (stack.top() as usize, stack.capacity(), stack.canary_intact())
        };
        task.end_stack = sp;
        // One word of slop for the probe itself
        let used = top.saturating_sub(task.end_stack) + core::mem::size_of::<usize>();
        task.stack_used = used;
        sched_trace!("{}: stack {} of {} bytes", task.name, used, task.stack_capacity);
        if used > capacity || !canary_intact {
            sched_error!(
                "{}: stack overflow, {} of {} bytes",
                task.name,
                used,
                task.stack_capacity
            );
            panic!("stack overflow in task '{}'", task.name);
        }
    }

    /// Mark the current task running and fetch its entry function
    fn begin_current(&mut self) -> crate::task::EntryFn {
        let id = self.current.expect("no current task");
        let task = self.registry.get_mut(id);
        task.status = Status::Running;
        task.entry
    }

    /// The current task's entry returned; apply its return policy
    fn finish_current(&mut self, clean: bool) {
        let id = self.current.expect("no current task");
        let task = self.registry.get_mut(id);
        task.status = if !clean {
            Status::Halted
        } else {
            match task.on_return {
                OnReturn::Restart => Status::Starting,
                OnReturn::Halt => Status::Halted,
            }
        };
    }

    /// Record a panic that escaped the current task's entry
    #[cfg(feature = "std")]
    fn fail_current(&mut self, payload: Box<dyn core::any::Any + Send>) {
        let id = self.current.expect("no current task");
        sched_error!("{}: panicked; halting it", self.registry.get(id).name);
        self.panic = Some(payload);
    }

    pub(crate) fn clock_now(&self) -> Tick {
        self.clock.now()
    }

    pub(crate) fn current_id(&self) -> Option<TaskId> {
        self.current
    }
}

/// Every task stack starts executing here.
///
/// Runs the task's entry function in a loop so that a returning entry
/// can be restarted without rebuilding the context, applying the task's
/// [`OnReturn`] policy (and catching panics on hosted targets) between
/// laps. Parks back in the dispatch loop after each lap.
extern "C" fn task_trampoline() -> ! {
    loop {
        let entry = with_active(Scheduler::begin_current).expect("no active scheduler");

        #[cfg(feature = "std")]
        let clean = match std::panic::catch_unwind(|| entry()) {
            Ok(()) => true,
            Err(payload) => {
                with_active(|scheduler| scheduler.fail_current(payload));
                false
            }
        };

        #[cfg(not(feature = "std"))]
        let clean = {
            entry();
            true
        };

        with_active(|scheduler| scheduler.finish_current(clean));
        with_active(Scheduler::back_to_join);
        // Only a Restart policy brings us back here, ready for the next lap
    }
}

/// Approximate stack pointer: the address of a local, which is the
/// cheapest portable probe and plenty for housekeeping
#[inline(never)]
fn stack_pointer_here() -> usize {
    let marker = 0u8;
    core::hint::black_box(&raw const marker as usize)
}

// End of File
