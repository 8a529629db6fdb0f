#![forbid(unsafe_code)]

//! Scheduler bridge.
//!
//! Roots never run on their own: they ask a [`TaskScheduler`] for a callback
//! and do a slice of work when it fires. [`ManualScheduler`] is a
//! deterministic implementation with a virtual clock, used by tests and by
//! hosts that drive frames themselves.
//!
//! # Ordering
//!
//! Ready tasks run in priority order, then in the order they were
//! scheduled. A task is ready once the virtual clock reaches its due time.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use frx_core::SchedulerPriority;

use crate::error::ReconcileError;

static NEXT_ROOT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RootId(u64);

impl RootId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ROOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

/// Handle of a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Host-side task scheduling.
pub trait TaskScheduler {
    /// Scheduler time. All deadlines and expirations use this clock.
    fn now(&self) -> Instant;

    /// Run `root` at `priority` once `delay` has elapsed.
    fn schedule_callback(&self, priority: SchedulerPriority, root: RootId, delay: Duration)
    -> TaskId;

    fn cancel_callback(&self, task: TaskId);

    /// Polled between work units of a concurrent pass.
    fn should_yield(&self) -> bool;
}

/// How much a single slice of work may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkBudget {
    /// Run until the pass finishes (or the scheduler asks to yield).
    #[default]
    Unbounded,
    /// At most this many work units.
    Units(u32),
    /// Stop once scheduler time reaches the deadline.
    Until(Instant),
}

/// Outcome of a slice of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Nothing to do.
    Idle,
    /// A pass is in progress and will continue on the next callback.
    Yielded,
    /// A pass committed.
    Committed,
    /// The root is waiting on a dependency or a fallback timeout.
    Suspended,
}

/// Something a scheduler can run.
pub trait ScheduledRoot {
    fn root_id(&self) -> RootId;

    /// Called when the callback `task` of this root fires.
    fn run_task(&mut self, task: TaskId) -> Result<WorkStatus, ReconcileError>;
}

#[derive(Debug, Clone, Copy)]
struct Task {
    id: TaskId,
    priority: SchedulerPriority,
    root: RootId,
    due: Instant,
}

#[derive(Debug)]
struct ManualState {
    now: Instant,
    next_task: u64,
    tasks: Vec<Task>,
    yield_after: Option<u32>,
    polls: u32,
    ran: u64,
}

/// A deterministic scheduler with a virtual clock.
#[derive(Debug)]
pub struct ManualScheduler {
    state: RefCell<ManualState>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Clock starts at the current instant and only moves on [`advance`].
    ///
    /// [`advance`]: Self::advance
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            state: RefCell::new(ManualState {
                now,
                next_task: 1,
                tasks: Vec::new(),
                yield_after: None,
                polls: 0,
                ran: 0,
            }),
        }
    }

    /// Ask concurrent passes to yield after every `polls` work units.
    #[must_use]
    pub fn with_yield_after(self, polls: u32) -> Self {
        self.set_yield_after(Some(polls));
        self
    }

    pub fn set_yield_after(&self, polls: Option<u32>) {
        let mut state = self.state.borrow_mut();
        state.yield_after = polls.filter(|n| *n > 0);
        state.polls = 0;
    }

    pub fn advance(&self, by: Duration) {
        self.state.borrow_mut().now += by;
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    /// Number of tasks dispatched by [`run_until_idle`](Self::run_until_idle).
    pub fn tasks_run(&self) -> u64 {
        self.state.borrow().ran
    }

    /// Due time of the earliest scheduled task.
    pub fn next_due(&self) -> Option<Instant> {
        self.state.borrow().tasks.iter().map(|t| t.due).min()
    }

    /// Priority of the task that would run next, if one is ready.
    pub fn peek_ready(&self) -> Option<SchedulerPriority> {
        let state = self.state.borrow();
        Self::ready_index(&state).map(|i| state.tasks[i].priority)
    }

    fn ready_index(state: &ManualState) -> Option<usize> {
        state
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= state.now)
            .min_by_key(|(_, t)| (t.priority, t.id))
            .map(|(i, _)| i)
    }

    fn pop_ready(&self) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        let index = Self::ready_index(&state)?;
        state.polls = 0;
        Some(state.tasks.remove(index))
    }

    /// Run ready tasks until none is left, dispatching each to its root.
    ///
    /// Tasks for roots not in `roots` are dropped. Returns the number of
    /// tasks run.
    pub fn run_until_idle(
        &self,
        roots: &mut [&mut dyn ScheduledRoot],
    ) -> Result<usize, ReconcileError> {
        let mut ran = 0;
        while let Some(task) = self.pop_ready() {
            let Some(root) = roots.iter_mut().find(|r| r.root_id() == task.root) else {
                tracing::debug!(root = %task.root, "dropping task for unknown root");
                continue;
            };
            tracing::trace!(task = task.id.0, root = %task.root, priority = %task.priority, "run task");
            ran += 1;
            self.state.borrow_mut().ran += 1;
            root.run_task(task.id)?;
        }
        Ok(ran)
    }
}

impl TaskScheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.state.borrow().now
    }

    fn schedule_callback(
        &self,
        priority: SchedulerPriority,
        root: RootId,
        delay: Duration,
    ) -> TaskId {
        let mut state = self.state.borrow_mut();
        let id = TaskId(state.next_task);
        state.next_task += 1;
        let due = state.now + delay;
        state.tasks.push(Task {
            id,
            priority,
            root,
            due,
        });
        id
    }

    fn cancel_callback(&self, task: TaskId) {
        self.state.borrow_mut().tasks.retain(|t| t.id != task);
    }

    fn should_yield(&self) -> bool {
        let mut state = self.state.borrow_mut();
        match state.yield_after {
            Some(limit) => {
                state.polls += 1;
                if state.polls >= limit {
                    state.polls = 0;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        id: RootId,
        log: Vec<TaskId>,
    }

    impl ScheduledRoot for Recorder {
        fn root_id(&self) -> RootId {
            self.id
        }

        fn run_task(&mut self, task: TaskId) -> Result<WorkStatus, ReconcileError> {
            self.log.push(task);
            Ok(WorkStatus::Idle)
        }
    }

    #[test]
    fn priority_then_fifo() {
        let scheduler = ManualScheduler::new();
        let id = RootId::next();
        let low = scheduler.schedule_callback(SchedulerPriority::Low, id, Duration::ZERO);
        let a = scheduler.schedule_callback(SchedulerPriority::Normal, id, Duration::ZERO);
        let b = scheduler.schedule_callback(SchedulerPriority::Normal, id, Duration::ZERO);
        let urgent = scheduler.schedule_callback(SchedulerPriority::Immediate, id, Duration::ZERO);

        let mut root = Recorder { id, log: Vec::new() };
        let ran = scheduler.run_until_idle(&mut [&mut root]).unwrap();
        assert_eq!(ran, 4);
        assert_eq!(root.log, vec![urgent, a, b, low]);
    }

    #[test]
    fn delayed_tasks_wait_for_clock() {
        let scheduler = ManualScheduler::new();
        let id = RootId::next();
        scheduler.schedule_callback(SchedulerPriority::Normal, id, Duration::from_millis(10));
        let mut root = Recorder { id, log: Vec::new() };
        assert_eq!(scheduler.run_until_idle(&mut [&mut root]).unwrap(), 0);
        scheduler.advance(Duration::from_millis(10));
        assert_eq!(scheduler.run_until_idle(&mut [&mut root]).unwrap(), 1);
    }

    #[test]
    fn cancel_and_yield() {
        let scheduler = ManualScheduler::new().with_yield_after(2);
        let task = scheduler.schedule_callback(SchedulerPriority::Normal, RootId::next(), Duration::ZERO);
        scheduler.cancel_callback(task);
        assert_eq!(scheduler.pending_tasks(), 0);
        assert!(!scheduler.should_yield());
        assert!(scheduler.should_yield());
        assert!(!scheduler.should_yield());
    }
}
