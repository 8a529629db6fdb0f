#![forbid(unsafe_code)]

//! Root state shared with setters and dependency listeners.
//!
//! Nothing outside the work loop mutates the fiber tree. State setters,
//! root renders and dependency wake-ups only push a [`MailItem`] and ask the
//! host scheduler for a callback; the root drains the mailbox at the start of
//! every slice of work and right after each commit.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use frx_core::{
    DependencyId, Lane, LaneAllocator, Lanes, PendingUpdates, SchedulerPriority, UpdateTrigger,
    WakeListener, lane_to_priority,
};

use crate::element::Element;
use crate::fiber::FiberId;
use crate::scheduler::{RootId, TaskId, TaskScheduler};
use crate::trace::{ReconcileEvent, ReconcileTrace, TraceConfig};

/// A message for the work loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MailItem {
    /// An update was queued on `fiber` (a hook queue or the root queue).
    Update { fiber: FiberId, lane: Lane },
    /// A dependency settled.
    Wake(DependencyId),
}

/// The host callback currently requested for a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScheduledCallback {
    pub task: TaskId,
    pub priority: SchedulerPriority,
    pub due: Instant,
}

pub(crate) struct RootShared {
    pub id: RootId,
    pub scheduler: Rc<dyn TaskScheduler>,
    /// Updates to the root element.
    pub root_queue: Rc<RefCell<PendingUpdates<Option<Element>>>>,
    mailbox: RefCell<Vec<MailItem>>,
    callback: Cell<Option<ScheduledCallback>>,
    allocator: RefCell<LaneAllocator>,
    next_id: Cell<u64>,
    in_commit: Cell<bool>,
    sync_from_commit: Cell<bool>,
    trace: RefCell<ReconcileTrace>,
}

impl RootShared {
    pub(crate) fn new(id: RootId, scheduler: Rc<dyn TaskScheduler>, trace: TraceConfig) -> Self {
        let origin = scheduler.now();
        Self {
            id,
            scheduler,
            root_queue: Rc::new(RefCell::new(PendingUpdates::new())),
            mailbox: RefCell::new(Vec::new()),
            callback: Cell::new(None),
            allocator: RefCell::new(LaneAllocator::new()),
            next_id: Cell::new(0),
            in_commit: Cell::new(false),
            sync_from_commit: Cell::new(false),
            trace: RefCell::new(ReconcileTrace::new(trace, origin)),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.scheduler.now()
    }

    /// Lane for an update. Without an explicit trigger, updates scheduled
    /// from inside a commit are synchronous and everything else is default.
    pub(crate) fn request_lane(&self, trigger: Option<UpdateTrigger>) -> Lane {
        match trigger {
            Some(trigger) => self.allocator.borrow_mut().request_update_lane(trigger),
            None if self.in_commit.get() => Lanes::SYNC,
            None => Lanes::DEFAULT,
        }
    }

    pub(crate) fn claim_retry_lane(&self) -> Lane {
        self.allocator.borrow_mut().claim_next_retry_lane()
    }

    pub(crate) fn enqueue(&self, item: MailItem) {
        let priority = match &item {
            MailItem::Update { lane, .. } => {
                if self.in_commit.get() && lane.includes_sync() {
                    self.sync_from_commit.set(true);
                }
                lane_to_priority(*lane)
            }
            MailItem::Wake(_) => SchedulerPriority::Normal,
        };
        self.mailbox.borrow_mut().push(item);
        self.request_callback(priority, Duration::ZERO);
    }

    pub(crate) fn take_mail(&self) -> Vec<MailItem> {
        std::mem::take(&mut *self.mailbox.borrow_mut())
    }

    pub(crate) fn has_mail(&self) -> bool {
        !self.mailbox.borrow().is_empty()
    }

    /// Ask the scheduler to run this root.
    ///
    /// At most one callback is outstanding. A request no more urgent than
    /// the outstanding one, and due no earlier, is dropped; anything else
    /// replaces it.
    pub(crate) fn request_callback(&self, priority: SchedulerPriority, delay: Duration) {
        let due = self.scheduler.now() + delay;
        if let Some(existing) = self.callback.get() {
            if !priority.is_more_urgent_than(existing.priority) && existing.due <= due {
                return;
            }
            self.scheduler.cancel_callback(existing.task);
            self.record(ReconcileEvent::CallbackCancelled);
        }
        let task = self.scheduler.schedule_callback(priority, self.id, delay);
        self.callback.set(Some(ScheduledCallback {
            task,
            priority,
            due,
        }));
        self.record(ReconcileEvent::CallbackScheduled {
            priority,
            delay_ms: delay.as_millis() as u64,
        });
    }

    pub(crate) fn cancel_callback(&self) {
        if let Some(existing) = self.callback.take() {
            self.scheduler.cancel_callback(existing.task);
            self.record(ReconcileEvent::CallbackCancelled);
        }
    }

    /// The scheduler is running `task`; forget it if it is ours.
    pub(crate) fn callback_started(&self, task: TaskId) {
        if self.callback.get().is_some_and(|cb| cb.task == task) {
            self.callback.set(None);
        }
    }

    pub(crate) fn callback(&self) -> Option<ScheduledCallback> {
        self.callback.get()
    }

    pub(crate) fn set_in_commit(&self, in_commit: bool) {
        self.in_commit.set(in_commit);
    }

    /// True if a synchronous update was scheduled during the last commit.
    pub(crate) fn take_sync_from_commit(&self) -> bool {
        self.sync_from_commit.replace(false)
    }

    pub(crate) fn next_identifier(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub(crate) fn record(&self, event: ReconcileEvent) {
        let now = self.scheduler.now();
        // Skipped while a caller holds the trace.
        if let Ok(mut trace) = self.trace.try_borrow_mut() {
            trace.record(now, event);
        }
    }

    pub(crate) fn trace(&self) -> std::cell::Ref<'_, ReconcileTrace> {
        self.trace.borrow()
    }

    pub(crate) fn clear_trace(&self) {
        if let Ok(mut trace) = self.trace.try_borrow_mut() {
            trace.clear();
        }
    }
}

impl WakeListener for RootShared {
    fn wake(&self, dependency: DependencyId) {
        tracing::debug!(root = %self.id, %dependency, "dependency woke root");
        self.enqueue(MailItem::Wake(dependency));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    fn shared() -> (Rc<ManualScheduler>, RootShared) {
        let scheduler = Rc::new(ManualScheduler::new());
        let shared = RootShared::new(RootId::next(), scheduler.clone(), TraceConfig::default());
        (scheduler, shared)
    }

    #[test]
    fn one_callback_per_root() {
        let (scheduler, shared) = shared();
        shared.request_callback(SchedulerPriority::Normal, Duration::ZERO);
        shared.request_callback(SchedulerPriority::Low, Duration::ZERO);
        shared.request_callback(SchedulerPriority::Normal, Duration::ZERO);
        assert_eq!(scheduler.pending_tasks(), 1);

        shared.request_callback(SchedulerPriority::Immediate, Duration::ZERO);
        assert_eq!(scheduler.pending_tasks(), 1);
        assert_eq!(
            shared.callback().map(|cb| cb.priority),
            Some(SchedulerPriority::Immediate)
        );
        assert_eq!(shared.trace().count("callback_cancelled"), 1);
    }

    #[test]
    fn earlier_due_time_replaces_delayed_callback() {
        let (scheduler, shared) = shared();
        shared.request_callback(SchedulerPriority::Normal, Duration::from_millis(500));
        shared.request_callback(SchedulerPriority::Normal, Duration::ZERO);
        assert_eq!(scheduler.pending_tasks(), 1);
        assert_eq!(shared.callback().map(|cb| cb.due), Some(scheduler.now()));
    }

    #[test]
    fn commit_updates_default_to_sync() {
        let (_scheduler, shared) = shared();
        assert_eq!(shared.request_lane(None), Lanes::DEFAULT);
        shared.set_in_commit(true);
        assert_eq!(shared.request_lane(None), Lanes::SYNC);
        assert_eq!(
            shared.request_lane(Some(UpdateTrigger::Transition)),
            Lanes::TRANSITION_1
        );
    }
}
