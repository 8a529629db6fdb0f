#![forbid(unsafe_code)]

//! Roots: the public entry point of the reconciler.
//!
//! A [`Root`] owns one host container, its fiber store and its host nodes.
//! Rendering is always asynchronous with respect to [`Root::render`]: the
//! element is queued and the root asks its scheduler for a callback. Drive
//! the root with [`Root::perform_work`], the `flush_*` helpers, or a
//! [`ManualScheduler`](crate::ManualScheduler).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use frx_core::{
    Arena, CapturedError, DependencyId, Lane, Lanes, RootLanes, UpdateAction, UpdateTrigger,
};

use crate::commit::PendingPassive;
use crate::config::ReconcilerConfig;
use crate::effects::CommitSummary;
use crate::element::Element;
use crate::error::ReconcileError;
use crate::fiber::{Fiber, FiberId, FiberStore};
use crate::host::HostConfig;
use crate::mailbox::{MailItem, RootShared};
use crate::scheduler::{RootId, ScheduledRoot, TaskId, TaskScheduler, WorkBudget, WorkStatus};
use crate::trace::ReconcileTrace;
use crate::work_loop::RenderPass;

/// Callback for errors no boundary caught.
pub type UncaughtErrorHandler = Box<dyn FnMut(&CapturedError)>;

/// Options for [`create_root`].
#[derive(Default)]
pub struct RootOptions {
    pub config: ReconcilerConfig,
    /// Called after the tree was unmounted because of an uncaught error.
    pub on_uncaught_error: Option<UncaughtErrorHandler>,
}

impl RootOptions {
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn on_uncaught_error(mut self, handler: impl FnMut(&CapturedError) + 'static) -> Self {
        self.on_uncaught_error = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for RootOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootOptions")
            .field("config", &self.config)
            .field("on_uncaught_error", &self.on_uncaught_error.is_some())
            .finish()
    }
}

/// Where a root is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootPhase {
    #[default]
    Idle,
    /// A pass is in progress (possibly yielded).
    Rendering,
    /// Waiting for a dependency or for the fallback timeout.
    Suspended,
    /// A pass finished and is about to commit.
    Completed,
    Committing,
}

/// Counters kept per root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootStats {
    /// Passes started.
    pub render_passes: u64,
    pub commits: u64,
    /// Passes discarded for a more urgent lane.
    pub interruptions: u64,
    /// Slices that ended by yielding.
    pub yields: u64,
    /// Components that suspended.
    pub suspensions: u64,
    /// Suspense boundaries scheduled for retry.
    pub retries: u64,
    /// Passes thrown away for any reason.
    pub discarded_passes: u64,
    pub passive_flushes: u64,
}

/// A finished pass held back so a transition does not replace visible
/// content with a fallback too early.
pub(crate) struct ParkedPass {
    pub pass: RenderPass,
    pub deadline: Instant,
}

/// A reconciler root bound to one host container.
pub struct Root<H: HostConfig> {
    pub(crate) id: RootId,
    pub(crate) host: H,
    pub(crate) container: H::Container,
    pub(crate) config: ReconcilerConfig,
    pub(crate) on_uncaught_error: Option<UncaughtErrorHandler>,
    pub(crate) shared: Rc<RootShared>,
    pub(crate) store: FiberStore,
    /// Committed host root fiber.
    pub(crate) current: FiberId,
    pub(crate) nodes: Arena<H::Node>,
    pub(crate) lanes: RootLanes,
    pub(crate) phase: RootPhase,
    pub(crate) pass: Option<RenderPass>,
    pub(crate) parked: Option<ParkedPass>,
    pub(crate) pending_passive: Option<PendingPassive>,
    /// Lanes to ping when a dependency settles.
    pub(crate) ping_cache: HashMap<DependencyId, Lanes>,
    /// Suspense boundaries to retry when a dependency settles.
    pub(crate) retry_cache: HashMap<DependencyId, Vec<(FiberId, Lane)>>,
    pub(crate) uncaught: Option<CapturedError>,
    pub(crate) commits: VecDeque<CommitSummary>,
    pub(crate) commit_seq: u64,
    pub(crate) stats: RootStats,
    pub(crate) nested_sync_commits: u32,
    pub(crate) handling_fatal: bool,
    pub(crate) unmounted: bool,
    pub(crate) poisoned: bool,
}

/// Create a root rendering into `container`.
pub fn create_root<H: HostConfig>(
    host: H,
    container: H::Container,
    scheduler: Rc<dyn TaskScheduler>,
    options: RootOptions,
) -> Root<H> {
    let id = RootId::next();
    let shared = Rc::new(RootShared::new(id, scheduler, options.config.trace.clone()));
    let mut store = FiberStore::new();
    let current = store.insert(Fiber::root());
    tracing::debug!(root = %id, "root created");
    Root {
        id,
        host,
        container,
        config: options.config,
        on_uncaught_error: options.on_uncaught_error,
        shared,
        store,
        current,
        nodes: Arena::new(),
        lanes: RootLanes::new(),
        phase: RootPhase::Idle,
        pass: None,
        parked: None,
        pending_passive: None,
        ping_cache: HashMap::new(),
        retry_cache: HashMap::new(),
        uncaught: None,
        commits: VecDeque::new(),
        commit_seq: 0,
        stats: RootStats::default(),
        nested_sync_commits: 0,
        handling_fatal: false,
        unmounted: false,
        poisoned: false,
    }
}

impl<H: HostConfig> Root<H> {
    pub fn id(&self) -> RootId {
        self.id
    }

    /// Queue `element` as the new tree on the default lane.
    pub fn render(&mut self, element: impl Into<Element>) {
        self.render_with(UpdateTrigger::Default, element);
    }

    /// Queue `element` on the lane of `trigger`.
    pub fn render_with(&mut self, trigger: UpdateTrigger, element: impl Into<Element>) {
        self.enqueue_root_update(Some(trigger), Some(element.into()));
    }

    fn enqueue_root_update(&mut self, trigger: Option<UpdateTrigger>, element: Option<Element>) {
        if self.unmounted {
            tracing::warn!(root = %self.id, "render on an unmounted root ignored");
            return;
        }
        let lane = self.shared.request_lane(trigger);
        self.shared
            .root_queue
            .borrow_mut()
            .push(lane, UpdateAction::Replace(element));
        self.shared.enqueue(MailItem::Update {
            fiber: self.current,
            lane,
        });
    }

    /// Unmount the tree synchronously, running every cleanup.
    pub fn unmount(&mut self) -> Result<(), ReconcileError> {
        if self.unmounted {
            return Ok(());
        }
        self.enqueue_root_update(Some(UpdateTrigger::Discrete), None);
        self.flush_sync()?;
        self.flush_passive_effects()?;
        self.unmounted = true;
        self.shared.cancel_callback();
        tracing::debug!(root = %self.id, "root unmounted");
        Ok(())
    }

    /// Do one slice of work within `budget`.
    pub fn perform_work(&mut self, budget: WorkBudget) -> Result<WorkStatus, ReconcileError> {
        self.work(budget, true)
    }

    /// Render and commit pending synchronous and expired lanes.
    pub fn flush_sync(&mut self) -> Result<WorkStatus, ReconcileError> {
        self.ensure_usable()?;
        self.flush_passive_effects()?;
        self.drain_mailbox();
        let mut status = WorkStatus::Idle;
        while self.lanes.should_render_sync(self.lanes.pending) {
            status = self.work(WorkBudget::Unbounded, false)?;
            if status != WorkStatus::Committed {
                break;
            }
        }
        Ok(status)
    }

    /// Work without yielding until nothing is left but suspended lanes.
    pub fn flush_all(&mut self) -> Result<WorkStatus, ReconcileError> {
        loop {
            let status = self.work(WorkBudget::Unbounded, false)?;
            match status {
                WorkStatus::Idle => return Ok(status),
                WorkStatus::Suspended if !self.has_runnable_work() => return Ok(status),
                _ => {}
            }
        }
    }

    /// Throw away the in-progress pass, if any. Nothing it did is kept.
    pub fn abandon_work(&mut self) {
        self.discard_pass(Lanes::empty());
        self.ensure_root_scheduled();
    }

    pub fn phase(&self) -> RootPhase {
        self.phase
    }

    /// Summary of the most recent commit.
    pub fn last_commit(&self) -> Option<&CommitSummary> {
        self.commits.back()
    }

    /// Recent commits, oldest first.
    pub fn commits(&self) -> impl Iterator<Item = &CommitSummary> {
        self.commits.iter()
    }

    pub fn stats(&self) -> RootStats {
        self.stats
    }

    /// The reconciliation trace. Do not hold the guard across calls that do
    /// work on this root; events recorded meanwhile are dropped.
    pub fn trace(&self) -> std::cell::Ref<'_, ReconcileTrace> {
        self.shared.trace()
    }

    pub fn clear_trace(&self) {
        self.shared.clear_trace();
    }

    /// Lanes with pending work.
    pub fn pending_lanes(&self) -> Lanes {
        self.lanes.pending
    }

    /// Unsettled dependencies this root still listens to, for pings or
    /// boundary retries.
    pub fn waiting_dependencies(&self) -> usize {
        let retries = self
            .retry_cache
            .keys()
            .filter(|id| !self.ping_cache.contains_key(id))
            .count();
        self.ping_cache.len() + retries
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn container(&self) -> &H::Container {
        &self.container
    }

    /// Live fibers, both buffers included.
    pub fn fiber_count(&self) -> usize {
        self.store.len()
    }

    pub fn is_unmounted(&self) -> bool {
        self.unmounted
    }

    pub(crate) fn ensure_usable(&self) -> Result<(), ReconcileError> {
        if self.unmounted || self.poisoned {
            Err(ReconcileError::RootUnmounted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn has_runnable_work(&self) -> bool {
        let wip = self.pass.as_ref().map_or(Lanes::empty(), |p| p.lanes);
        !self.lanes.next_lanes(wip).is_empty()
    }
}

impl<H: HostConfig> ScheduledRoot for Root<H> {
    fn root_id(&self) -> RootId {
        self.id
    }

    fn run_task(&mut self, task: TaskId) -> Result<WorkStatus, ReconcileError> {
        self.shared.callback_started(task);
        if self.unmounted {
            return Ok(WorkStatus::Idle);
        }
        self.work(WorkBudget::Unbounded, true)
    }
}

impl<H: HostConfig> fmt::Debug for Root<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("pending", &self.lanes.pending)
            .field("fibers", &self.store.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
