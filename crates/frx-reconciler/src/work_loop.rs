#![forbid(unsafe_code)]

//! The work loop.
//!
//! A pass walks the work-in-progress tree depth first. `begin` renders a
//! fiber and returns its first child; once a fiber has no more children to
//! visit it is completed and the walk moves to its sibling or back up to its
//! parent. Throws unwind to the nearest boundary and resume from it.
//!
//! Between units a concurrent pass checks its budget and the scheduler's
//! `should_yield`. A yielded pass keeps its state on the root and resumes on
//! the next callback, unless an update to a more urgent lane arrived, in which
//! case it is discarded. Discarding is free: a pass never touches the host and
//! never mutates committed state it cannot rebuild.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use frx_core::{
    CapturedError, Dependency, DependencyId, EffectFlags, Lanes, SchedulerPriority,
    lane_to_priority,
};

use crate::config::ReconcilerConfig;
use crate::context::ContextStack;
use crate::effects::Effect;
use crate::error::ReconcileError;
use crate::fiber::{FiberId, FiberStore};
use crate::host::HostConfig;
use crate::mailbox::{MailItem, RootShared};
use crate::root::{ParkedPass, Root, RootPhase};
use crate::scheduler::{WorkBudget, WorkStatus};
use crate::trace::ReconcileEvent;

/// Effect list and context stack heights recorded when a boundary begins.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Mark {
    pub effects: usize,
    pub contexts: usize,
}

/// How a pass ended.
#[derive(Debug)]
pub(crate) enum PassExit {
    Completed,
    /// A transition would replace visible content with a fallback.
    SuspendedWithDelay,
    /// Suspended outside every suspense boundary.
    SuspendedNoBoundary,
    Fatal(CapturedError),
}

/// One render pass over the work-in-progress tree.
pub(crate) struct RenderPass {
    pub root: FiberId,
    pub lanes: Lanes,
    pub next: Option<FiberId>,
    pub effects: Vec<Effect>,
    pub contexts: ContextStack,
    pub marks: HashMap<FiberId, Mark>,
    /// Dependencies each suspense boundary caught in this pass.
    pub boundary_deps: HashMap<FiberId, Vec<Dependency>>,
    /// Errors each error boundary caught in this pass.
    pub captured: HashMap<FiberId, CapturedError>,
    /// Consumers reached by a provider change.
    pub context_changed: HashSet<FiberId>,
    /// Committed fibers between a changed consumer and its provider.
    pub context_paths: HashSet<FiberId>,
    /// Queue retirements, run only if the pass commits.
    pub retirements: Vec<Box<dyn FnOnce()>>,
    pub suspended_on: Vec<DependencyId>,
    pub delay_commit: bool,
    pub exit: Option<PassExit>,
    pub units: u64,
    pub suspensions: u64,
    pub started: Instant,
}

impl RenderPass {
    pub(crate) fn new(root: FiberId, lanes: Lanes, started: Instant) -> Self {
        Self {
            root,
            lanes,
            next: Some(root),
            effects: Vec::new(),
            contexts: ContextStack::default(),
            marks: HashMap::new(),
            boundary_deps: HashMap::new(),
            captured: HashMap::new(),
            context_changed: HashSet::new(),
            context_paths: HashSet::new(),
            retirements: Vec::new(),
            suspended_on: Vec::new(),
            delay_commit: false,
            exit: None,
            units: 0,
            suspensions: 0,
            started,
        }
    }
}

/// Render-phase view of a root. Has no access to the host.
pub(crate) struct Renderer<'a> {
    pub store: &'a mut FiberStore,
    pub pass: &'a mut RenderPass,
    pub shared: &'a Rc<RootShared>,
    pub config: &'a ReconcilerConfig,
    pub pings: &'a mut HashMap<DependencyId, Lanes>,
}

impl Renderer<'_> {
    pub(crate) fn perform_unit_of_work(&mut self, unit: FiberId) {
        self.pass.units += 1;
        let next = match self.begin_work(unit) {
            Ok(Some(child)) => Some(child),
            Ok(None) => self.complete_unit_of_work(unit),
            Err(interrupt) => self.throw_exception(unit, interrupt),
        };
        self.pass.next = next;
    }

    fn complete_unit_of_work(&mut self, unit: FiberId) -> Option<FiberId> {
        let mut node = unit;
        loop {
            self.complete_work(node);
            if node == self.pass.root {
                break;
            }
            if let Some(sibling) = self.store[node].sibling {
                return Some(sibling);
            }
            match self.store[node].parent {
                Some(parent) => node = parent,
                None => {
                    tracing::warn!(fiber = %self.store[node].kind.label(), "detached fiber in pass");
                    break;
                }
            }
        }
        self.pass.exit = Some(if self.pass.delay_commit {
            PassExit::SuspendedWithDelay
        } else {
            PassExit::Completed
        });
        None
    }

    /// Record effect list and context heights for a boundary about to
    /// render its children.
    pub(crate) fn mark_boundary(&mut self, boundary: FiberId) {
        self.pass.marks.insert(
            boundary,
            Mark {
                effects: self.pass.effects.len(),
                contexts: self.pass.contexts.len(),
            },
        );
    }
}

fn budget_spent(budget: WorkBudget, units: u32, now: impl Fn() -> Instant) -> bool {
    match budget {
        WorkBudget::Unbounded => false,
        WorkBudget::Units(limit) => units >= limit,
        WorkBudget::Until(deadline) => now() >= deadline,
    }
}

impl<H: HostConfig> Root<H> {
    /// One slice of work.
    pub(crate) fn work(
        &mut self,
        budget: WorkBudget,
        host_yield: bool,
    ) -> Result<WorkStatus, ReconcileError> {
        self.ensure_usable()?;
        let _span = tracing::debug_span!("frx.perform_work", root = self.id.get()).entered();

        self.flush_passive_effects()?;
        self.drain_mailbox();

        let now = self.shared.now();
        if self.parked.as_ref().is_some_and(|p| now >= p.deadline) {
            if let Some(parked) = self.parked.take() {
                tracing::debug!(lanes = ?parked.pass.lanes, "fallback timeout elapsed; committing");
                return self.commit_finished(parked.pass);
            }
        }

        let expired = self
            .lanes
            .mark_starved_lanes_as_expired(now, &self.config.lane_timeouts);
        if !expired.is_empty() {
            tracing::debug!(lanes = ?expired, "lanes expired");
        }

        let wip_lanes = self.pass.as_ref().map_or(Lanes::empty(), |p| p.lanes);
        let lanes = self.lanes.next_lanes(wip_lanes);
        if lanes.is_empty() {
            if self.pass.is_some() {
                self.discard_pass(Lanes::empty());
            }
            let waiting = self.parked.is_some() || !self.lanes.suspended.is_empty();
            self.phase = if waiting {
                RootPhase::Suspended
            } else {
                RootPhase::Idle
            };
            self.ensure_root_scheduled();
            return Ok(if waiting {
                WorkStatus::Suspended
            } else {
                WorkStatus::Idle
            });
        }

        if self.pass.as_ref().is_some_and(|p| p.lanes != lanes) {
            self.discard_pass(lanes);
        }
        if self.pass.is_none() {
            self.prepare_fresh_stack(lanes, now);
        }
        let Some(mut pass) = self.pass.take() else {
            return Ok(WorkStatus::Idle);
        };

        let sync = self.lanes.should_render_sync(lanes);
        self.phase = RootPhase::Rendering;
        let yielded = {
            let _render = tracing::debug_span!("frx.render", lanes = ?lanes, sync).entered();
            let shared = Rc::clone(&self.shared);
            let mut renderer = Renderer {
                store: &mut self.store,
                pass: &mut pass,
                shared: &self.shared,
                config: &self.config,
                pings: &mut self.ping_cache,
            };
            let mut units = 0u32;
            let mut yielded = false;
            while let Some(unit) = renderer.pass.next {
                renderer.perform_unit_of_work(unit);
                units += 1;
                if sync || renderer.pass.next.is_none() {
                    continue;
                }
                if budget_spent(budget, units, || shared.now())
                    || (host_yield && shared.scheduler.should_yield())
                {
                    yielded = true;
                    break;
                }
            }
            yielded
        };

        if yielded {
            self.stats.yields += 1;
            self.shared.record(ReconcileEvent::RenderYielded {
                lanes,
                units: pass.units,
            });
            tracing::trace!(units = pass.units, "render yielded");
            self.pass = Some(pass);
            self.ensure_root_scheduled();
            return Ok(WorkStatus::Yielded);
        }

        self.stats.suspensions += pass.suspensions;
        match pass.exit.take() {
            Some(PassExit::Completed) | None => {
                self.shared.record(ReconcileEvent::RenderCompleted {
                    lanes,
                    units: pass.units,
                });
                self.phase = RootPhase::Completed;
                self.commit_finished(pass)
            }
            Some(PassExit::SuspendedWithDelay) => {
                let deadline = now + self.config.suspense_timeout;
                tracing::debug!(lanes = ?lanes, timeout_ms = self.config.suspense_timeout.as_millis() as u64, "holding back fallback");
                self.shared.record(ReconcileEvent::Parked {
                    lanes,
                    delayed: true,
                });
                self.lanes.mark_suspended(lanes);
                self.parked = Some(ParkedPass { pass, deadline });
                self.phase = RootPhase::Suspended;
                self.ensure_root_scheduled();
                Ok(WorkStatus::Suspended)
            }
            Some(PassExit::SuspendedNoBoundary) => {
                tracing::debug!(lanes = ?lanes, "suspended outside any boundary; waiting for ping");
                self.shared.record(ReconcileEvent::Parked {
                    lanes,
                    delayed: false,
                });
                self.lanes.mark_suspended(lanes);
                self.lanes.clear_expiration(lanes);
                self.stats.discarded_passes += 1;
                drop(pass);
                self.sweep();
                self.phase = RootPhase::Suspended;
                self.ensure_root_scheduled();
                Ok(WorkStatus::Suspended)
            }
            Some(PassExit::Fatal(captured)) => {
                self.stats.discarded_passes += 1;
                drop(pass);
                self.sweep();
                self.handle_fatal(captured)
            }
        }
    }

    /// Commit a finished pass and settle what the commit scheduled.
    pub(crate) fn commit_finished(&mut self, pass: RenderPass) -> Result<WorkStatus, ReconcileError> {
        self.phase = RootPhase::Committing;
        self.commit_root(pass)?;
        self.stats.commits += 1;
        self.drain_mailbox();

        if self.shared.take_sync_from_commit() {
            self.nested_sync_commits += 1;
            let limit = self.config.max_nested_sync_commits;
            if self.nested_sync_commits > limit {
                self.nested_sync_commits = 0;
                self.lanes.pending.remove(Lanes::SYNC);
                tracing::warn!(limit, "maximum update depth exceeded; dropping synchronous work");
                self.phase = RootPhase::Idle;
                self.ensure_root_scheduled();
                return Err(ReconcileError::MaxUpdateDepth { limit });
            }
        } else {
            self.nested_sync_commits = 0;
        }

        if let Some(captured) = self.uncaught.take() {
            return self.handle_fatal(captured);
        }
        self.phase = RootPhase::Idle;
        self.ensure_root_scheduled();
        Ok(WorkStatus::Committed)
    }

    /// Unmount the tree after an error nothing caught.
    pub(crate) fn handle_fatal(
        &mut self,
        captured: CapturedError,
    ) -> Result<WorkStatus, ReconcileError> {
        self.shared.record(ReconcileEvent::ErrorCaptured {
            component: captured.component.clone(),
            message: captured.message.clone(),
            handled: false,
        });
        if self.handling_fatal {
            return Err(ReconcileError::Uncaught(captured));
        }
        tracing::warn!(
            component = %captured.component,
            message = %captured.message,
            "uncaught error; unmounting tree"
        );
        self.handling_fatal = true;
        self.shared
            .root_queue
            .borrow_mut()
            .push(Lanes::SYNC, frx_core::UpdateAction::Replace(None));
        let root = self.current;
        self.mark_update(root, Lanes::SYNC);
        self.lanes
            .mark_updated(Lanes::SYNC, self.shared.now(), &self.config.lane_timeouts);

        let mut outcome = Ok(());
        while outcome.is_ok() && self.lanes.pending.includes_sync() {
            outcome = self.work(WorkBudget::Unbounded, false).map(|_| ());
        }
        if outcome.is_ok() {
            outcome = self.flush_passive_effects().map(|_| ());
        }
        self.handling_fatal = false;
        if let Err(err) = outcome {
            tracing::warn!(error = %err, "unmount after uncaught error failed");
        }
        if let Some(handler) = self.on_uncaught_error.as_mut() {
            handler(&captured);
        }
        self.phase = RootPhase::Idle;
        Err(ReconcileError::Uncaught(captured))
    }

    fn prepare_fresh_stack(&mut self, lanes: Lanes, now: Instant) {
        self.parked = None;
        let wip = self.store.create_work_in_progress(self.current, None);
        let fiber = &mut self.store[wip];
        fiber.parent = None;
        fiber.sibling = None;
        self.pass = Some(RenderPass::new(wip, lanes, now));
        self.stats.render_passes += 1;
        let sync = self.lanes.should_render_sync(lanes);
        self.shared.record(ReconcileEvent::RenderStarted { lanes, sync });
        tracing::trace!(lanes = ?lanes, sync, "render pass started");
    }

    /// Drop the in-progress pass. `by` names the lanes that displaced it.
    pub(crate) fn discard_pass(&mut self, by: Lanes) {
        let Some(pass) = self.pass.take() else {
            return;
        };
        self.stats.discarded_passes += 1;
        self.stats.suspensions += pass.suspensions;
        if !by.is_empty() {
            self.stats.interruptions += 1;
        }
        tracing::debug!(lanes = ?pass.lanes, by = ?by, units = pass.units, "render pass discarded");
        self.shared.record(ReconcileEvent::RenderInterrupted {
            lanes: pass.lanes,
            by,
        });
        drop(pass);
        self.sweep();
        self.phase = RootPhase::Idle;
    }

    /// Free fibers no longer reachable from the committed tree or from a
    /// pass that is still alive.
    pub(crate) fn sweep(&mut self) {
        let mut roots = vec![self.current];
        roots.extend(self.pass.as_ref().map(|p| p.root));
        roots.extend(self.parked.as_ref().map(|p| p.pass.root));
        self.store.sweep(&roots);
    }

    /// Apply queued updates and wake-ups to the tree and lanes.
    pub(crate) fn drain_mailbox(&mut self) {
        let mail = self.shared.take_mail();
        if mail.is_empty() {
            return;
        }
        let now = self.shared.now();
        let mut restart = false;
        for item in mail {
            match item {
                MailItem::Update { fiber, lane } => {
                    if !self.mark_update(fiber, lane) {
                        tracing::warn!(lane = lane.label(), "update on an unmounted component dropped");
                        continue;
                    }
                    self.lanes
                        .mark_updated(lane, now, &self.config.lane_timeouts);
                    if self.pass.as_ref().is_some_and(|p| p.lanes.intersects(lane)) {
                        restart = true;
                    }
                }
                MailItem::Wake(dependency) => self.wake(dependency, now, &mut restart),
            }
        }
        if restart {
            tracing::debug!("update reached the in-progress lanes; restarting");
            self.discard_pass(Lanes::empty());
        }
    }

    /// Mark `fiber` and its ancestors. False if the fiber is no longer part
    /// of this root.
    pub(crate) fn mark_update(&mut self, fiber: FiberId, lane: Lanes) -> bool {
        if !self.store.contains(fiber) {
            return false;
        }
        self.store.mark_lanes(fiber, lane);
        let top = self.store.mark_ancestors(fiber, lane);
        top == self.current || self.store.alternate(self.current) == Some(top)
    }

    fn wake(&mut self, dependency: DependencyId, now: Instant, restart: &mut bool) {
        if let Some(lanes) = self.ping_cache.remove(&dependency) {
            let pinged = self.lanes.mark_pinged(lanes);
            self.shared.record(ReconcileEvent::Pinged {
                dependency: dependency.get(),
                lanes: pinged,
            });
            if self
                .pass
                .as_ref()
                .is_some_and(|p| p.suspended_on.contains(&dependency))
            {
                *restart = true;
            }
            if self
                .parked
                .as_ref()
                .is_some_and(|p| p.pass.suspended_on.contains(&dependency))
            {
                tracing::debug!(%dependency, "parked pass pinged; rendering again");
                self.parked = None;
            }
        }

        let Some(boundaries) = self.retry_cache.remove(&dependency) else {
            return;
        };
        for (boundary, lane) in boundaries {
            if !self.mark_update(boundary, lane) {
                tracing::debug!(%dependency, "retry for a removed boundary dropped");
                continue;
            }
            self.lanes
                .mark_updated(lane, now, &self.config.lane_timeouts);
            self.stats.retries += 1;
            self.shared.record(ReconcileEvent::RetryScheduled {
                dependency: dependency.get(),
                lane,
            });
            tracing::debug!(%dependency, lane = lane.label(), "suspense boundary retry scheduled");
        }
    }

    /// Keep exactly one host callback matching the root's most urgent work.
    pub(crate) fn ensure_root_scheduled(&mut self) {
        if self.unmounted || self.poisoned {
            self.shared.cancel_callback();
            return;
        }
        let wip = self.pass.as_ref().map_or(Lanes::empty(), |p| p.lanes);
        let next = self.lanes.next_lanes(wip);
        if !next.is_empty() {
            self.shared
                .request_callback(lane_to_priority(next), std::time::Duration::ZERO);
            return;
        }
        if let Some(parked) = &self.parked {
            let delay = parked.deadline.saturating_duration_since(self.shared.now());
            self.shared
                .request_callback(SchedulerPriority::Normal, delay);
            return;
        }
        if self.pending_passive.is_some() {
            self.shared
                .request_callback(SchedulerPriority::Idle, std::time::Duration::ZERO);
            return;
        }
        if !self.shared.has_mail() {
            self.shared.cancel_callback();
        }
    }
}
