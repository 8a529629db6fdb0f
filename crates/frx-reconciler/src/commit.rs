#![forbid(unsafe_code)]

//! Commit phase.
//!
//! A finished pass is applied in one synchronous step:
//!
//! 1. **Mutation.** Walk the effect list in order: deletions run their
//!    layout cleanups and detach refs before their host nodes are removed;
//!    placements and moves insert before the nearest stable host sibling;
//!    updates apply attribute and text payloads; layout cleanups of updated
//!    components run; visibility toggles hide or unhide offscreen content.
//! 2. **Swap.** The finished tree becomes current.
//! 3. **Layout.** Layout effects mount, refs attach and suspended boundaries
//!    register their retries, children before parents.
//! 4. **Passive.** Passive cleanups and mounts are queued and flushed later
//!    at idle priority, or before the next pass starts, whichever is first.
//!
//! A host failure aborts the commit and poisons the root. Errors from effects
//! are routed to the nearest error boundary, which re-renders synchronously.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use frx_core::{
    CapturedError, EffectFlags, HookFlags, Lanes, RenderError, WakeListener,
};

use crate::boundary::BoundaryStatus;
use crate::effects::{CommitSummary, Effect, EffectRecord};
use crate::element::ElementKind;
use crate::error::{HostError, ReconcileError};
use crate::fiber::{FiberId, FiberKind, FiberState, SuspenseState};
use crate::hooks::{Cleanup, EffectHook, Hook};
use crate::host::{HostConfig, HostParent};
use crate::mailbox::RootShared;
use crate::root::Root;
use crate::trace::ReconcileEvent;
use crate::work_loop::RenderPass;

/// Where an effect lives, for error routing once its fiber may be gone.
#[derive(Debug, Clone)]
pub(crate) struct EffectSite {
    /// First fiber to search for an error boundary.
    pub start: FiberId,
    pub component: String,
}

/// Passive effects waiting for their flush.
#[derive(Default)]
pub(crate) struct PendingPassive {
    pub unmounts: Vec<(EffectSite, Cleanup)>,
    pub mounts: Vec<(EffectSite, Rc<EffectHook>)>,
}

impl PendingPassive {
    pub(crate) fn is_empty(&self) -> bool {
        self.unmounts.is_empty() && self.mounts.is_empty()
    }
}

type EffectErrors = Vec<(EffectSite, RenderError)>;

fn guarded<T>(
    catch_panics: bool,
    f: impl FnOnce() -> Result<T, RenderError>,
) -> Result<T, RenderError> {
    if !catch_panics {
        return f();
    }
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(RenderError::from_panic(payload)),
    }
}

fn effect_hooks(hooks: &[Hook]) -> impl Iterator<Item = &Rc<EffectHook>> {
    hooks.iter().filter_map(|hook| match hook {
        Hook::Effect(effect) => Some(effect),
        _ => None,
    })
}

impl<H: HostConfig> Root<H> {
    /// Apply `pass` to the host and make it the current tree.
    pub(crate) fn commit_root(&mut self, pass: RenderPass) -> Result<(), ReconcileError> {
        let _span = tracing::debug_span!(
            "frx.commit",
            lanes = ?pass.lanes,
            effects = pass.effects.len()
        )
        .entered();
        let RenderPass {
            root,
            lanes,
            effects,
            retirements,
            ..
        } = pass;

        let mut errors: EffectErrors = Vec::new();
        let mut records = Vec::with_capacity(effects.len());
        let mut passive = self.pending_passive.take().unwrap_or_default();
        let queued_unmounts = passive.unmounts.len();
        let queued_mounts = passive.mounts.len();

        self.shared.set_in_commit(true);
        if let Err(err) = self.commit_mutations(&effects, &mut records, &mut errors, &mut passive) {
            self.shared.set_in_commit(false);
            return Err(self.poison(err));
        }

        self.current = root;

        let layout_mounts = self.commit_layout_effects(&effects, &mut errors);
        self.shared.set_in_commit(false);

        for retire in retirements {
            retire();
        }

        self.collect_passive_effects(&effects, &mut passive);
        let passive_unmounts = passive.unmounts.len() - queued_unmounts;
        let passive_mounts = passive.mounts.len() - queued_mounts;
        if !passive.is_empty() {
            self.pending_passive = Some(passive);
        }

        for (site, error) in errors {
            self.route_effect_error(site, error);
        }

        let remaining = {
            let root = &self.store[self.current];
            root.lanes | root.child_lanes
        };
        self.lanes.mark_finished(remaining);
        // Pings only matter for lanes that still have work.
        self.ping_cache.retain(|_, lanes| lanes.intersects(remaining));
        self.sweep();

        self.commit_seq += 1;
        let deletions = records.iter().filter(|r: &&EffectRecord| r.deletion).count();
        self.shared.record(ReconcileEvent::Committed {
            lanes,
            effects: records.len(),
            deletions,
        });
        tracing::debug!(
            seq = self.commit_seq,
            effects = records.len(),
            deletions,
            layout_mounts,
            remaining = ?remaining,
            "commit finished"
        );
        self.commits.push_back(CommitSummary {
            seq: self.commit_seq,
            lanes,
            effects: records,
            layout_mounts,
            passive_unmounts,
            passive_mounts,
        });
        while self.commits.len() > self.config.commit_log_capacity.max(1) {
            self.commits.pop_front();
        }
        Ok(())
    }

    fn poison(&mut self, err: HostError) -> ReconcileError {
        tracing::error!(error = %err, "host failed during commit; root is unusable");
        self.poisoned = true;
        self.pass = None;
        self.parked = None;
        self.shared.cancel_callback();
        ReconcileError::Host(err)
    }

    fn commit_mutations(
        &mut self,
        effects: &[Effect],
        records: &mut Vec<EffectRecord>,
        errors: &mut EffectErrors,
        passive: &mut PendingPassive,
    ) -> Result<(), HostError> {
        self.host.prepare_for_commit(&self.container)?;
        for effect in effects {
            match *effect {
                Effect::Deletion { parent, fiber } => {
                    let f = &self.store[fiber];
                    records.push(EffectRecord {
                        fiber,
                        parent: Some(parent),
                        label: f.kind.label(),
                        key: f.key.clone(),
                        flags: EffectFlags::empty(),
                        deletion: true,
                    });
                    self.commit_deletion(parent, fiber, errors, passive)?;
                }
                Effect::Commit(id) => {
                    let f = &self.store[id];
                    records.push(EffectRecord {
                        fiber: id,
                        parent: f.parent,
                        label: f.kind.label(),
                        key: f.key.clone(),
                        flags: f.flags & EffectFlags::COMMIT,
                        deletion: false,
                    });
                    self.commit_mutation(id, errors)?;
                }
            }
        }
        self.host.reset_after_commit(&self.container)?;
        Ok(())
    }

    fn commit_deletion(
        &mut self,
        parent: FiberId,
        fiber: FiberId,
        errors: &mut EffectErrors,
        passive: &mut PendingPassive,
    ) -> Result<(), HostError> {
        let subtree = self.store.subtree(fiber);
        let catch = self.config.catch_panics;
        let mut deleted_boundaries = Vec::new();
        for &id in subtree.iter().rev() {
            let f = &self.store[id];
            match &f.kind {
                FiberKind::Function(component) => {
                    let Some(hooks) = f.hooks().cloned() else { continue };
                    let site = EffectSite {
                        start: parent,
                        component: component.name().to_string(),
                    };
                    for effect in effect_hooks(&hooks) {
                        let Some(cleanup) = effect.take_destroy() else { continue };
                        if effect.is(HookFlags::LAYOUT) {
                            if let Err(err) = guarded(catch, || {
                                cleanup.run();
                                Ok(())
                            }) {
                                errors.push((site.clone(), err));
                            }
                        } else {
                            passive.unmounts.push((site.clone(), cleanup));
                        }
                    }
                }
                FiberKind::Host(_) => {
                    if let Some(node_ref) = &f.node_ref {
                        node_ref.detach();
                    }
                }
                FiberKind::Suspense => deleted_boundaries.push(id),
                _ => {}
            }
        }
        self.forget_retries(&deleted_boundaries);

        let host_parent = self.host_parent_of(parent)?;
        self.remove_host_nodes(fiber, &host_parent)?;
        for id in subtree {
            if let Some(handle) = self.store[id].host {
                self.nodes.remove(handle);
            }
        }
        Ok(())
    }

    fn commit_mutation(&mut self, id: FiberId, errors: &mut EffectErrors) -> Result<(), HostError> {
        let flags = self.store[id].flags;
        if flags.needs_insertion() {
            self.commit_placement(id)?;
            self.store[id].flags.remove(EffectFlags::PLACEMENT | EffectFlags::MOVE);
        }

        if flags.contains(EffectFlags::UPDATE) {
            match self.store[id].kind.clone() {
                FiberKind::Host(tag) => {
                    if let Some(payload) = self.store[id].update_payload.take() {
                        let node = self.host_node(id)?;
                        self.host.commit_update(&node, &tag, &payload)?;
                    }
                }
                FiberKind::Text => {
                    let old = self
                        .store
                        .alternate(id)
                        .and_then(|c| self.text_of(c))
                        .unwrap_or_default();
                    let new = self.text_of(id).unwrap_or_default();
                    let node = self.host_node(id)?;
                    self.host.commit_text_update(&node, &old, &new)?;
                }
                FiberKind::Function(component) if flags.contains(EffectFlags::LAYOUT_EFFECT) => {
                    let Some(hooks) = self.store[id].hooks().cloned() else {
                        return Ok(());
                    };
                    let catch = self.config.catch_panics;
                    for effect in effect_hooks(&hooks).filter(|e| e.fires(HookFlags::LAYOUT)) {
                        let Some(cleanup) = effect.take_destroy() else { continue };
                        if let Err(err) = guarded(catch, || {
                            cleanup.run();
                            Ok(())
                        }) {
                            let site = EffectSite {
                                start: id,
                                component: component.name().to_string(),
                            };
                            errors.push((site, err));
                        }
                    }
                }
                _ => {}
            }
        }

        if flags.contains(EffectFlags::VISIBILITY) {
            let hidden = matches!(self.store[id].state, FiberState::Offscreen { hidden: true });
            for child in self.top_level_host_children(id) {
                let node = self.host_node(child)?;
                match (&self.store[child].kind, hidden) {
                    (FiberKind::Text, true) => self.host.hide_text_instance(&node)?,
                    (FiberKind::Text, false) => {
                        let text = self.text_of(child).unwrap_or_default();
                        self.host.unhide_text_instance(&node, &text)?;
                    }
                    (_, true) => self.host.hide_instance(&node)?,
                    (_, false) => self.host.unhide_instance(&node)?,
                }
            }
        }

        if flags.contains(EffectFlags::REF) {
            if let Some(current) = self.store.alternate(id) {
                if let Some(old) = &self.store[current].node_ref {
                    old.detach();
                }
            }
        }
        Ok(())
    }

    fn text_of(&self, id: FiberId) -> Option<String> {
        match self.store[id].memoized_props.as_ref().map(|p| p.kind()) {
            Some(ElementKind::Text(text)) => Some(text.to_string()),
            _ => None,
        }
    }

    fn existing_node(&self, id: FiberId) -> Option<H::Node> {
        self.store[id]
            .host
            .and_then(|handle| self.nodes.get(handle))
            .cloned()
    }

    fn host_node(&self, id: FiberId) -> Result<H::Node, HostError> {
        self.existing_node(id)
            .ok_or_else(|| HostError::UnknownNode(self.store[id].kind.label()))
    }

    /// The nearest host parent at or above `start`.
    fn host_parent_of(&mut self, start: FiberId) -> Result<HostParent<H>, HostError> {
        let mut node = Some(start);
        while let Some(id) = node {
            match &self.store[id].kind {
                FiberKind::HostRoot => return Ok(HostParent::Container(self.container.clone())),
                FiberKind::Host(_) => return self.host_node(id).map(HostParent::Node),
                FiberKind::Portal(portal) => {
                    let portal = *portal;
                    return self.host.portal_container(portal).map(HostParent::Container);
                }
                _ => node = self.store[id].parent,
            }
        }
        Err(HostError::UnknownNode(format!(
            "{} has no host parent",
            self.store[start].kind.label()
        )))
    }

    /// Host nodes directly below `id`, skipping portals and hidden content.
    fn top_level_host_children(&self, id: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut stack: Vec<FiberId> = self.store.children(id);
        stack.reverse();
        while let Some(node) = stack.pop() {
            let fiber = &self.store[node];
            match fiber.kind {
                FiberKind::Host(_) | FiberKind::Text => out.push(node),
                FiberKind::Portal(_) => {}
                FiberKind::Offscreen if matches!(fiber.state, FiberState::Offscreen { hidden: true }) => {}
                _ => {
                    let mut children = self.store.children(node);
                    children.reverse();
                    stack.extend(children);
                }
            }
        }
        out
    }

    fn remove_host_nodes(&mut self, fiber: FiberId, parent: &HostParent<H>) -> Result<(), HostError> {
        match self.store[fiber].kind.clone() {
            FiberKind::Host(_) | FiberKind::Text => {
                if let Some(node) = self.existing_node(fiber) {
                    parent.remove(&mut self.host, &node)?;
                }
                Ok(())
            }
            FiberKind::Portal(portal) => {
                let container = HostParent::Container(self.host.portal_container(portal)?);
                for child in self.store.children(fiber) {
                    self.remove_host_nodes(child, &container)?;
                }
                Ok(())
            }
            _ => {
                for child in self.store.children(fiber) {
                    self.remove_host_nodes(child, parent)?;
                }
                Ok(())
            }
        }
    }

    fn commit_placement(&mut self, id: FiberId) -> Result<(), HostError> {
        let Some(parent) = self.store[id].parent else {
            return Ok(());
        };
        let host_parent = self.host_parent_of(parent)?;
        let before = self.host_sibling(id);
        self.insert_or_append(id, before.as_ref(), &host_parent)
    }

    /// The host node that `id`'s nodes must be inserted before: the first
    /// following host node that is not itself being placed.
    fn host_sibling(&self, id: FiberId) -> Option<H::Node> {
        let mut node = id;
        'siblings: loop {
            while self.store[node].sibling.is_none() {
                let parent = self.store[node].parent?;
                if self.store[parent].kind.is_host_parent() {
                    return None;
                }
                node = parent;
            }
            node = self.store[node].sibling?;
            loop {
                let fiber = &self.store[node];
                if fiber.kind.is_host_node() {
                    break;
                }
                if fiber.flags.needs_insertion() || matches!(fiber.kind, FiberKind::Portal(_)) {
                    continue 'siblings;
                }
                match fiber.child {
                    Some(child) => node = child,
                    None => continue 'siblings,
                }
            }
            if !self.store[node].flags.needs_insertion() {
                if let Some(found) = self.existing_node(node) {
                    return Some(found);
                }
            }
        }
    }

    fn insert_or_append(
        &mut self,
        id: FiberId,
        before: Option<&H::Node>,
        parent: &HostParent<H>,
    ) -> Result<(), HostError> {
        match self.store[id].kind.clone() {
            FiberKind::Host(_) | FiberKind::Text => {
                let node = match self.existing_node(id) {
                    Some(node) => node,
                    None => self.mount_host(id)?,
                };
                parent.insert(&mut self.host, &node, before)
            }
            FiberKind::Portal(portal) => {
                // A portal keeps its nodes in its own container; only a new one
                // has anything to insert.
                if self
                    .top_level_host_children(id)
                    .iter()
                    .any(|child| self.existing_node(*child).is_some())
                {
                    return Ok(());
                }
                let container = HostParent::Container(self.host.portal_container(portal)?);
                for child in self.store.children(id) {
                    self.insert_or_append(child, None, &container)?;
                }
                Ok(())
            }
            _ => {
                for child in self.store.children(id) {
                    self.insert_or_append(child, before, parent)?;
                }
                Ok(())
            }
        }
    }

    /// Create the host node of `id` with its whole host subtree.
    fn mount_host(&mut self, id: FiberId) -> Result<H::Node, HostError> {
        let props = self.store[id].memoized_props.clone();
        let node = match props.as_ref().map(|p| p.kind()) {
            Some(ElementKind::Host { tag, attrs, .. }) => self.host.create_instance(tag, attrs)?,
            Some(ElementKind::Text(text)) => self.host.create_text_instance(text)?,
            _ => return Err(HostError::UnknownNode(self.store[id].kind.label())),
        };
        let handle = self.nodes.insert(node.clone());
        self.store[id].host = Some(handle);
        if matches!(self.store[id].kind, FiberKind::Host(_)) {
            let as_parent = HostParent::Node(node.clone());
            for child in self.store.children(id) {
                self.insert_or_append(child, None, &as_parent)?;
            }
        }
        Ok(node)
    }

    /// Layout sub-phase. Returns the number of layout effects mounted.
    fn commit_layout_effects(&mut self, effects: &[Effect], errors: &mut EffectErrors) -> usize {
        let catch = self.config.catch_panics;
        let mut mounted = 0;
        for effect in effects {
            let Effect::Commit(id) = *effect else { continue };
            let flags = self.store[id].flags;
            match self.store[id].kind.clone() {
                FiberKind::Function(component) if flags.contains(EffectFlags::LAYOUT_EFFECT) => {
                    let Some(hooks) = self.store[id].hooks().cloned() else { continue };
                    for effect in effect_hooks(&hooks).filter(|e| e.fires(HookFlags::LAYOUT)) {
                        let Some(create) = effect.take_create() else { continue };
                        mounted += 1;
                        match guarded(catch, create) {
                            Ok(cleanup) => effect.set_destroy(cleanup),
                            Err(err) => errors.push((
                                EffectSite {
                                    start: id,
                                    component: component.name().to_string(),
                                },
                                err,
                            )),
                        }
                    }
                }
                FiberKind::Host(_) if flags.contains(EffectFlags::REF) => {
                    if let (Some(node_ref), Some(node)) =
                        (self.store[id].node_ref.clone(), self.existing_node(id))
                    {
                        node_ref.attach(Rc::new(node));
                    }
                }
                FiberKind::Suspense if flags.contains(EffectFlags::RETRY) => self.schedule_retries(id),
                _ => {}
            }
        }
        mounted
    }

    /// Register a committed fallback to re-render once a dependency settles.
    fn schedule_retries(&mut self, boundary: FiberId) {
        let FiberState::Suspense(SuspenseState::Suspended { pending }) =
            self.store[boundary].state.clone()
        else {
            return;
        };
        let lane = self.shared.claim_retry_lane();
        let weak: Weak<RootShared> = Rc::downgrade(&self.shared);
        let listener: Weak<dyn WakeListener> = weak;
        let previous = self.store.alternate(boundary);
        for dependency in &pending {
            let targets = self.retry_cache.entry(dependency.id()).or_default();
            match targets
                .iter_mut()
                .find(|(b, _)| *b == boundary || Some(*b) == previous)
            {
                Some(target) => *target = (boundary, lane),
                None => targets.push((boundary, lane)),
            }
        }
        tracing::debug!(lane = lane.label(), dependencies = pending.len(), "fallback committed; retry registered");
        self.store[boundary].state = FiberState::Suspense(SuspenseState::FallbackVisible {
            retry_lane: lane,
            pending: pending.clone(),
        });
        // Subscribing may wake synchronously if a dependency already settled.
        for dependency in &pending {
            dependency.subscribe(listener.clone());
        }
    }

    /// Drop retries registered for deleted boundaries.
    fn forget_retries(&mut self, boundaries: &[FiberId]) {
        if boundaries.is_empty() || self.retry_cache.is_empty() {
            return;
        }
        let gone: Vec<FiberId> = boundaries
            .iter()
            .flat_map(|&id| std::iter::once(id).chain(self.store.alternate(id)))
            .collect();
        self.retry_cache.retain(|_, targets| {
            targets.retain(|(boundary, _)| !gone.contains(boundary));
            !targets.is_empty()
        });
    }

    fn collect_passive_effects(&mut self, effects: &[Effect], passive: &mut PendingPassive) {
        for effect in effects {
            let Effect::Commit(id) = *effect else { continue };
            let fiber = &self.store[id];
            if !fiber.flags.contains(EffectFlags::PASSIVE_EFFECT) {
                continue;
            }
            let (FiberKind::Function(component), Some(hooks)) = (&fiber.kind, fiber.hooks()) else {
                continue;
            };
            let site = EffectSite {
                start: id,
                component: component.name().to_string(),
            };
            for effect in effect_hooks(hooks).filter(|e| e.fires(HookFlags::PASSIVE)) {
                if let Some(cleanup) = effect.take_destroy() {
                    passive.unmounts.push((site.clone(), cleanup));
                }
                passive.mounts.push((site.clone(), Rc::clone(effect)));
            }
        }
    }

    /// Run queued passive effects: every cleanup first, then every mount.
    pub fn flush_passive_effects(&mut self) -> Result<usize, ReconcileError> {
        let Some(passive) = self.pending_passive.take() else {
            return Ok(0);
        };
        let unmounts = passive.unmounts.len();
        let mounts = passive.mounts.len();
        let _span = tracing::debug_span!("frx.flush_passive", unmounts, mounts).entered();

        let catch = self.config.catch_panics;
        let mut errors: EffectErrors = Vec::new();
        for (site, cleanup) in passive.unmounts {
            if let Err(err) = guarded(catch, || {
                cleanup.run();
                Ok(())
            }) {
                errors.push((site, err));
            }
        }
        for (site, effect) in passive.mounts {
            let Some(create) = effect.take_create() else { continue };
            match guarded(catch, create) {
                Ok(cleanup) => effect.set_destroy(cleanup),
                Err(err) => errors.push((site, err)),
            }
        }

        self.stats.passive_flushes += 1;
        self.shared
            .record(ReconcileEvent::PassiveFlushed { unmounts, mounts });
        let routed = !errors.is_empty();
        for (site, error) in errors {
            self.route_effect_error(site, error);
        }
        if let Some(captured) = self.uncaught.take() {
            return self.handle_fatal(captured).map(|_| unmounts + mounts);
        }
        if routed {
            self.ensure_root_scheduled();
        }
        Ok(unmounts + mounts)
    }

    /// Hand an effect error to the nearest healthy error boundary, which
    /// re-renders on the sync lane. Without one the error is fatal.
    fn route_effect_error(&mut self, site: EffectSite, error: RenderError) {
        let mut stack = if self.store.contains(site.start) {
            self.store.component_stack(site.start)
        } else {
            Vec::new()
        };
        if stack.first() != Some(&site.component) {
            stack.insert(0, site.component.clone());
        }
        let captured = CapturedError::new(&error, site.component, stack, self.shared.now());

        let mut node = self.store.get(site.start).map(|_| site.start);
        let mut boundary = None;
        while let Some(id) = node {
            let fiber = &self.store[id];
            if let FiberState::Boundary(record) = &fiber.state {
                if !matches!(record.status, BoundaryStatus::Failed(_)) {
                    boundary = Some(id);
                    break;
                }
            }
            node = fiber.parent.filter(|p| self.store.contains(*p));
        }

        let Some(boundary) = boundary else {
            tracing::warn!(component = %captured.component, message = %captured.message, "effect error reached the root");
            if self.uncaught.is_none() {
                self.uncaught = Some(captured);
            }
            return;
        };
        tracing::debug!(component = %captured.component, message = %captured.message, "effect error routed to boundary");
        self.shared.record(ReconcileEvent::ErrorCaptured {
            component: captured.component.clone(),
            message: captured.message.clone(),
            handled: true,
        });
        if let FiberState::Boundary(record) = &self.store[boundary].state {
            record.captured.borrow_mut().push_back(captured);
        }
        self.mark_update(boundary, Lanes::SYNC);
        self.lanes
            .mark_updated(Lanes::SYNC, self.shared.now(), &self.config.lane_timeouts);
    }
}
