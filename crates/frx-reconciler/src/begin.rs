#![forbid(unsafe_code)]

//! Begin phase: render one fiber and reconcile its children.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use frx_core::{EffectFlags, Interrupt, Lanes, RenderError, RenderResult, process_updates};

use crate::context::ContextId;
use crate::element::{Element, ElementKind};
use crate::fiber::{FiberId, FiberKind, FiberState, RootState};
use crate::hooks::Hooks;
use crate::work_loop::Renderer;

fn same_props(a: Option<&Element>, b: Option<&Element>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

/// Children of a component's output. An unkeyed fragment is flattened.
fn output_children(element: Option<Element>) -> Vec<Element> {
    match element {
        None => Vec::new(),
        Some(el) => match el.kind() {
            ElementKind::Fragment(children) if el.key().is_none() => children.clone(),
            _ => vec![el],
        },
    }
}

fn element_children(element: Option<&Element>) -> Vec<Element> {
    match element.map(|e| e.kind()) {
        Some(
            ElementKind::Host { children, .. }
            | ElementKind::Fragment(children)
            | ElementKind::Provider { children, .. }
            | ElementKind::Portal { children, .. },
        ) => children.clone(),
        _ => Vec::new(),
    }
}

impl Renderer<'_> {
    pub(crate) fn begin_work(&mut self, wip: FiberId) -> RenderResult<Option<FiberId>> {
        let lanes = self.pass.lanes;
        let current = self.store.alternate(wip);
        let kind = self.store[wip].kind.clone();

        if matches!(kind, FiberKind::Suspense | FiberKind::ErrorBoundary) {
            self.mark_boundary(wip);
        }

        let own_lanes = self.store[wip].lanes;
        let unchanged = current.is_some_and(|c| {
            same_props(
                self.store[c].memoized_props.as_ref(),
                self.store[wip].pending_props.as_ref(),
            )
        });
        if unchanged
            && !own_lanes.intersects(lanes)
            && !self.context_changed(wip)
            && !self.store[wip].flags.contains(EffectFlags::DID_CAPTURE)
            && !self.has_queued_errors(wip)
        {
            return Ok(self.bailout_on_already_finished_work(wip));
        }

        let fiber = &mut self.store[wip];
        fiber.lanes = Lanes::empty();
        fiber.memoized_props = fiber.pending_props.clone();

        let next = match kind {
            FiberKind::HostRoot => self.update_host_root(wip),
            FiberKind::Host(_) => {
                let props = self.store[wip].pending_props.clone();
                self.store[wip].node_ref = props.as_ref().and_then(|p| p.node_ref().cloned());
                self.reconcile_children(wip, element_children(props.as_ref()))
            }
            FiberKind::Text => None,
            FiberKind::Fragment | FiberKind::Portal(_) => {
                let props = self.store[wip].pending_props.clone();
                self.reconcile_children(wip, element_children(props.as_ref()))
            }
            FiberKind::Provider(context) => self.update_provider(wip, current, context),
            FiberKind::Function(_) => {
                return self.update_function_component(wip, current, own_lanes, unchanged);
            }
            FiberKind::Suspense => self.update_suspense(wip),
            FiberKind::Offscreen => self.update_offscreen(wip, current),
            FiberKind::ErrorBoundary => self.update_error_boundary(wip, current),
        };
        Ok(next)
    }

    fn has_queued_errors(&self, wip: FiberId) -> bool {
        matches!(&self.store[wip].state, FiberState::Boundary(record) if !record.captured.borrow().is_empty())
    }

    pub(crate) fn context_changed(&self, fiber: FiberId) -> bool {
        self.pass.context_changed.contains(&fiber)
            || self
                .store
                .alternate(fiber)
                .is_some_and(|alt| self.pass.context_changed.contains(&alt))
    }

    /// Whether a changed consumer sits somewhere below `fiber`.
    fn leads_to_context_change(&self, fiber: FiberId) -> bool {
        self.pass.context_paths.contains(&fiber)
            || self
                .store
                .alternate(fiber)
                .is_some_and(|alt| self.pass.context_paths.contains(&alt))
    }

    /// Reuse the committed subtree. Returns the first child if some
    /// descendant still has work in this pass.
    fn bailout_on_already_finished_work(&mut self, wip: FiberId) -> Option<FiberId> {
        let fiber = &mut self.store[wip];
        fiber.memoized_props = fiber.pending_props.clone();
        if let (FiberKind::Provider(context), Some(props)) = (&fiber.kind, &fiber.memoized_props) {
            if let ElementKind::Provider { value, .. } = props.kind() {
                self.pass.contexts.push(*context, value.clone());
            }
        }
        if !self.store[wip].child_lanes.intersects(self.pass.lanes)
            && !self.leads_to_context_change(wip)
        {
            tracing::trace!(fiber = %self.store[wip].kind.label(), "bailout: subtree clean");
            return None;
        }
        self.clone_child_fibers(wip)
    }

    /// Give `wip` work-in-progress copies of the committed children.
    fn clone_child_fibers(&mut self, wip: FiberId) -> Option<FiberId> {
        let first = self
            .store
            .alternate(wip)
            .and_then(|current| self.store[current].child);
        let mut children = Vec::new();
        let mut next = first;
        while let Some(child) = next {
            children.push(child);
            next = self.store[child].sibling;
        }

        let mut copies = Vec::with_capacity(children.len());
        for child in children {
            let props = self.store[child].memoized_props.clone();
            copies.push(self.store.create_work_in_progress(child, props));
        }
        for (i, &copy) in copies.iter().enumerate() {
            let fiber = &mut self.store[copy];
            fiber.parent = Some(wip);
            fiber.index = i;
            fiber.sibling = copies.get(i + 1).copied();
        }
        self.store[wip].child = copies.first().copied();
        self.store[wip].child
    }

    fn update_host_root(&mut self, wip: FiberId) -> Option<FiberId> {
        let (base, previous) = match &self.store[wip].state {
            FiberState::Root(state) => (state.base.clone(), state.element.clone()),
            _ => (frx_core::BaseState::new(None), None),
        };
        let queue = Rc::clone(&self.shared.root_queue);
        let processed = process_updates(&base, &queue.borrow(), self.pass.lanes);
        let through = processed.consumed_through;
        self.pass.retirements.push(Box::new(move || {
            queue.borrow_mut().retire_through(through);
        }));

        let element = processed.state.clone();
        let fiber = &mut self.store[wip];
        fiber.lanes = processed.skipped_lanes;
        fiber.state = FiberState::Root(RootState {
            element: element.clone(),
            base: processed.base,
        });

        if same_props(previous.as_ref(), element.as_ref()) {
            return self.bailout_on_already_finished_work(wip);
        }
        self.reconcile_children(wip, output_children(element))
    }

    fn update_provider(
        &mut self,
        wip: FiberId,
        current: Option<FiberId>,
        context: ContextId,
    ) -> Option<FiberId> {
        let props = self.store[wip].pending_props.clone();
        let Some(ElementKind::Provider {
            value, children, ..
        }) = props.as_ref().map(|p| p.kind())
        else {
            return None;
        };
        if let Some(current) = current {
            let changed = match self.store[current].memoized_props.as_ref().map(|p| p.kind()) {
                Some(ElementKind::Provider { value: old, .. }) => !old.same_as(value),
                _ => true,
            };
            if changed {
                self.propagate_context_change(wip, current, context);
            }
        }
        self.pass.contexts.push(context, value.clone());
        self.reconcile_children(wip, children.clone())
    }

    /// Schedule every consumer of `context` below the provider.
    ///
    /// The committed tree stays untouched: consumers and the fibers between
    /// them and the provider are recorded on the pass, so bailouts above
    /// them still visit them. Nested providers of the same context shadow it.
    fn propagate_context_change(&mut self, provider: FiberId, current: FiberId, context: ContextId) {
        let mut stack = self.store.children(current);
        let mut reached = 0usize;
        while let Some(fiber) = stack.pop() {
            if self.store[fiber].context_deps.contains(&context) {
                let mut ancestor = self.store[fiber].parent;
                while let Some(id) = ancestor {
                    if id == provider || id == current || !self.pass.context_paths.insert(id) {
                        break;
                    }
                    ancestor = self.store[id].parent;
                }
                self.pass.context_changed.insert(fiber);
                reached += 1;
            }
            if matches!(self.store[fiber].kind, FiberKind::Provider(id) if id == context) {
                continue;
            }
            stack.extend(self.store.children(fiber));
        }
        if reached > 0 {
            self.store[provider].child_lanes |= self.pass.lanes;
        }
        tracing::trace!(%context, consumers = reached, "context change propagated");
    }

    fn update_function_component(
        &mut self,
        wip: FiberId,
        current: Option<FiberId>,
        own_lanes: Lanes,
        unchanged_props: bool,
    ) -> RenderResult<Option<FiberId>> {
        let Some(props) = self.store[wip].pending_props.clone() else {
            return Ok(None);
        };
        let ElementKind::Component {
            component,
            props: input,
        } = props.kind()
        else {
            return Ok(None);
        };

        if component.is_memo() && !own_lanes.intersects(self.pass.lanes) && !self.context_changed(wip) {
            let old_input = current
                .and_then(|c| self.store[c].memoized_props.clone())
                .and_then(|old| match old.kind() {
                    ElementKind::Component { props, .. } => Some(Rc::clone(props)),
                    _ => None,
                });
            if let Some(old_input) = old_input {
                if component.props_equal(&*old_input, &**input) {
                    tracing::trace!(component = component.name(), "memo bailout");
                    return Ok(self.bailout_on_already_finished_work(wip));
                }
            }
        }

        let previous = if current.is_some() {
            self.store[wip].hooks().cloned()
        } else {
            None
        };

        let (output, hooks_out) = {
            let mut hooks = Hooks::new(
                component.name(),
                wip,
                previous,
                self.pass.lanes,
                self.shared,
                &self.pass.contexts,
            );
            let output = if self.config.catch_panics {
                match catch_unwind(AssertUnwindSafe(|| component.render(&mut hooks, &**input))) {
                    Ok(output) => output,
                    Err(payload) => Err(Interrupt::Error(RenderError::from_panic(payload))),
                }
            } else {
                component.render(&mut hooks, &**input)
            };
            (output, hooks.finish())
        };
        let element = output?;
        let out = hooks_out?;

        let context_changed = self.context_changed(wip);
        let fiber = &mut self.store[wip];
        fiber.state = FiberState::Hooks(Rc::new(out.hooks));
        fiber.context_deps = out.context_deps;
        fiber.lanes = out.skipped_lanes;
        self.pass.retirements.extend(out.retirements);

        if current.is_some() && unchanged_props && !out.state_changed && !context_changed {
            tracing::trace!(component = component.name(), "render produced no change; bailing out");
            return Ok(self.bailout_on_already_finished_work(wip));
        }
        self.store[wip].flags |= out.flags;
        Ok(self.reconcile_children(wip, output_children(element)))
    }
}
