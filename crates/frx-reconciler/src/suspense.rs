#![forbid(unsafe_code)]

//! Suspense boundaries and offscreen wrappers.
//!
//! A boundary always renders its primary children inside an offscreen
//! wrapper. When a child suspends, the boundary is begun again with the
//! wrapper hidden and the fallback appended after it, so the primary subtree
//! keeps its state while the fallback is shown.

use frx_core::EffectFlags;

use crate::element::{Element, ElementKind, fragment};
use crate::fiber::{FiberId, FiberState, SuspenseState};
use crate::work_loop::Renderer;

impl Renderer<'_> {
    pub(crate) fn update_suspense(&mut self, wip: FiberId) -> Option<FiberId> {
        let Some(ElementKind::Suspense { children, fallback }) =
            self.store[wip].pending_props.as_ref().map(|p| p.kind().clone())
        else {
            return None;
        };
        let next = if self.store[wip].flags.contains(EffectFlags::DID_CAPTURE) {
            vec![Element::offscreen(true, children), fragment(fallback)]
        } else {
            vec![Element::offscreen(false, children)]
        };
        self.reconcile_children(wip, next)
    }

    pub(crate) fn update_offscreen(&mut self, wip: FiberId, current: Option<FiberId>) -> Option<FiberId> {
        let Some(ElementKind::Offscreen { hidden, children }) =
            self.store[wip].pending_props.as_ref().map(|p| p.kind().clone())
        else {
            return None;
        };
        self.store[wip].state = FiberState::Offscreen { hidden };
        if hidden {
            // Hidden content keeps whatever was committed and is not rendered.
            let committed = current.and_then(|c| self.store[c].child);
            self.store[wip].child = committed;
            return None;
        }
        self.reconcile_children(wip, children)
    }

    pub(crate) fn complete_suspense(&mut self, wip: FiberId, current: Option<FiberId>) {
        let deps = self.pass.boundary_deps.remove(&wip).unwrap_or_default();
        if !self.store[wip].flags.contains(EffectFlags::DID_CAPTURE) {
            self.store[wip].state = FiberState::Suspense(SuspenseState::Visible);
            return;
        }

        let was_visible = current.is_some_and(|c| {
            matches!(&self.store[c].state, FiberState::Suspense(state) if state.is_visible())
        });
        if was_visible && self.pass.lanes.includes_only_non_urgent() {
            tracing::debug!(lanes = ?self.pass.lanes, "transition would hide visible content");
            self.pass.delay_commit = true;
        }
        if !deps.is_empty() {
            self.store[wip].flags |= EffectFlags::RETRY;
        }
        self.store[wip].state = FiberState::Suspense(SuspenseState::Suspended { pending: deps });
    }
}
