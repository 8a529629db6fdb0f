#![forbid(unsafe_code)]

//! Complete phase: diff host props, bubble lanes and flags, append effects.

use frx_core::{EffectFlags, Lanes};

use crate::effects::Effect;
use crate::element::{ElementKind, UpdatePayload};
use crate::fiber::{FiberId, FiberKind, FiberState};
use crate::host::NodeRef;
use crate::work_loop::Renderer;

fn same_ref(a: Option<&NodeRef>, b: Option<&NodeRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}

impl Renderer<'_> {
    pub(crate) fn complete_work(&mut self, wip: FiberId) {
        let current = self.store.alternate(wip);
        match self.store[wip].kind.clone() {
            FiberKind::Host(_) => self.complete_host(wip, current),
            FiberKind::Text => {
                if let Some(current) = current {
                    let text_of = |props: Option<&crate::element::Element>| match props.map(|p| p.kind()) {
                        Some(ElementKind::Text(text)) => Some(text.clone()),
                        _ => None,
                    };
                    let old = text_of(self.store[current].memoized_props.as_ref());
                    let new = text_of(self.store[wip].memoized_props.as_ref());
                    if old != new {
                        self.store[wip].flags |= EffectFlags::UPDATE;
                    }
                }
            }
            FiberKind::Provider(context) => self.pass.contexts.pop(context),
            FiberKind::Offscreen => {
                let hidden = |state: &FiberState| matches!(state, FiberState::Offscreen { hidden: true });
                let now_hidden = hidden(&self.store[wip].state);
                if let Some(current) = current {
                    if hidden(&self.store[current].state) != now_hidden {
                        self.store[wip].flags |= EffectFlags::VISIBILITY;
                    }
                }
            }
            FiberKind::Suspense => self.complete_suspense(wip, current),
            FiberKind::ErrorBoundary => self.complete_error_boundary(wip),
            FiberKind::HostRoot | FiberKind::Function(_) | FiberKind::Fragment | FiberKind::Portal(_) => {}
        }

        self.bubble_properties(wip, current);

        let fiber = &mut self.store[wip];
        fiber.flags.remove(EffectFlags::INCOMPLETE);
        if fiber.flags.has_commit_work() {
            self.pass.effects.push(Effect::Commit(wip));
        }
    }

    fn complete_host(&mut self, wip: FiberId, current: Option<FiberId>) {
        let Some(current) = current else {
            if self.store[wip].node_ref.is_some() {
                self.store[wip].flags |= EffectFlags::REF;
            }
            return;
        };
        let old = self.store[current].memoized_props.clone();
        let new = self.store[wip].memoized_props.clone();
        if let (Some(old), Some(new)) = (old, new) {
            if !old.ptr_eq(&new) {
                if let (ElementKind::Host { attrs: before, .. }, ElementKind::Host { attrs: after, .. }) =
                    (old.kind(), new.kind())
                {
                    let payload = UpdatePayload::diff(before, after);
                    if !payload.is_empty() {
                        let fiber = &mut self.store[wip];
                        fiber.update_payload = Some(payload);
                        fiber.flags |= EffectFlags::UPDATE;
                    }
                }
            }
        }
        if !same_ref(
            self.store[current].node_ref.as_ref(),
            self.store[wip].node_ref.as_ref(),
        ) {
            self.store[wip].flags |= EffectFlags::REF;
        }
    }

    /// Collect child lanes and, unless the children were reused untouched,
    /// child flags.
    fn bubble_properties(&mut self, wip: FiberId, current: Option<FiberId>) {
        let reused = current.is_some_and(|c| self.store[c].child == self.store[wip].child);
        let hidden = matches!(self.store[wip].state, FiberState::Offscreen { hidden: true });
        let mut child_lanes = Lanes::empty();
        let mut subtree = EffectFlags::empty();
        let mut next = self.store[wip].child;
        while let Some(child) = next {
            let fiber = &self.store[child];
            child_lanes |= fiber.lanes | fiber.child_lanes;
            if !reused {
                subtree |= fiber.flags | fiber.subtree_flags;
            }
            next = fiber.sibling;
        }
        let fiber = &mut self.store[wip];
        // Work inside hidden content waits until it is shown again.
        fiber.child_lanes = if hidden { Lanes::empty() } else { child_lanes };
        fiber.subtree_flags = subtree;
    }
}
