#![forbid(unsafe_code)]

//! Throw handling: route an interrupted render to the nearest boundary.

use std::rc::{Rc, Weak};

use frx_core::{CapturedError, Dependency, EffectFlags, Interrupt, RenderError, WakeListener};

use crate::fiber::{FiberId, FiberKind};
use crate::mailbox::RootShared;
use crate::trace::ReconcileEvent;
use crate::work_loop::{Mark, PassExit, Renderer};

impl Renderer<'_> {
    /// Handle an interrupt raised while beginning `source`. Returns the
    /// fiber to resume from.
    pub(crate) fn throw_exception(&mut self, source: FiberId, interrupt: Interrupt) -> Option<FiberId> {
        self.store[source].flags |= EffectFlags::INCOMPLETE;
        match interrupt {
            Interrupt::Suspend(dependency) => self.throw_suspend(source, dependency),
            Interrupt::Error(error) => self.throw_error(source, error),
        }
    }

    fn nearest_boundary(&self, source: FiberId, suspense: bool) -> Option<FiberId> {
        let mut node = self.store[source].parent;
        while let Some(id) = node {
            let fiber = &self.store[id];
            let kind_matches = if suspense {
                matches!(fiber.kind, FiberKind::Suspense)
            } else {
                matches!(fiber.kind, FiberKind::ErrorBoundary)
            };
            if kind_matches && !fiber.flags.contains(EffectFlags::DID_CAPTURE) {
                return Some(id);
            }
            node = fiber.parent;
        }
        None
    }

    fn throw_suspend(&mut self, source: FiberId, dependency: Dependency) -> Option<FiberId> {
        let lanes = self.pass.lanes;
        let boundary = self.nearest_boundary(source, true);
        self.pass.suspensions += 1;
        tracing::debug!(
            component = %self.store[source].kind.label(),
            dependency = %dependency.id(),
            caught = boundary.is_some(),
            "render suspended"
        );
        self.shared.record(ReconcileEvent::Suspended {
            lanes,
            dependency: dependency.id().get(),
            boundary: boundary.is_some(),
        });

        match boundary {
            Some(boundary) => {
                self.attach_ping(&dependency);
                let deps = self.pass.boundary_deps.entry(boundary).or_default();
                if !deps.iter().any(|d| d.id() == dependency.id()) {
                    deps.push(dependency);
                }
                self.unwind_to(boundary);
                Some(boundary)
            }
            None if lanes.includes_sync() => {
                let error = RenderError::new(format!(
                    "{} suspended during a synchronous render with no suspense boundary above it",
                    self.store[source].kind.label()
                ));
                self.throw_error(source, error)
            }
            None => {
                self.attach_ping(&dependency);
                self.pass.exit = Some(PassExit::SuspendedNoBoundary);
                None
            }
        }
    }

    fn throw_error(&mut self, source: FiberId, error: RenderError) -> Option<FiberId> {
        let captured = CapturedError::new(
            &error,
            self.store[source].kind.label(),
            self.store.component_stack(source),
            self.shared.now(),
        );
        let boundary = self.nearest_boundary(source, false);
        match boundary {
            Some(boundary) => {
                tracing::debug!(
                    component = %captured.component,
                    message = %captured.message,
                    "render error caught by boundary"
                );
                self.shared.record(ReconcileEvent::ErrorCaptured {
                    component: captured.component.clone(),
                    message: captured.message.clone(),
                    handled: true,
                });
                self.pass.captured.insert(boundary, captured);
                self.unwind_to(boundary);
                Some(boundary)
            }
            None => {
                self.pass.exit = Some(PassExit::Fatal(captured));
                None
            }
        }
    }

    /// Register the root to be pinged when `dependency` settles.
    fn attach_ping(&mut self, dependency: &Dependency) {
        *self.pings.entry(dependency.id()).or_default() |= self.pass.lanes;
        if !self.pass.suspended_on.contains(&dependency.id()) {
            self.pass.suspended_on.push(dependency.id());
        }
        let weak: Weak<RootShared> = Rc::downgrade(self.shared);
        let listener: Weak<dyn WakeListener> = weak;
        dependency.subscribe(listener);
    }

    /// Drop the effects and contexts pushed below `boundary` and make it the
    /// next unit, flagged to render its alternate content.
    fn unwind_to(&mut self, boundary: FiberId) {
        let mark = self.pass.marks.get(&boundary).copied().unwrap_or(Mark {
            effects: self.pass.effects.len(),
            contexts: self.pass.contexts.len(),
        });
        self.pass.effects.truncate(mark.effects);
        self.pass.contexts.truncate(mark.contexts);
        let fiber = &mut self.store[boundary];
        fiber.flags.remove(EffectFlags::CHILD_DELETION | EffectFlags::INCOMPLETE);
        fiber.flags |= EffectFlags::DID_CAPTURE;
    }
}
