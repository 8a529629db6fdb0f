#![forbid(unsafe_code)]

//! Error boundaries.
//!
//! A boundary moves through three states:
//!
//! ```text
//! Healthy ──error──▶ Failed ──reset key changed──▶ Recovering
//!    ▲                  ▲                              │
//!    │                  └──────────error───────────────┤
//!    └──────────────────children completed─────────────┘
//! ```
//!
//! Render-phase errors are caught in the same pass: the boundary is
//! re-begun and renders its fallback. Errors from commit-phase effects are
//! queued on the boundary and rendered by a follow-up synchronous pass.

use std::rc::Rc;

use frx_core::{CapturedError, EffectFlags};

use crate::element::{ElementKind, Key};
use crate::fiber::{BoundaryRecord, FiberId, FiberState};
use crate::work_loop::Renderer;

/// Health of an error boundary.
#[derive(Debug, Clone, Default)]
pub(crate) enum BoundaryStatus {
    #[default]
    Healthy,
    /// Showing the fallback for this error.
    Failed(CapturedError),
    /// Rendering the children again after a reset.
    Recovering {
        attempt: u32,
        last_error: CapturedError,
    },
}

impl BoundaryRecord {
    /// Move a failed boundary to `Recovering` while attempts remain.
    pub(crate) fn try_recover(&mut self, max_attempts: u32) -> bool {
        let last_error = match &self.status {
            BoundaryStatus::Healthy => return false,
            BoundaryStatus::Failed(err) => err.clone(),
            BoundaryStatus::Recovering { last_error, .. } => last_error.clone(),
        };
        if self.attempts >= max_attempts {
            self.status = BoundaryStatus::Failed(last_error);
            return false;
        }
        self.attempts += 1;
        self.status = BoundaryStatus::Recovering {
            attempt: self.attempts,
            last_error,
        };
        true
    }

    /// The children completed: forget the failure.
    pub(crate) fn mark_healthy(&mut self) {
        if let BoundaryStatus::Recovering { attempt, .. } = self.status {
            tracing::debug!(attempt, "error boundary recovered");
        }
        self.status = BoundaryStatus::Healthy;
        self.attempts = 0;
    }
}

fn reset_key_of(props: Option<&crate::element::Element>) -> Option<Key> {
    match props.map(|p| p.kind()) {
        Some(ElementKind::ErrorBoundary { reset_key, .. }) => reset_key.clone(),
        _ => None,
    }
}

impl Renderer<'_> {
    pub(crate) fn update_error_boundary(
        &mut self,
        wip: FiberId,
        current: Option<FiberId>,
    ) -> Option<FiberId> {
        let Some(ElementKind::ErrorBoundary {
            children,
            fallback,
            reset_key,
        }) = self.store[wip].pending_props.as_ref().map(|p| p.kind().clone())
        else {
            return None;
        };

        let mut record = match &self.store[wip].state {
            FiberState::Boundary(record) => record.clone(),
            _ => BoundaryRecord::new(),
        };

        if self.store[wip].flags.contains(EffectFlags::DID_CAPTURE) {
            if let Some(err) = self.pass.captured.remove(&wip) {
                record.status = BoundaryStatus::Failed(err);
            }
        } else {
            let queued = record.captured.borrow().back().cloned();
            if let Some(err) = queued {
                record.status = BoundaryStatus::Failed(err);
                let queue = Rc::clone(&record.captured);
                self.pass.retirements.push(Box::new(move || queue.borrow_mut().clear()));
            } else if matches!(record.status, BoundaryStatus::Failed(_)) {
                let previous = current.and_then(|c| reset_key_of(self.store[c].memoized_props.as_ref()));
                if previous != reset_key {
                    if record.try_recover(self.config.max_recovery_attempts) {
                        tracing::debug!(attempt = record.attempts, "reset key changed; retrying children");
                    } else {
                        tracing::warn!(
                            attempts = record.attempts,
                            "error boundary out of recovery attempts; keeping fallback"
                        );
                    }
                }
            }
        }

        let next = match &record.status {
            BoundaryStatus::Failed(err) => vec![fallback(err)],
            _ => children,
        };
        self.store[wip].state = FiberState::Boundary(record);
        self.reconcile_children(wip, next)
    }

    pub(crate) fn complete_error_boundary(&mut self, wip: FiberId) {
        if let FiberState::Boundary(record) = &mut self.store[wip].state {
            if matches!(record.status, BoundaryStatus::Recovering { .. }) {
                record.mark_healthy();
            }
        }
    }
}
