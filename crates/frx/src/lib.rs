#![forbid(unsafe_code)]

//! frx public facade crate.
//!
//! Re-exports the reconciler surface and offers a prelude for writing
//! components and driving roots.
//!
//! ```
//! use frx::prelude::*;
//!
//! let counter = Component::new("Counter", |hooks: &mut Hooks<'_>, start: &i32| {
//!     let (n, _set) = hooks.use_state(|| *start);
//!     Ok(Some(h("span").child(n.to_string()).build()))
//! });
//!
//! let mut app = frx::headless(RootOptions::default());
//! app.root.render(counter.element(3));
//! app.root.flush_all()?;
//! assert_eq!(app.markup(), "<span>3</span>");
//! # Ok::<(), frx::Error>(())
//! ```

use std::rc::Rc;

// --- Core re-exports -------------------------------------------------------

pub use frx_core::{
    CapturedError, Dependency, DependencyId, DependencyStatus, EffectFlags, Interrupt, Lane,
    LaneTimeouts, Lanes, RenderError, RenderResult, Resource, SchedulerPriority, UpdateTrigger,
};

// --- Reconciler re-exports -------------------------------------------------

pub use frx_reconciler::{
    Cleanup, CommitSummary, Component, ComponentType, ContainerId, Context, Dispatch, EffectRecord,
    Element, HeadlessHost, HostConfig, HostError, HostOp, Hooks, ManualScheduler, NodeHandle,
    NodeRef, PortalId, ReconcileTrace, ReconcilerConfig, Root, RootOptions, RootPhase, RootStats,
    ScheduledRoot, SetState, TaskScheduler, TraceConfig, WorkBudget, WorkStatus, create_root,
    error_boundary, error_boundary_with_reset, fragment, h, portal, suspense, text,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for frx roots.
pub type Error = frx_reconciler::ReconcileError;

/// Standard result type for frx APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Headless harness -----------------------------------------------------

/// A root on the in-memory host, driven by a manual scheduler.
pub struct Headless {
    pub root: Root<HeadlessHost>,
    pub scheduler: Rc<ManualScheduler>,
    pub container: ContainerId,
}

impl Headless {
    /// Markup of the visible tree.
    pub fn markup(&self) -> String {
        self.root.host().markup(self.container)
    }

    /// Run every task the scheduler has for this root.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        let scheduler = Rc::clone(&self.scheduler);
        let mut roots: [&mut dyn ScheduledRoot; 1] = [&mut self.root];
        scheduler.run_until_idle(&mut roots)
    }
}

/// Create a root on a fresh [`HeadlessHost`].
pub fn headless(options: RootOptions) -> Headless {
    let host = HeadlessHost::new();
    let container = host.root_container();
    let scheduler = Rc::new(ManualScheduler::new());
    let root = create_root(host, container, scheduler.clone(), options);
    Headless {
        root,
        scheduler,
        container,
    }
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Cleanup, Component, Context, Element, Error, Hooks, NodeRef, Resource, Result, Root,
        RootOptions, SetState, UpdateTrigger, WorkBudget, WorkStatus, error_boundary, fragment,
        h, portal, suspense, text,
    };

    pub use crate::{core, reconciler};
}

pub use frx_core as core;
pub use frx_reconciler as reconciler;
