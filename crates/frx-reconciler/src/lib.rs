#![forbid(unsafe_code)]

//! Incremental, interruptible tree reconciler.
//!
//! Components describe a tree of [`Element`]s. A [`Root`] diffs each new
//! tree against the committed one in a render phase that can yield, be
//! interrupted by more urgent work, or suspend on a [`Dependency`], and then
//! applies the resulting mutations to a [`HostConfig`] in one synchronous
//! commit.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use frx_reconciler::{HeadlessHost, ManualScheduler, RootOptions, create_root, h};
//!
//! let host = HeadlessHost::new();
//! let container = host.root_container();
//! let scheduler = Rc::new(ManualScheduler::new());
//! let mut root = create_root(host, container, scheduler, RootOptions::default());
//!
//! root.render(h("p").child("hello"));
//! root.flush_all().unwrap();
//! assert_eq!(root.host().markup(container), "<p>hello</p>");
//! ```
//!
//! # Phases
//!
//! | Phase | Interruptible | Touches host |
//! |-------|---------------|--------------|
//! | render (begin/complete) | yes | no |
//! | commit: mutation | no | yes |
//! | commit: layout | no | refs only |
//! | passive effects | deferred | no |

mod begin;
mod boundary;
mod child_diff;
mod commit;
mod complete;
pub mod config;
pub mod context;
pub mod effects;
pub mod element;
pub mod error;
mod fiber;
pub mod headless;
pub mod hooks;
pub mod host;
mod mailbox;
pub mod root;
pub mod scheduler;
mod suspense;
mod throw;
pub mod trace;
mod work_loop;

pub use config::ReconcilerConfig;
pub use context::{Context, ContextId};
pub use effects::{CommitSummary, EffectRecord};
pub use element::{
    AttrChange, Attrs, BoundaryFallback, Component, ComponentType, Element, ElementKind,
    HostBuilder, Key, PortalId, PropValue, RenderOutput, UpdatePayload, error_boundary,
    error_boundary_with_reset, fragment, h, portal, suspense, text,
};
pub use error::{HostError, ReconcileError};
pub use fiber::FiberId;
pub use headless::{ContainerId, HeadlessHost, HostOp, NodeHandle, Parent};
pub use hooks::{Cleanup, Dispatch, Hooks, IntoEffectResult, SetState};
pub use host::{HostConfig, NodeRef};
pub use root::{Root, RootOptions, RootPhase, RootStats, UncaughtErrorHandler, create_root};
pub use scheduler::{
    ManualScheduler, RootId, ScheduledRoot, TaskId, TaskScheduler, WorkBudget, WorkStatus,
};
pub use trace::{ReconcileEvent, ReconcileTrace, TraceCategories, TraceConfig, TraceEntry};

pub use frx_core::{
    CapturedError, Dependency, DependencyId, DependencyStatus, EffectFlags, Interrupt, Lane,
    LaneTimeouts, Lanes, RenderError, RenderResult, Resource, SchedulerPriority, UpdateTrigger,
};
