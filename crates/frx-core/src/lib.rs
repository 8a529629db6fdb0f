#![forbid(unsafe_code)]

//! Core data model for the frx reconciler: lanes, effect flags, the
//! generational arena backing the fiber tree, update queues with rebase
//! semantics, and suspend-able async dependencies.
//!
//! Nothing in this crate knows about elements, hosts, or schedulers. The
//! reconciler crate builds those on top.

pub mod arena;
pub mod dependency;
pub mod error;
pub mod flags;
pub mod lane;
pub mod logging;
pub mod update_queue;

#[cfg(feature = "tracing")]
pub use logging::{debug, trace, warn};

pub use arena::{Arena, NodeId};
pub use dependency::{Dependency, DependencyId, DependencyStatus, Resource, WakeListener};
pub use error::{CapturedError, Interrupt, RenderError, RenderResult};
pub use flags::{EffectFlags, HookFlags};
pub use lane::{
    LANE_COUNT, Lane, LaneAllocator, LaneTimeouts, Lanes, RootLanes, SchedulerPriority,
    UpdateTrigger, highest_priority_lanes, lane_to_priority, merge_lanes,
};
pub use update_queue::{BaseState, PendingUpdates, Processed, Update, UpdateAction, process_updates};
