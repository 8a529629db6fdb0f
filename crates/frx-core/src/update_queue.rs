#![forbid(unsafe_code)]

//! Update queues with rebase semantics.
//!
//! Each stateful hook (and each root) owns one [`PendingUpdates`] list shared
//! by both buffers of its fiber, plus one [`BaseState`] per buffer. A render
//! pass for lanes `L` folds the base queue and the not-yet-incorporated
//! pending updates in insertion order:
//!
//! - updates whose lane is in `L` are applied;
//! - the first update outside `L` freezes the *base state* at that point and
//!   every later update, applied or not, is kept in the new base queue.
//!
//! Applied updates that were kept get an empty lane, so any later pass
//! re-applies them on top of the frozen base. Once every lane has been
//! processed the committed state equals plain insertion-order application.
//!
//! Pending updates are only dropped by [`PendingUpdates::retire_through`],
//! called when the pass that incorporated them commits. A discarded pass
//! therefore loses nothing.

use std::fmt;
use std::rc::Rc;

use crate::lane::{Lane, Lanes};

/// How an update changes the state.
pub enum UpdateAction<S> {
    /// Replace the state outright.
    Replace(S),
    /// Compute the next state from the previous one.
    Transform(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> UpdateAction<S> {
    /// Apply to `state`, producing the next state.
    pub fn apply(&self, state: &S) -> S {
        match self {
            Self::Replace(next) => next.clone(),
            Self::Transform(f) => f(state),
        }
    }
}

impl<S: Clone> Clone for UpdateAction<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Replace(next) => Self::Replace(next.clone()),
            Self::Transform(f) => Self::Transform(Rc::clone(f)),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for UpdateAction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace(next) => f.debug_tuple("Replace").field(next).finish(),
            Self::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// One queued state transition.
#[derive(Debug)]
pub struct Update<S> {
    /// Insertion order; strictly increasing per queue, starting at 1.
    pub seq: u64,
    /// Lane the update was scheduled on. Empty once rebased past a skip.
    pub lane: Lane,
    pub action: UpdateAction<S>,
}

impl<S: Clone> Clone for Update<S> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            lane: self.lane,
            action: self.action.clone(),
        }
    }
}

/// Updates not yet folded into a committed base.
#[derive(Debug)]
pub struct PendingUpdates<S> {
    updates: Vec<Update<S>>,
    next_seq: u64,
}

impl<S> Default for PendingUpdates<S> {
    fn default() -> Self {
        Self {
            updates: Vec::new(),
            next_seq: 1,
        }
    }
}

impl<S> PendingUpdates<S> {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an update and return its sequence number.
    pub fn push(&mut self, lane: Lane, action: UpdateAction<S>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.updates.push(Update { seq, lane, action });
        seq
    }

    /// Drop every update with `seq <= through`.
    pub fn retire_through(&mut self, through: u64) -> usize {
        let before = self.updates.len();
        self.updates.retain(|u| u.seq > through);
        before - self.updates.len()
    }

    /// Union of the lanes of all queued updates.
    pub fn pending_lanes(&self) -> Lanes {
        self.updates
            .iter()
            .fold(Lanes::empty(), |acc, u| acc | u.lane)
    }

    /// Updates with `seq > after`, in insertion order.
    pub fn after(&self, after: u64) -> impl Iterator<Item = &Update<S>> {
        self.updates.iter().filter(move |u| u.seq > after)
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Per-buffer base of a queue.
#[derive(Debug)]
pub struct BaseState<S> {
    /// State before the first skipped update.
    pub state: S,
    /// Updates that must be replayed on top of `state`.
    pub queue: Vec<Update<S>>,
    /// Highest sequence number incorporated into `state` or `queue`.
    pub last_seq: u64,
}

impl<S> BaseState<S> {
    /// Fresh base with no history.
    pub fn new(state: S) -> Self {
        Self {
            state,
            queue: Vec::new(),
            last_seq: 0,
        }
    }
}

impl<S: Clone> Clone for BaseState<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            queue: self.queue.clone(),
            last_seq: self.last_seq,
        }
    }
}

/// Result of folding a queue for one render pass.
#[derive(Debug)]
pub struct Processed<S> {
    /// State to render with.
    pub state: S,
    /// Base to store on the work-in-progress buffer.
    pub base: BaseState<S>,
    /// Lanes of the updates that were skipped.
    pub skipped_lanes: Lanes,
    /// Highest pending sequence number incorporated; retire through it on commit.
    pub consumed_through: u64,
}

/// Fold `base` and `pending` for a pass rendering `render_lanes`.
pub fn process_updates<S: Clone>(
    base: &BaseState<S>,
    pending: &PendingUpdates<S>,
    render_lanes: Lanes,
) -> Processed<S> {
    let mut state = base.state.clone();
    let mut frozen: Option<S> = None;
    let mut queue = Vec::new();
    let mut skipped_lanes = Lanes::empty();
    let mut last_seq = base.last_seq;

    for update in base.queue.iter().chain(pending.after(base.last_seq)) {
        last_seq = last_seq.max(update.seq);
        if update.lane.is_subset_of(render_lanes) {
            if frozen.is_some() {
                queue.push(Update {
                    seq: update.seq,
                    lane: Lanes::empty(),
                    action: update.action.clone(),
                });
            }
            state = update.action.apply(&state);
        } else {
            if frozen.is_none() {
                frozen = Some(state.clone());
            }
            skipped_lanes |= update.lane;
            queue.push(update.clone());
        }
    }

    let base_state = match frozen {
        Some(frozen) => frozen,
        None => state.clone(),
    };
    Processed {
        state,
        base: BaseState {
            state: base_state,
            queue,
            last_seq,
        },
        skipped_lanes,
        consumed_through: last_seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(s: &'static str) -> UpdateAction<String> {
        UpdateAction::Transform(Rc::new(move |prev: &String| format!("{prev}{s}")))
    }

    #[test]
    fn applies_in_insertion_order() {
        let mut pending = PendingUpdates::new();
        pending.push(Lanes::DEFAULT, append("a"));
        pending.push(Lanes::DEFAULT, append("b"));
        let base = BaseState::new(String::new());
        let out = process_updates(&base, &pending, Lanes::DEFAULT);
        assert_eq!(out.state, "ab");
        assert!(out.base.queue.is_empty());
        assert!(out.skipped_lanes.is_empty());
        assert_eq!(out.consumed_through, 2);
    }

    #[test]
    fn rebase_keeps_later_updates_after_skip() {
        let mut pending = PendingUpdates::new();
        pending.push(Lanes::SYNC, append("A"));
        pending.push(Lanes::TRANSITION_1, append("b"));
        pending.push(Lanes::SYNC, append("C"));

        let base = BaseState::new(String::new());
        let sync = process_updates(&base, &pending, Lanes::SYNC);
        assert_eq!(sync.state, "AC");
        assert_eq!(sync.base.state, "A");
        assert_eq!(sync.base.queue.len(), 2);
        assert_eq!(sync.skipped_lanes, Lanes::TRANSITION_1);

        // Commit the sync pass.
        pending.retire_through(sync.consumed_through);
        assert!(pending.is_empty());

        let all = process_updates(&sync.base, &pending, Lanes::TRANSITION_1);
        assert_eq!(all.state, "AbC");
        assert!(all.base.queue.is_empty());
    }

    #[test]
    fn discarded_pass_consumes_nothing() {
        let mut pending = PendingUpdates::new();
        pending.push(Lanes::DEFAULT, UpdateAction::Replace(7));
        let base = BaseState::new(0);
        let first = process_updates(&base, &pending, Lanes::DEFAULT);
        let again = process_updates(&base, &pending, Lanes::DEFAULT);
        assert_eq!(first.state, again.state);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn updates_after_consumed_survive_retire() {
        let mut pending = PendingUpdates::new();
        pending.push(Lanes::DEFAULT, UpdateAction::Replace(1));
        let out = process_updates(&BaseState::new(0), &pending, Lanes::DEFAULT);
        pending.push(Lanes::DEFAULT, UpdateAction::Replace(2));
        assert_eq!(pending.retire_through(out.consumed_through), 1);
        assert_eq!(pending.pending_lanes(), Lanes::DEFAULT);
        let next = process_updates(&out.base, &pending, Lanes::DEFAULT);
        assert_eq!(next.state, 2);
    }
}
