#![forbid(unsafe_code)]

//! Lane priority model.
//!
//! Every pending update is tagged with exactly one *lane*: a single bit in a
//! fixed-width bitset. Lanes with a lower bit index are more urgent. A render
//! pass always works on one *lane group*: either a single lane, or all pending
//! lanes of a batched class (transitions, retries).
//!
//! # Lane layout
//!
//! | Bits    | Lane(s)              | Trigger                              |
//! |---------|----------------------|--------------------------------------|
//! | 0       | `SYNC`               | discrete input (click, key press)    |
//! | 1       | `INPUT_CONTINUOUS`   | continuous input (scroll, pointer)   |
//! | 2       | `DEFAULT`            | timers, network, root renders        |
//! | 3..=10  | `TRANSITION_1..8`    | explicitly deferred updates          |
//! | 11..=14 | `RETRY_1..4`         | re-attempts after a suspension       |
//! | 15      | `IDLE`               | idle work                            |
//! | 16      | `OFFSCREEN`          | hidden subtrees                      |
//!
//! # Starvation
//!
//! Each pending lane carries an expiration timestamp assigned at enqueue
//! time. [`RootLanes::mark_starved_lanes_as_expired`] moves overdue lanes into
//! the expired set, and [`RootLanes::next_lanes`] picks expired lanes right
//! after `SYNC`, even when they are suspended. Expired lanes render without
//! yielding.

use std::fmt;
use std::time::{Duration, Instant};

/// Number of distinct lanes.
pub const LANE_COUNT: usize = 17;

bitflags::bitflags! {
    /// A set of lanes.
    ///
    /// A value with exactly one bit set is a single [`Lane`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Lanes: u32 {
        const SYNC = 1 << 0;
        const INPUT_CONTINUOUS = 1 << 1;
        const DEFAULT = 1 << 2;
        const TRANSITION_1 = 1 << 3;
        const TRANSITION_2 = 1 << 4;
        const TRANSITION_3 = 1 << 5;
        const TRANSITION_4 = 1 << 6;
        const TRANSITION_5 = 1 << 7;
        const TRANSITION_6 = 1 << 8;
        const TRANSITION_7 = 1 << 9;
        const TRANSITION_8 = 1 << 10;
        const RETRY_1 = 1 << 11;
        const RETRY_2 = 1 << 12;
        const RETRY_3 = 1 << 13;
        const RETRY_4 = 1 << 14;
        const IDLE = 1 << 15;
        const OFFSCREEN = 1 << 16;

        const TRANSITIONS = 0b0000_0111_1111_1000;
        const RETRIES = 0b0111_1000_0000_0000;
        const NON_IDLE = 0b0111_1111_1111_1111;
    }
}

/// A single lane (one bit of [`Lanes`]).
pub type Lane = Lanes;

/// Where an update came from. Maps to exactly one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateTrigger {
    /// Discrete user input: clicks, key presses.
    Discrete,
    /// Continuous user input: pointer moves, scrolling.
    Continuous,
    /// Anything without a more specific classification.
    #[default]
    Default,
    /// An explicitly deferred update.
    Transition,
    /// Re-attempt of a suspended subtree.
    Retry,
    /// Work that may wait until nothing else is pending.
    Idle,
    /// Work for hidden subtrees.
    Offscreen,
}

/// Host scheduler priority derived from a lane group.
///
/// Ordered from most to least urgent, so `a < b` means `a` is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SchedulerPriority {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
}

impl SchedulerPriority {
    /// Returns true if `self` must run before `other`.
    #[inline]
    pub fn is_more_urgent_than(self, other: Self) -> bool {
        self < other
    }
}

impl fmt::Display for SchedulerPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::UserBlocking => write!(f, "user_blocking"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

impl Lanes {
    /// Bitwise union.
    #[inline]
    #[must_use]
    pub fn merge(self, other: Lanes) -> Lanes {
        self | other
    }

    /// True if any lane is shared.
    #[inline]
    pub fn intersects_lanes(self, other: Lanes) -> bool {
        !(self & other).is_empty()
    }

    /// True if every lane of `self` is in `set`.
    #[inline]
    pub fn is_subset_of(self, set: Lanes) -> bool {
        (self & set) == self
    }

    /// The single most urgent lane, or empty.
    #[inline]
    #[must_use]
    pub fn highest_priority_lane(self) -> Lane {
        let bits = self.bits();
        Lanes::from_bits_retain(bits & bits.wrapping_neg())
    }

    /// Bit index of a single lane.
    ///
    /// For a multi-lane set this is the index of the most urgent lane.
    #[inline]
    pub fn index(self) -> usize {
        self.bits().trailing_zeros() as usize
    }

    /// Iterate the individual lanes of the set, most urgent first.
    pub fn lanes(self) -> LaneIter {
        LaneIter {
            remaining: self.bits(),
        }
    }

    /// Includes the synchronous lane.
    #[inline]
    pub fn includes_sync(self) -> bool {
        self.contains(Lanes::SYNC)
    }

    /// Includes a lane that must not be time-sliced (sync or continuous input).
    #[inline]
    pub fn includes_blocking(self) -> bool {
        self.intersects(Lanes::SYNC | Lanes::INPUT_CONTINUOUS)
    }

    /// Only transitions, retries, idle or offscreen lanes.
    ///
    /// Passes for these lanes may keep already-visible content on screen
    /// instead of revealing a fallback.
    #[inline]
    pub fn includes_only_non_urgent(self) -> bool {
        !self.is_empty()
            && self.is_subset_of(
                Lanes::TRANSITIONS | Lanes::RETRIES | Lanes::IDLE | Lanes::OFFSCREEN,
            )
    }

    /// Only retry lanes.
    #[inline]
    pub fn includes_only_retries(self) -> bool {
        !self.is_empty() && self.is_subset_of(Lanes::RETRIES)
    }

    /// Short human-readable label of the most urgent lane.
    pub fn label(self) -> &'static str {
        let lane = self.highest_priority_lane();
        if lane.is_empty() {
            "none"
        } else if lane == Lanes::SYNC {
            "sync"
        } else if lane == Lanes::INPUT_CONTINUOUS {
            "input_continuous"
        } else if lane == Lanes::DEFAULT {
            "default"
        } else if lane.intersects(Lanes::TRANSITIONS) {
            "transition"
        } else if lane.intersects(Lanes::RETRIES) {
            "retry"
        } else if lane == Lanes::IDLE {
            "idle"
        } else {
            "offscreen"
        }
    }
}

/// Iterator over single lanes of a [`Lanes`] set.
#[derive(Debug, Clone)]
pub struct LaneIter {
    remaining: u32,
}

impl Iterator for LaneIter {
    type Item = Lane;

    fn next(&mut self) -> Option<Lane> {
        if self.remaining == 0 {
            return None;
        }
        let bit = self.remaining & self.remaining.wrapping_neg();
        self.remaining &= !bit;
        Some(Lanes::from_bits_retain(bit))
    }
}

/// Bitwise union of two lane sets.
#[inline]
pub fn merge_lanes(a: Lanes, b: Lanes) -> Lanes {
    a | b
}

/// The most urgent lane group present in `pending`.
///
/// Lanes of different priority are never returned together. All pending
/// transition lanes form one group, and so do all pending retry lanes.
pub fn highest_priority_lanes(pending: Lanes) -> Lanes {
    let lane = pending.highest_priority_lane();
    if lane.is_empty() {
        return Lanes::empty();
    }
    if lane.intersects(Lanes::TRANSITIONS) {
        pending & Lanes::TRANSITIONS
    } else if lane.intersects(Lanes::RETRIES) {
        pending & Lanes::RETRIES
    } else {
        lane
    }
}

/// Scheduler priority for running a lane group.
pub fn lane_to_priority(lanes: Lanes) -> SchedulerPriority {
    let lane = lanes.highest_priority_lane();
    if lane.is_empty() || lane == Lanes::IDLE || lane == Lanes::OFFSCREEN {
        SchedulerPriority::Idle
    } else if lane == Lanes::SYNC {
        SchedulerPriority::Immediate
    } else if lane == Lanes::INPUT_CONTINUOUS {
        SchedulerPriority::UserBlocking
    } else if lane.intersects(Lanes::RETRIES) {
        SchedulerPriority::Low
    } else {
        SchedulerPriority::Normal
    }
}

/// Round-robin allocator for transition and retry lanes.
///
/// Consecutive transitions land on different lanes so that an older
/// transition is not forced to wait for a newer one to finish.
#[derive(Debug, Clone, Copy)]
pub struct LaneAllocator {
    next_transition: Lanes,
    next_retry: Lanes,
}

impl Default for LaneAllocator {
    fn default() -> Self {
        Self {
            next_transition: Lanes::TRANSITION_1,
            next_retry: Lanes::RETRY_1,
        }
    }
}

impl LaneAllocator {
    /// Create a fresh allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next transition lane.
    pub fn claim_next_transition_lane(&mut self) -> Lane {
        let lane = self.next_transition;
        self.next_transition = rotate_within(lane, Lanes::TRANSITIONS, Lanes::TRANSITION_1);
        lane
    }

    /// Claim the next retry lane.
    pub fn claim_next_retry_lane(&mut self) -> Lane {
        let lane = self.next_retry;
        self.next_retry = rotate_within(lane, Lanes::RETRIES, Lanes::RETRY_1);
        lane
    }

    /// Map a trigger to exactly one lane.
    pub fn request_update_lane(&mut self, trigger: UpdateTrigger) -> Lane {
        match trigger {
            UpdateTrigger::Discrete => Lanes::SYNC,
            UpdateTrigger::Continuous => Lanes::INPUT_CONTINUOUS,
            UpdateTrigger::Default => Lanes::DEFAULT,
            UpdateTrigger::Transition => self.claim_next_transition_lane(),
            UpdateTrigger::Retry => self.claim_next_retry_lane(),
            UpdateTrigger::Idle => Lanes::IDLE,
            UpdateTrigger::Offscreen => Lanes::OFFSCREEN,
        }
    }
}

fn rotate_within(lane: Lane, class: Lanes, first: Lane) -> Lane {
    let next = Lanes::from_bits_retain(lane.bits() << 1);
    if next.is_subset_of(class) && !next.is_empty() {
        next
    } else {
        first
    }
}

/// Per-class expiration timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneTimeouts {
    /// Timeout for `SYNC` and `INPUT_CONTINUOUS`. Default: 250ms.
    pub blocking: Duration,
    /// Timeout for `DEFAULT`. Default: 5000ms.
    pub default: Duration,
    /// Timeout for transition lanes. Default: 5000ms.
    pub transition: Duration,
}

impl Default for LaneTimeouts {
    fn default() -> Self {
        Self {
            blocking: Duration::from_millis(250),
            default: Duration::from_millis(5_000),
            transition: Duration::from_millis(5_000),
        }
    }
}

impl LaneTimeouts {
    /// Expiration timestamp for a lane enqueued at `now`.
    ///
    /// Retry, idle and offscreen lanes never expire.
    pub fn expiration_for(&self, lane: Lane, now: Instant) -> Option<Instant> {
        if lane.intersects(Lanes::SYNC | Lanes::INPUT_CONTINUOUS) {
            Some(now + self.blocking)
        } else if lane == Lanes::DEFAULT {
            Some(now + self.default)
        } else if lane.intersects(Lanes::TRANSITIONS) {
            Some(now + self.transition)
        } else {
            None
        }
    }
}

/// Lane bookkeeping for one root.
#[derive(Debug, Clone, Default)]
pub struct RootLanes {
    /// Lanes with unflushed updates.
    pub pending: Lanes,
    /// Pending lanes whose last attempt suspended.
    pub suspended: Lanes,
    /// Suspended lanes whose dependency has since resolved.
    pub pinged: Lanes,
    /// Lanes that outlived their expiration timestamp.
    pub expired: Lanes,
    expiration: [Option<Instant>; LANE_COUNT],
}

impl RootLanes {
    /// Empty bookkeeping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new update on `lane` enqueued at `event_time`.
    ///
    /// Any new non-idle update unblocks suspended lanes so they get retried
    /// together with the fresh work.
    pub fn mark_updated(&mut self, lane: Lane, event_time: Instant, timeouts: &LaneTimeouts) {
        self.pending |= lane;
        if lane != Lanes::IDLE {
            self.suspended = Lanes::empty();
            self.pinged = Lanes::empty();
        }
        for single in lane.lanes() {
            let slot = &mut self.expiration[single.index()];
            if slot.is_none() {
                *slot = timeouts.expiration_for(single, event_time);
            }
        }
    }

    /// Mark lanes as suspended on an unresolved dependency.
    pub fn mark_suspended(&mut self, lanes: Lanes) {
        self.suspended |= lanes;
        self.pinged &= !lanes;
    }

    /// Forget the expiration timestamps of `lanes`.
    ///
    /// Used when a suspension has no fallback to show: forcing those lanes
    /// would only suspend again.
    pub fn clear_expiration(&mut self, lanes: Lanes) {
        for lane in lanes.lanes() {
            self.expiration[lane.index()] = None;
        }
        self.expired &= !lanes;
    }

    /// A dependency resolved for `lanes`. Only suspended lanes become pinged.
    pub fn mark_pinged(&mut self, lanes: Lanes) -> Lanes {
        let pinged = self.suspended & lanes;
        self.pinged |= pinged;
        pinged
    }

    /// A pass committed; only `remaining` lanes stay pending.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending & !remaining;
        self.pending = remaining;
        self.suspended = Lanes::empty();
        self.pinged = Lanes::empty();
        self.expired &= remaining;
        for lane in no_longer_pending.lanes() {
            self.expiration[lane.index()] = None;
        }
    }

    /// Expiration timestamp of a single lane.
    pub fn expiration_of(&self, lane: Lane) -> Option<Instant> {
        self.expiration[lane.index()]
    }

    /// Earliest expiration among pending lanes.
    pub fn next_expiration(&self) -> Option<Instant> {
        self.pending
            .lanes()
            .filter_map(|lane| self.expiration[lane.index()])
            .min()
    }

    /// Promote overdue lanes to the expired set.
    ///
    /// Lanes without a timestamp get one now, unless they are suspended
    /// and not pinged. Returns the lanes that expired in this call.
    pub fn mark_starved_lanes_as_expired(&mut self, now: Instant, timeouts: &LaneTimeouts) -> Lanes {
        let mut newly_expired = Lanes::empty();
        for lane in self.pending.lanes() {
            let idx = lane.index();
            match self.expiration[idx] {
                None => {
                    if !self.suspended.contains(lane) || self.pinged.contains(lane) {
                        self.expiration[idx] = timeouts.expiration_for(lane, now);
                    }
                }
                Some(deadline) if deadline <= now => {
                    if !self.expired.contains(lane) {
                        newly_expired |= lane;
                    }
                    self.expired |= lane;
                }
                Some(_) => {}
            }
        }
        if !newly_expired.is_empty() {
            crate::debug!(lanes = ?newly_expired, "lanes expired");
        }
        newly_expired
    }

    /// Pick the lanes for the next pass.
    ///
    /// `wip_lanes` are the lanes of a pass already in progress (empty if
    /// none). The in-progress pass is kept unless the candidate is strictly
    /// more urgent or the in-progress lanes were suspended meanwhile.
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        let pending = self.pending;
        if pending.is_empty() {
            return Lanes::empty();
        }

        let next = if pending.contains(Lanes::SYNC) {
            Lanes::SYNC
        } else if pending.intersects(self.expired) {
            highest_priority_lanes(pending & self.expired)
        } else {
            let pick = |class: Lanes| {
                let unblocked = class & !self.suspended;
                if unblocked.is_empty() {
                    highest_priority_lanes(class & self.pinged)
                } else {
                    highest_priority_lanes(unblocked)
                }
            };
            let non_idle = pick(pending & Lanes::NON_IDLE);
            if non_idle.is_empty() {
                pick(pending & !Lanes::NON_IDLE)
            } else {
                non_idle
            }
        };

        if next.is_empty() {
            return Lanes::empty();
        }

        if !wip_lanes.is_empty()
            && wip_lanes != next
            && !wip_lanes.intersects(self.suspended)
            && wip_lanes.intersects(pending)
        {
            let next_lane = next.highest_priority_lane();
            let wip_lane = wip_lanes.highest_priority_lane();
            if next_lane.bits() >= wip_lane.bits() {
                return wip_lanes;
            }
        }
        next
    }

    /// True if the pass for `lanes` must run without yielding.
    pub fn should_render_sync(&self, lanes: Lanes) -> bool {
        lanes.includes_sync() || lanes.intersects(self.expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Instant {
        Instant::now()
    }

    #[test]
    fn triggers_map_to_single_lanes() {
        let mut alloc = LaneAllocator::new();
        assert_eq!(alloc.request_update_lane(UpdateTrigger::Discrete), Lanes::SYNC);
        assert_eq!(
            alloc.request_update_lane(UpdateTrigger::Continuous),
            Lanes::INPUT_CONTINUOUS
        );
        assert_eq!(alloc.request_update_lane(UpdateTrigger::Default), Lanes::DEFAULT);
        for trigger in [
            UpdateTrigger::Transition,
            UpdateTrigger::Retry,
            UpdateTrigger::Idle,
            UpdateTrigger::Offscreen,
        ] {
            let lane = alloc.request_update_lane(trigger);
            assert_eq!(lane.bits().count_ones(), 1, "{trigger:?} -> {lane:?}");
        }
    }

    #[test]
    fn transition_lanes_rotate_and_wrap() {
        let mut alloc = LaneAllocator::new();
        let claimed: Vec<_> = (0..9).map(|_| alloc.claim_next_transition_lane()).collect();
        assert_eq!(claimed[0], Lanes::TRANSITION_1);
        assert_eq!(claimed[7], Lanes::TRANSITION_8);
        assert_eq!(claimed[8], Lanes::TRANSITION_1);
    }

    #[test]
    fn retry_lanes_rotate_and_wrap() {
        let mut alloc = LaneAllocator::new();
        let claimed: Vec<_> = (0..5).map(|_| alloc.claim_next_retry_lane()).collect();
        assert_eq!(claimed[0], Lanes::RETRY_1);
        assert_eq!(claimed[3], Lanes::RETRY_4);
        assert_eq!(claimed[4], Lanes::RETRY_1);
    }

    #[test]
    fn highest_priority_batches_equal_classes_only() {
        let pending = Lanes::TRANSITION_2 | Lanes::TRANSITION_5 | Lanes::RETRY_1;
        assert_eq!(
            highest_priority_lanes(pending),
            Lanes::TRANSITION_2 | Lanes::TRANSITION_5
        );
        let pending = Lanes::DEFAULT | Lanes::TRANSITION_1;
        assert_eq!(highest_priority_lanes(pending), Lanes::DEFAULT);
        assert_eq!(highest_priority_lanes(Lanes::empty()), Lanes::empty());
    }

    #[test]
    fn priority_mapping() {
        assert_eq!(lane_to_priority(Lanes::SYNC), SchedulerPriority::Immediate);
        assert_eq!(
            lane_to_priority(Lanes::INPUT_CONTINUOUS),
            SchedulerPriority::UserBlocking
        );
        assert_eq!(lane_to_priority(Lanes::DEFAULT), SchedulerPriority::Normal);
        assert_eq!(lane_to_priority(Lanes::TRANSITION_3), SchedulerPriority::Normal);
        assert_eq!(lane_to_priority(Lanes::RETRY_2), SchedulerPriority::Low);
        assert_eq!(lane_to_priority(Lanes::IDLE), SchedulerPriority::Idle);
        assert!(SchedulerPriority::Immediate.is_more_urgent_than(SchedulerPriority::Normal));
    }

    #[test]
    fn next_lanes_prefers_sync() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::DEFAULT, now, &timeouts);
        root.mark_updated(Lanes::SYNC, now, &timeouts);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::SYNC);
    }

    #[test]
    fn next_lanes_skips_suspended_until_pinged() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::TRANSITION_1, now, &timeouts);
        root.mark_suspended(Lanes::TRANSITION_1);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::empty());
        assert_eq!(root.mark_pinged(Lanes::TRANSITION_1), Lanes::TRANSITION_1);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::TRANSITION_1);
    }

    #[test]
    fn ping_on_unsuspended_lane_is_noop() {
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::DEFAULT, t0(), &LaneTimeouts::default());
        assert_eq!(root.mark_pinged(Lanes::DEFAULT), Lanes::empty());
        assert!(root.pinged.is_empty());
    }

    #[test]
    fn suspended_lane_is_force_expired_after_timeout() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::TRANSITION_1, now, &timeouts);
        root.mark_suspended(Lanes::TRANSITION_1);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::empty());

        let later = now + Duration::from_secs(6);
        let expired = root.mark_starved_lanes_as_expired(later, &timeouts);
        assert_eq!(expired, Lanes::TRANSITION_1);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::TRANSITION_1);
        assert!(root.should_render_sync(Lanes::TRANSITION_1));
    }

    #[test]
    fn cleared_expiration_does_not_expire() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::TRANSITION_1, now, &timeouts);
        root.mark_suspended(Lanes::TRANSITION_1);
        root.clear_expiration(Lanes::TRANSITION_1);
        let later = now + Duration::from_secs(60);
        assert!(root.mark_starved_lanes_as_expired(later, &timeouts).is_empty());
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::empty());
    }

    #[test]
    fn expired_lanes_beat_more_urgent_non_expired() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::TRANSITION_1, now, &timeouts);
        let later = now + Duration::from_secs(6);
        root.mark_updated(Lanes::DEFAULT, later, &timeouts);
        root.mark_starved_lanes_as_expired(later, &timeouts);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::TRANSITION_1);
    }

    #[test]
    fn in_progress_pass_is_kept_for_equal_or_lower_priority() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::DEFAULT, now, &timeouts);
        root.mark_updated(Lanes::TRANSITION_1, now, &timeouts);
        assert_eq!(root.next_lanes(Lanes::DEFAULT), Lanes::DEFAULT);

        let mut root = RootLanes::new();
        root.mark_updated(Lanes::TRANSITION_1, now, &timeouts);
        root.mark_updated(Lanes::DEFAULT, now, &timeouts);
        assert_eq!(root.next_lanes(Lanes::TRANSITION_1), Lanes::DEFAULT);
    }

    #[test]
    fn idle_lanes_only_when_nothing_else() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::IDLE, now, &timeouts);
        root.mark_updated(Lanes::RETRY_1, now, &timeouts);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::RETRY_1);
        root.mark_finished(Lanes::IDLE);
        assert_eq!(root.next_lanes(Lanes::empty()), Lanes::IDLE);
    }

    #[test]
    fn mark_finished_clears_expirations() {
        let now = t0();
        let timeouts = LaneTimeouts::default();
        let mut root = RootLanes::new();
        root.mark_updated(Lanes::DEFAULT, now, &timeouts);
        assert!(root.expiration_of(Lanes::DEFAULT).is_some());
        root.mark_finished(Lanes::empty());
        assert!(root.expiration_of(Lanes::DEFAULT).is_none());
        assert!(root.pending.is_empty());
        assert_eq!(root.next_expiration(), None);
    }

    #[test]
    fn lane_iter_yields_single_bits_in_order() {
        let set = Lanes::SYNC | Lanes::DEFAULT | Lanes::IDLE;
        let lanes: Vec<_> = set.lanes().collect();
        assert_eq!(lanes, vec![Lanes::SYNC, Lanes::DEFAULT, Lanes::IDLE]);
    }

    #[test]
    fn non_urgent_classification() {
        assert!(Lanes::TRANSITION_1.includes_only_non_urgent());
        assert!((Lanes::RETRY_1 | Lanes::TRANSITION_2).includes_only_non_urgent());
        assert!(!(Lanes::DEFAULT | Lanes::TRANSITION_2).includes_only_non_urgent());
        assert!(!Lanes::empty().includes_only_non_urgent());
        assert!(Lanes::RETRY_3.includes_only_retries());
    }
}
