#![forbid(unsafe_code)]

//! Effect list and commit summaries.

use frx_core::{EffectFlags, Lanes};

use crate::element::Key;
use crate::fiber::FiberId;

/// One entry of the effect list built while completing a pass.
///
/// Children precede their parent, siblings keep declaration order, and the
/// deletions of a parent's old children are recorded when the parent's
/// children are reconciled, so they precede every effect of the new
/// children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Effect {
    Commit(FiberId),
    Deletion { parent: FiberId, fiber: FiberId },
}

/// A committed effect, as reported in a [`CommitSummary`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EffectRecord {
    pub fiber: FiberId,
    /// Parent fiber in the committed tree.
    pub parent: Option<FiberId>,
    /// Tag, component name or kind.
    pub label: String,
    pub key: Option<Key>,
    /// Flags at commit time. Empty for deletions.
    pub flags: EffectFlags,
    pub deletion: bool,
}

impl EffectRecord {
    /// Root-independent form used to compare effect lists across roots.
    pub fn signature(&self) -> (String, Option<String>, EffectFlags, bool) {
        (
            self.label.clone(),
            self.key.as_ref().map(|k| k.as_str().to_string()),
            self.flags,
            self.deletion,
        )
    }
}

/// What one commit did.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CommitSummary {
    /// Commit number for this root, starting at 1.
    pub seq: u64,
    pub lanes: Lanes,
    pub effects: Vec<EffectRecord>,
    pub layout_mounts: usize,
    /// Passive cleanups queued by this commit.
    pub passive_unmounts: usize,
    /// Passive mounts queued by this commit.
    pub passive_mounts: usize,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Effects carrying all of `flags`.
    pub fn count(&self, flags: EffectFlags) -> usize {
        self.effects
            .iter()
            .filter(|e| !e.deletion && e.flags.contains(flags))
            .count()
    }

    pub fn placements(&self) -> usize {
        self.count(EffectFlags::PLACEMENT)
    }

    pub fn moves(&self) -> usize {
        self.count(EffectFlags::MOVE)
    }

    pub fn updates(&self) -> usize {
        self.count(EffectFlags::UPDATE)
    }

    pub fn deletions(&self) -> usize {
        self.effects.iter().filter(|e| e.deletion).count()
    }

    /// Labels of the entries carrying `flags`, in commit order.
    pub fn labels_with(&self, flags: EffectFlags) -> Vec<&str> {
        self.effects
            .iter()
            .filter(|e| !e.deletion && e.flags.contains(flags))
            .map(|e| e.label.as_str())
            .collect()
    }
}
