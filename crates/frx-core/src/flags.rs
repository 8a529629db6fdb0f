#![forbid(unsafe_code)]

//! Effect flag sets carried by fibers and hook effects.

bitflags::bitflags! {
    /// Side effects a fiber needs during commit, plus render-phase markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct EffectFlags: u32 {
        /// Newly created; host nodes must be inserted.
        const PLACEMENT = 1 << 0;
        /// Reused, but its position among siblings changed.
        const MOVE = 1 << 1;
        /// Attributes, text, or layout effects changed.
        const UPDATE = 1 << 2;
        /// One or more children were deleted.
        const CHILD_DELETION = 1 << 3;
        /// Ref must be detached and re-attached.
        const REF = 1 << 4;
        /// Has layout effects to run.
        const LAYOUT_EFFECT = 1 << 5;
        /// Has passive effects to run.
        const PASSIVE_EFFECT = 1 << 6;
        /// Offscreen visibility toggled.
        const VISIBILITY = 1 << 7;
        /// A descendant threw and this boundary will handle it.
        const SHOULD_CAPTURE = 1 << 8;
        /// This boundary re-rendered after capturing.
        const DID_CAPTURE = 1 << 9;
        /// Unwound without completing.
        const INCOMPLETE = 1 << 10;
        /// Suspense boundary has dependencies to retry on at commit.
        const RETRY = 1 << 11;

        /// Flags handled during the mutation sub-phase.
        const MUTATION = Self::PLACEMENT.bits()
            | Self::MOVE.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::REF.bits()
            | Self::VISIBILITY.bits()
            | Self::LAYOUT_EFFECT.bits();
        /// Flags handled during the layout sub-phase.
        const LAYOUT = Self::LAYOUT_EFFECT.bits() | Self::REF.bits() | Self::RETRY.bits();
        /// Flags handled by the deferred passive flush.
        const PASSIVE = Self::PASSIVE_EFFECT.bits() | Self::CHILD_DELETION.bits();
        /// Any flag that puts a fiber on the effect list.
        const COMMIT = Self::MUTATION.bits() | Self::LAYOUT.bits() | Self::PASSIVE.bits();
    }
}

impl EffectFlags {
    /// Placement or move: host nodes must be (re)inserted.
    #[inline]
    pub fn needs_insertion(self) -> bool {
        self.intersects(Self::PLACEMENT | Self::MOVE)
    }

    /// True if the fiber belongs on the effect list.
    #[inline]
    pub fn has_commit_work(self) -> bool {
        self.intersects(Self::COMMIT)
    }
}

bitflags::bitflags! {
    /// Per-hook effect tags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct HookFlags: u8 {
        /// Dependencies changed (or none were given): the effect must fire.
        const HAS_EFFECT = 1 << 0;
        /// Runs synchronously after mutation.
        const LAYOUT = 1 << 1;
        /// Runs in the deferred passive flush.
        const PASSIVE = 1 << 2;
    }
}
