//! Per-partition lineage descendant bitmaps.
//!
//! For every lineage id the index keeps the rows assigned to that lineage
//! exactly, plus, per recombinant-following mode, the rows assigned to it
//! or any of its descendants. Maintained incrementally on insert: a row
//! with lineage `v` is added to the descendant bitmap of every ancestor of
//! `v` under each mode.

use crate::common::dictionary::Idx;
use crate::common::lineage::{
    LineageTree, RecombinantFollowingMode, ALL_RECOMBINANT_FOLLOWING_MODES,
};
use roaring::RoaringBitmap;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct LineageIndex {
    excluding_sublineages: HashMap<Idx, RoaringBitmap>,
    do_not_follow: HashMap<Idx, RoaringBitmap>,
    follow_if_contained: HashMap<Idx, RoaringBitmap>,
    always_follow: HashMap<Idx, RoaringBitmap>,
}

impl LineageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn including_for(&self, mode: RecombinantFollowingMode) -> &HashMap<Idx, RoaringBitmap> {
        match mode {
            RecombinantFollowingMode::DoNotFollow => &self.do_not_follow,
            RecombinantFollowingMode::FollowIfFullyContainedInClade => &self.follow_if_contained,
            RecombinantFollowingMode::AlwaysFollow => &self.always_follow,
        }
    }

    fn including_for_mut(
        &mut self,
        mode: RecombinantFollowingMode,
    ) -> &mut HashMap<Idx, RoaringBitmap> {
        match mode {
            RecombinantFollowingMode::DoNotFollow => &mut self.do_not_follow,
            RecombinantFollowingMode::FollowIfFullyContainedInClade => {
                &mut self.follow_if_contained
            }
            RecombinantFollowingMode::AlwaysFollow => &mut self.always_follow,
        }
    }

    /// Record that `row` carries the lineage `value_id` (alias ids allowed).
    pub fn insert(&mut self, tree: &LineageTree, row: u32, value_id: Idx) {
        let canonical = tree.resolve_alias(value_id);
        self.excluding_sublineages
            .entry(canonical)
            .or_default()
            .insert(row);
        for mode in ALL_RECOMBINANT_FOLLOWING_MODES {
            let index = self.including_for_mut(mode);
            for ancestor in tree.ancestors(canonical, mode) {
                index.entry(ancestor).or_default().insert(row);
            }
        }
    }

    /// Rows whose lineage is exactly `value_id`.
    pub fn filter_excluding_sublineages(
        &self,
        tree: &LineageTree,
        value_id: Idx,
    ) -> Option<&RoaringBitmap> {
        self.excluding_sublineages.get(&tree.resolve_alias(value_id))
    }

    /// Rows whose lineage is `value_id` or one of its descendants under the
    /// given recombinant edge policy.
    pub fn filter_including_sublineages(
        &self,
        tree: &LineageTree,
        value_id: Idx,
        mode: RecombinantFollowingMode,
    ) -> Option<&RoaringBitmap> {
        self.including_for(mode).get(&tree.resolve_alias(value_id))
    }

    /// (Internal) raw maps for persistence.
    pub(crate) fn parts(&self) -> [&HashMap<Idx, RoaringBitmap>; 4] {
        [
            &self.excluding_sublineages,
            &self.do_not_follow,
            &self.follow_if_contained,
            &self.always_follow,
        ]
    }

    /// (Internal) rebuild from persisted maps.
    pub(crate) fn from_parts(parts: [HashMap<Idx, RoaringBitmap>; 4]) -> Self {
        let [excluding_sublineages, do_not_follow, follow_if_contained, always_follow] = parts;
        LineageIndex {
            excluding_sublineages,
            do_not_follow,
            follow_if_contained,
            always_follow,
        }
    }
}
