//! Bitmap primitive: compressed row-id sets with Boolean algebra.
//!
//! Every index in the engine hands out `&RoaringBitmap` borrows; query
//! evaluation must never mutate them. `CopyOnWriteBitmap` keeps results
//! borrowed for as long as possible and only clones when an operator
//! actually needs to write.

use roaring::RoaringBitmap;
use std::borrow::Cow;

/// A bitmap that is either borrowed from an index or owned by the evaluation.
///
/// Cloning the underlying bitmap is deferred until the first mutation.
pub type CopyOnWriteBitmap<'a> = Cow<'a, RoaringBitmap>;

/// Union of many bitmaps.
///
/// Folds smallest-first so intermediate results stay small while the
/// compressed containers are merged.
pub fn fast_union(bitmaps: &[&RoaringBitmap]) -> RoaringBitmap {
    let mut sorted: Vec<&RoaringBitmap> = bitmaps.to_vec();
    sorted.sort_unstable_by_key(|bitmap| bitmap.len());
    let mut result = RoaringBitmap::new();
    for bitmap in sorted {
        result |= bitmap;
    }
    result
}

/// Cardinality of the intersection without materializing it.
pub fn and_cardinality(left: &RoaringBitmap, right: &RoaringBitmap) -> u64 {
    left.intersection_len(right)
}

/// Complement of `bitmap` within the universe `[0, universe_size)`.
pub fn complement(bitmap: &RoaringBitmap, universe_size: u32) -> RoaringBitmap {
    let mut result = RoaringBitmap::new();
    if universe_size > 0 {
        result.insert_range(0..universe_size);
        result -= bitmap;
    }
    result
}

/// A shared empty bitmap, for indexes that must hand out a borrow for
/// "known value, zero rows here".
pub fn empty() -> &'static RoaringBitmap {
    static EMPTY: std::sync::OnceLock<RoaringBitmap> = std::sync::OnceLock::new();
    EMPTY.get_or_init(RoaringBitmap::new)
}

/// The full universe `[0, n)` as a bitmap.
pub fn full(universe_size: u32) -> RoaringBitmap {
    let mut result = RoaringBitmap::new();
    if universe_size > 0 {
        result.insert_range(0..universe_size);
    }
    result
}

/// Builds a bitmap from an iterator of row ids. Test helper above all.
pub fn of(rows: impl IntoIterator<Item = u32>) -> RoaringBitmap {
    rows.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_union_of_nothing_is_empty() {
        assert!(fast_union(&[]).is_empty());
    }

    #[test]
    fn fast_union_merges_all_inputs() {
        let a = of([1, 2, 3]);
        let b = of([3, 4]);
        let c = of([100_000]);
        let result = fast_union(&[&a, &b, &c]);
        assert_eq!(result, of([1, 2, 3, 4, 100_000]));
    }

    #[test]
    fn and_cardinality_counts_without_materializing() {
        let a = of([1, 2, 3, 10]);
        let b = of([2, 10, 11]);
        assert_eq!(and_cardinality(&a, &b), 2);
        assert_eq!(and_cardinality(&a, &b), (&a & &b).len());
    }

    #[test]
    fn complement_respects_universe() {
        let a = of([0, 2]);
        assert_eq!(complement(&a, 4), of([1, 3]));
        assert_eq!(complement(&a, 0), RoaringBitmap::new());
    }

    #[test]
    fn complement_twice_is_identity() {
        let a = of([5, 17, 900]);
        assert_eq!(complement(&complement(&a, 1000), 1000), a);
    }

    #[test]
    fn cow_bitmap_defers_cloning() {
        let a = of([1, 2, 3]);
        let borrowed: CopyOnWriteBitmap = Cow::Borrowed(&a);
        // Reading does not clone.
        assert_eq!(borrowed.len(), 3);
        // Writing does.
        let mut owned = borrowed;
        owned.to_mut().insert(4);
        assert_eq!(owned.len(), 4);
        assert_eq!(a.len(), 3);
    }
}
