//! Aligned sequence store.
//!
//! For every position of the reference and every alphabet symbol the store
//! keeps the bitmap of rows carrying that symbol there. With
//! reference-implicit encoding (the default at ingest) rows that match the
//! reference symbol are omitted from all bitmaps and reconstructed as the
//! complement when queried; this keeps the dominant symbol of every
//! position out of memory. Filters never assume either encoding.

use crate::common::bitmap::{self, CopyOnWriteBitmap};
use crate::common::symbols::{parse_sequence, Alphabet};
use crate::error::{AppendError, AppendResult};
use roaring::RoaringBitmap;
use std::borrow::Cow;

#[derive(Debug, Clone, Default)]
pub struct PositionBitmaps {
    bitmaps: Vec<RoaringBitmap>,
}

#[derive(Debug)]
pub struct SequenceColumnPartition<A: Alphabet> {
    column_name: String,
    reference: Vec<A::Symbol>,
    positions: Vec<PositionBitmaps>,
    null_bitmap: RoaringBitmap,
    row_count: u32,
    reference_implicit: bool,
}

impl<A: Alphabet> SequenceColumnPartition<A> {
    pub fn new(
        column_name: impl Into<String>,
        reference: Vec<A::Symbol>,
        reference_implicit: bool,
    ) -> Self {
        let positions = reference
            .iter()
            .map(|_| PositionBitmaps {
                bitmaps: vec![RoaringBitmap::new(); A::COUNT],
            })
            .collect();
        SequenceColumnPartition {
            column_name: column_name.into(),
            reference,
            positions,
            null_bitmap: RoaringBitmap::new(),
            row_count: 0,
            reference_implicit,
        }
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn reference_length(&self) -> usize {
        self.reference.len()
    }

    pub fn reference(&self) -> &[A::Symbol] {
        &self.reference
    }

    pub fn reference_symbol(&self, position: usize) -> A::Symbol {
        self.reference[position]
    }

    pub fn len(&self) -> usize {
        self.row_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn is_reference_implicit(&self) -> bool {
        self.reference_implicit
    }

    /// Check an aligned sequence without touching any state.
    pub fn validate(&self, sequence: &str) -> AppendResult<()> {
        self.parse(sequence).map(|_| ())
    }

    fn parse(&self, sequence: &str) -> AppendResult<Vec<A::Symbol>> {
        if sequence.len() != self.reference.len() {
            return Err(AppendError::BadLength {
                sequence_name: self.column_name.clone(),
                expected: self.reference.len(),
                actual: sequence.len(),
            });
        }
        parse_sequence::<A>(sequence).map_err(|(symbol, position)| AppendError::IllegalSymbol {
            sequence_name: self.column_name.clone(),
            symbol,
            position,
        })
    }

    /// Append one aligned sequence. The whole string is validated before
    /// any bitmap is touched, so a failure leaves the partition unchanged.
    pub fn insert(&mut self, sequence: &str) -> AppendResult<()> {
        let symbols = self.parse(sequence)?;

        let row = self.row_count;
        for (position, &symbol) in symbols.iter().enumerate() {
            if self.reference_implicit && symbol == self.reference[position] {
                continue;
            }
            self.positions[position].bitmaps[A::index_of(symbol)].insert(row);
        }
        self.row_count += 1;
        Ok(())
    }

    /// Append a row with no sequence. The row lands in the null set and in
    /// no per-symbol bitmap.
    pub fn insert_null(&mut self) {
        self.null_bitmap.insert(self.row_count);
        self.row_count += 1;
    }

    pub fn reserve(&mut self, _additional: usize) {}

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    /// The bitmap physically stored for `(position, symbol)`. Under
    /// reference-implicit encoding the reference symbol's stored bitmap is
    /// empty; use [`Self::symbol_bitmap`] for the true row set.
    pub fn stored_bitmap(&self, position: usize, symbol: A::Symbol) -> &RoaringBitmap {
        &self.positions[position].bitmaps[A::index_of(symbol)]
    }

    /// Rows whose aligned sequence has `symbol` at `position`.
    pub fn symbol_bitmap(&self, position: usize, symbol: A::Symbol) -> CopyOnWriteBitmap<'_> {
        if self.reference_implicit && symbol == self.reference[position] {
            let stored: Vec<&RoaringBitmap> = self.positions[position]
                .bitmaps
                .iter()
                .chain(std::iter::once(&self.null_bitmap))
                .collect();
            Cow::Owned(bitmap::complement(
                &bitmap::fast_union(&stored),
                self.row_count,
            ))
        } else {
            Cow::Borrowed(self.stored_bitmap(position, symbol))
        }
    }

    /// Rows that *may* carry `symbol` at `position`: the union of the
    /// bitmaps of every symbol in its ambiguity expansion.
    pub fn ambiguous_bitmap(&self, position: usize, symbol: A::Symbol) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        for &candidate in A::ambiguity_expansion(symbol) {
            result |= self.symbol_bitmap(position, candidate).as_ref();
        }
        result
    }

    /// Read back the symbol of a row, resolving the implicit reference.
    pub fn symbol_at(&self, position: usize, row: u32) -> Option<A::Symbol> {
        if self.null_bitmap.contains(row) {
            return None;
        }
        for (index, stored) in self.positions[position].bitmaps.iter().enumerate() {
            if stored.contains(row) {
                return Some(A::from_index(index));
            }
        }
        self.reference_implicit
            .then(|| self.reference[position])
    }

    /// Serialized size of all position bitmaps, for the info report.
    pub fn size_in_bytes(&self) -> usize {
        self.positions
            .iter()
            .flat_map(|position| position.bitmaps.iter())
            .map(RoaringBitmap::serialized_size)
            .sum()
    }

    /// (Internal) stored bitmaps of one position, for persistence.
    pub(crate) fn position_bitmaps(&self, position: usize) -> &[RoaringBitmap] {
        &self.positions[position].bitmaps
    }

    pub(crate) fn from_parts(
        column_name: String,
        reference: Vec<A::Symbol>,
        positions: Vec<Vec<RoaringBitmap>>,
        null_bitmap: RoaringBitmap,
        row_count: u32,
        reference_implicit: bool,
    ) -> Self {
        SequenceColumnPartition {
            column_name,
            reference,
            positions: positions
                .into_iter()
                .map(|bitmaps| PositionBitmaps { bitmaps })
                .collect(),
            null_bitmap,
            row_count,
            reference_implicit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bitmap;
    use crate::common::symbols::{NucSymbol, Nucleotide};

    fn store(reference_implicit: bool) -> SequenceColumnPartition<Nucleotide> {
        let reference = parse_sequence::<Nucleotide>("ACGT").unwrap();
        let mut store = SequenceColumnPartition::new("main", reference, reference_implicit);
        store.insert("ACGT").unwrap();
        store.insert("AAGT").unwrap();
        store.insert("ACCT").unwrap();
        store.insert_null();
        store
    }

    #[test]
    fn symbol_bitmaps_agree_between_encodings() {
        let implicit = store(true);
        let explicit = store(false);
        for position in 0..4 {
            for &symbol in Nucleotide::symbols() {
                assert_eq!(
                    implicit.symbol_bitmap(position, symbol).as_ref(),
                    explicit.symbol_bitmap(position, symbol).as_ref(),
                    "position {position}, symbol {symbol:?}"
                );
            }
        }
    }

    #[test]
    fn reference_rows_are_reconstructed() {
        let store = store(true);
        // Position 1: reference C; rows 0 and 2 carry C, row 1 carries A.
        assert_eq!(
            store.symbol_bitmap(1, NucSymbol::C).into_owned(),
            bitmap::of([0, 2])
        );
        assert_eq!(
            store.symbol_bitmap(1, NucSymbol::A).into_owned(),
            bitmap::of([1])
        );
    }

    #[test]
    fn every_row_has_exactly_one_symbol_per_position() {
        for encoding in [true, false] {
            let store = store(encoding);
            for position in 0..4 {
                for row in 0..3 {
                    let count = Nucleotide::symbols()
                        .iter()
                        .filter(|&&symbol| store.symbol_bitmap(position, symbol).contains(row))
                        .count();
                    assert_eq!(count, 1, "row {row}, position {position}");
                }
                // The null row is in no symbol bitmap.
                assert!(Nucleotide::symbols()
                    .iter()
                    .all(|&symbol| !store.symbol_bitmap(position, symbol).contains(3)));
            }
        }
    }

    #[test]
    fn ambiguous_bitmap_is_the_union_of_the_expansion() {
        let store = store(true);
        for position in 0..4 {
            for &symbol in Nucleotide::symbols() {
                let expansion: Vec<RoaringBitmap> = Nucleotide::ambiguity_expansion(symbol)
                    .iter()
                    .map(|&candidate| store.symbol_bitmap(position, candidate).into_owned())
                    .collect();
                let refs: Vec<&RoaringBitmap> = expansion.iter().collect();
                assert_eq!(
                    store.ambiguous_bitmap(position, symbol),
                    bitmap::fast_union(&refs)
                );
            }
        }
    }

    #[test]
    fn bad_length_leaves_the_partition_untouched() {
        let mut store = store(true);
        let before = store.len();
        let error = store.insert("ACG").unwrap_err();
        assert!(matches!(error, AppendError::BadLength { expected: 4, actual: 3, .. }));
        assert_eq!(store.len(), before);
    }

    #[test]
    fn illegal_symbol_reports_its_position() {
        let mut store = store(true);
        let error = store.insert("AC?T").unwrap_err();
        match error {
            AppendError::IllegalSymbol {
                symbol, position, ..
            } => {
                assert_eq!(symbol, '?');
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error {other}"),
        }
        // No partial bitmap writes happened.
        assert_eq!(store.len(), 4);
        assert_eq!(
            store.symbol_bitmap(0, NucSymbol::A).into_owned(),
            bitmap::of([0, 1, 2])
        );
    }

    #[test]
    fn symbols_read_back_through_the_implicit_encoding() {
        let store = store(true);
        assert_eq!(store.symbol_at(1, 0), Some(NucSymbol::C));
        assert_eq!(store.symbol_at(1, 1), Some(NucSymbol::A));
        assert_eq!(store.symbol_at(1, 3), None);
    }
}
