//! Insertion columns and the insertion n-gram index.
//!
//! An insertion cell is a comma-separated list of `pos:TEXT` (or
//! `seq:pos:TEXT`) entries. Per `(sequence_name, position)` the column
//! keeps an exact multi-map `inserted text -> rows` plus, after
//! `build_insertion_indexes`, a trigram posting list over the inserted
//! texts. A pattern search intersects the posting lists of the pattern's
//! literal trigrams to get candidates and verifies each surviving text
//! with the compiled pattern.

use crate::common::dictionary::{Dictionary, Idx};
use crate::common::pattern::SearchPattern;
use crate::common::symbols::Alphabet;
use crate::error::{AppendError, AppendResult};
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

/// Trigram length of the posting lists.
pub const NGRAM_LENGTH: usize = 3;

#[derive(Debug, Default)]
struct PositionIndex {
    insertions: BTreeMap<String, RoaringBitmap>,
    any_insertion: RoaringBitmap,
    trigrams: HashMap<[u8; NGRAM_LENGTH], RoaringBitmap>,
    built: bool,
}

impl PositionIndex {
    fn add(&mut self, text: &str, row: u32) {
        self.insertions.entry(text.to_string()).or_default().insert(row);
        self.any_insertion.insert(row);
    }

    fn build(&mut self) {
        self.trigrams.clear();
        for (text, rows) in &self.insertions {
            let bytes = text.as_bytes();
            if bytes.len() < NGRAM_LENGTH {
                continue;
            }
            for window in bytes.windows(NGRAM_LENGTH) {
                let key: [u8; NGRAM_LENGTH] = window.try_into().unwrap();
                *self.trigrams.entry(key).or_default() |= rows;
            }
        }
        self.built = true;
    }

    fn search(&self, pattern: &SearchPattern) -> RoaringBitmap {
        let trigrams = pattern.ngrams(NGRAM_LENGTH);
        let candidates: RoaringBitmap = if self.built && !trigrams.is_empty() {
            let mut postings: Vec<&RoaringBitmap> = Vec::with_capacity(trigrams.len());
            for trigram in trigrams {
                let key: [u8; NGRAM_LENGTH] = trigram.as_bytes().try_into().unwrap();
                match self.trigrams.get(&key) {
                    Some(rows) => postings.push(rows),
                    None => return RoaringBitmap::new(),
                }
            }
            postings.sort_unstable_by_key(|rows| rows.len());
            let mut intersection = postings[0].clone();
            for rows in &postings[1..] {
                intersection &= *rows;
                if intersection.is_empty() {
                    return RoaringBitmap::new();
                }
            }
            intersection
        } else {
            self.any_insertion.clone()
        };
        if candidates.is_empty() {
            return RoaringBitmap::new();
        }

        let mut result = RoaringBitmap::new();
        for (text, rows) in &self.insertions {
            if rows.is_disjoint(&candidates) {
                continue;
            }
            if pattern.matches(text) {
                result |= rows;
            }
        }
        result
    }
}

/// All insertion positions of one sequence within one partition.
#[derive(Debug)]
pub struct InsertionIndex<A: Alphabet> {
    positions: BTreeMap<u32, PositionIndex>,
    _alphabet: PhantomData<A>,
}

impl<A: Alphabet> Default for InsertionIndex<A> {
    fn default() -> Self {
        InsertionIndex {
            positions: BTreeMap::new(),
            _alphabet: PhantomData,
        }
    }
}

impl<A: Alphabet> InsertionIndex<A> {
    /// Record an insertion; the trigram index is deferred to [`Self::build`].
    pub fn add_lazily(&mut self, position: u32, text: &str, row: u32) {
        self.positions.entry(position).or_default().add(text, row);
    }

    pub fn build(&mut self) {
        for index in self.positions.values_mut() {
            index.build();
        }
    }

    /// Rows with an insertion at `position` matching `pattern`.
    pub fn search(&self, position: u32, pattern: &SearchPattern) -> RoaringBitmap {
        self.positions
            .get(&position)
            .map(|index| index.search(pattern))
            .unwrap_or_default()
    }

    pub(crate) fn parts(&self) -> Vec<(u32, Vec<(&str, &RoaringBitmap)>)> {
        self.positions
            .iter()
            .map(|(&position, index)| {
                (
                    position,
                    index
                        .insertions
                        .iter()
                        .map(|(text, rows)| (text.as_str(), rows))
                        .collect(),
                )
            })
            .collect()
    }

    pub(crate) fn from_parts(parts: Vec<(u32, Vec<(String, RoaringBitmap)>)>) -> Self {
        let mut result = Self::default();
        for (position, insertions) in parts {
            let index = result.positions.entry(position).or_default();
            for (text, rows) in insertions {
                index.any_insertion |= &rows;
                index.insertions.insert(text, rows);
            }
            index.build();
        }
        result
    }
}

/// One parsed `pos:TEXT` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InsertionEntry {
    sequence_name: String,
    position: u32,
    text: String,
}

fn parse_entry<A: Alphabet>(
    entry: &str,
    default_sequence_name: Option<&str>,
) -> AppendResult<InsertionEntry> {
    let bad = || AppendError::JsonShape(format!("invalid insertion entry '{entry}'"));
    let fields: Vec<&str> = entry.split(':').collect();
    let (sequence_name, position_text, text) = match fields.as_slice() {
        [position, text] => {
            let sequence_name = default_sequence_name.ok_or_else(|| {
                AppendError::JsonShape(format!(
                    "insertion entry '{entry}' names no sequence and the column has no default"
                ))
            })?;
            (sequence_name, *position, *text)
        }
        [sequence_name, position, text] => (*sequence_name, *position, *text),
        _ => return Err(bad()),
    };
    let position: u32 = position_text.parse().map_err(|_| bad())?;
    if text.is_empty() || !text.chars().all(|c| A::from_char(c).is_some()) {
        return Err(bad());
    }
    Ok(InsertionEntry {
        sequence_name: sequence_name.to_string(),
        position,
        text: text.to_ascii_uppercase(),
    })
}

/// One partition of an insertion column.
///
/// The standardized cell text is interned in a column-wide dictionary so
/// read-back is cheap across partitions.
#[derive(Debug)]
pub struct InsertionColumnPartition<A: Alphabet> {
    column_name: String,
    default_sequence_name: Option<String>,
    lookup: Arc<RwLock<Dictionary>>,
    values: Vec<Idx>,
    indexes: HashMap<String, InsertionIndex<A>>,
    null_bitmap: RoaringBitmap,
}

impl<A: Alphabet> InsertionColumnPartition<A> {
    pub fn new(
        column_name: impl Into<String>,
        default_sequence_name: Option<String>,
        lookup: Arc<RwLock<Dictionary>>,
    ) -> Self {
        InsertionColumnPartition {
            column_name: column_name.into(),
            default_sequence_name,
            lookup,
            values: Vec::new(),
            indexes: HashMap::new(),
            null_bitmap: RoaringBitmap::new(),
        }
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    fn parse_cell(&self, value: &str) -> AppendResult<Vec<InsertionEntry>> {
        value
            .split(',')
            .map(|entry| parse_entry::<A>(entry.trim(), self.default_sequence_name.as_deref()))
            .collect()
    }

    /// Check a cell without touching any state.
    pub fn validate(&self, value: &str) -> AppendResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        self.parse_cell(value).map(|_| ())
    }

    /// Append one cell: a comma-separated list of insertion entries.
    /// An empty cell is a null. The cell is parsed in full before any
    /// index is touched.
    pub fn insert(&mut self, value: &str) -> AppendResult<()> {
        if value.is_empty() {
            self.insert_null();
            return Ok(());
        }
        let entries = self.parse_cell(value)?;

        let row = self.values.len() as u32;
        let mut standardized = String::new();
        for entry in &entries {
            self.indexes
                .entry(entry.sequence_name.clone())
                .or_default()
                .add_lazily(entry.position, &entry.text, row);
            if !standardized.is_empty() {
                standardized.push(',');
            }
            if self.default_sequence_name.as_deref() == Some(entry.sequence_name.as_str()) {
                standardized.push_str(&format!("{}:{}", entry.position, entry.text));
            } else {
                standardized.push_str(&format!(
                    "{}:{}:{}",
                    entry.sequence_name, entry.position, entry.text
                ));
            }
        }
        let value_id = self.lookup.write().get_or_create_id(&standardized);
        self.values.push(value_id);
        Ok(())
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        let value_id = self.lookup.write().get_or_create_id("");
        self.values.push(value_id);
        self.null_bitmap.insert(row);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.null_bitmap.contains(row)
    }

    pub fn value(&self, row: u32) -> Option<String> {
        if self.is_null(row) {
            return None;
        }
        Some(
            self.lookup
                .read()
                .value_of(self.values[row as usize])
                .to_string(),
        )
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    /// Build the trigram posting lists of every index. Called at finalize.
    pub fn build_insertion_indexes(&mut self) {
        for index in self.indexes.values_mut() {
            index.build();
        }
    }

    /// Rows with an insertion matching `pattern` at `(sequence_name, position)`.
    pub fn search(
        &self,
        sequence_name: &str,
        position: u32,
        pattern: &SearchPattern,
    ) -> RoaringBitmap {
        self.indexes
            .get(sequence_name)
            .map(|index| index.search(position, pattern))
            .unwrap_or_default()
    }

    pub fn indexes(&self) -> &HashMap<String, InsertionIndex<A>> {
        &self.indexes
    }

    pub(crate) fn value_ids(&self) -> &[Idx] {
        &self.values
    }

    pub(crate) fn from_parts(
        column_name: String,
        default_sequence_name: Option<String>,
        lookup: Arc<RwLock<Dictionary>>,
        values: Vec<Idx>,
        indexes: Vec<(String, Vec<(u32, Vec<(String, RoaringBitmap)>)>)>,
        null_bitmap: RoaringBitmap,
    ) -> Self {
        InsertionColumnPartition {
            column_name,
            default_sequence_name,
            lookup,
            values,
            indexes: indexes
                .into_iter()
                .map(|(name, parts)| (name, InsertionIndex::from_parts(parts)))
                .collect(),
            null_bitmap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bitmap;
    use crate::common::symbols::Nucleotide;

    fn column() -> InsertionColumnPartition<Nucleotide> {
        InsertionColumnPartition::new(
            "main_insertions",
            Some("main".to_string()),
            Arc::new(RwLock::new(Dictionary::new())),
        )
    }

    fn pattern(text: &str) -> SearchPattern {
        SearchPattern::parse(text).unwrap()
    }

    #[test]
    fn search_verifies_candidates_with_the_full_pattern() {
        let mut column = column();
        column.insert("25701:ACCA").unwrap();
        column.insert("25701:CCG").unwrap();
        column.insert("25701:TTACAT,25701:ACCA").unwrap();
        column.insert("25701:AGCTGTTCAG").unwrap();
        column.build_insertion_indexes();

        assert_eq!(
            column.search("main", 25701, &pattern(".*CC.*")),
            bitmap::of([0, 1, 2])
        );
        assert_eq!(
            column.search("main", 25701, &pattern(".*TTT.*AAA.*")),
            RoaringBitmap::new()
        );
        assert_eq!(
            column.search("main", 25701, &pattern("ACCA")),
            bitmap::of([0, 2])
        );
        assert_eq!(
            column.search("main", 25701, &pattern(".*TTACAT.*")),
            bitmap::of([2])
        );
    }

    #[test]
    fn searches_miss_on_other_positions_and_sequences() {
        let mut column = column();
        column.insert("100:ACGT").unwrap();
        column.build_insertion_indexes();
        assert!(column.search("main", 101, &pattern(".*A.*")).is_empty());
        assert!(column.search("other", 100, &pattern(".*A.*")).is_empty());
    }

    #[test]
    fn three_part_entries_target_other_sequences() {
        let mut column = column();
        column.insert("second:7:GGG").unwrap();
        column.build_insertion_indexes();
        assert_eq!(
            column.search("second", 7, &pattern("GGG")),
            bitmap::of([0])
        );
        assert_eq!(column.value(0), Some("second:7:GGG".to_string()));
    }

    #[test]
    fn cells_standardize_and_read_back() {
        let mut column = column();
        column.insert(" 10:acca , 20:gg ").unwrap();
        column.insert("").unwrap();
        assert_eq!(column.value(0), Some("10:ACCA,20:GG".to_string()));
        assert_eq!(column.value(1), None);
        assert!(column.is_null(1));
    }

    #[test]
    fn malformed_entries_leave_the_row_out() {
        let mut column = column();
        assert!(column.insert("nonsense").is_err());
        assert!(column.insert("10:AC:GT:zz").is_err());
        assert!(column.insert("10:A?C").is_err());
        assert_eq!(column.len(), 0);
    }

    #[test]
    fn two_part_entries_need_a_default_sequence() {
        let mut column: InsertionColumnPartition<Nucleotide> = InsertionColumnPartition::new(
            "ins",
            None,
            Arc::new(RwLock::new(Dictionary::new())),
        );
        assert!(matches!(
            column.insert("10:ACGT"),
            Err(AppendError::JsonShape(_))
        ));
        assert!(column.insert("main:10:ACGT").is_ok());
    }

    #[test]
    fn short_literals_fall_back_to_scanning_all_insertions() {
        let mut column = column();
        column.insert("5:AC").unwrap();
        column.insert("5:CA").unwrap();
        column.build_insertion_indexes();
        // "CA" is below the trigram length; no posting lists exist for it.
        assert_eq!(column.search("main", 5, &pattern(".*CA.*")), bitmap::of([1]));
    }
}
