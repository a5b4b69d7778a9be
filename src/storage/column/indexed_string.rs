//! Dictionary-encoded string column with an inverted bitmap index.
//!
//! The dictionary is table-owned and shared by all partitions, so every
//! partition sees the same value id for the same string. Ids are allocated
//! lazily on insert, behind a short write lock; reads during queries only
//! take the read side.
//!
//! A column may additionally carry a lineage tree (pango lineage columns)
//! and/or a phylogenetic tree; the former feeds a per-partition
//! [`LineageIndex`], the latter is resolved to exact-value bitmaps at
//! query time.

use crate::common::dictionary::{Dictionary, Idx};
use crate::common::lineage::{LineageTreeAndIdMap, RecombinantFollowingMode};
use crate::common::phylo::PhyloTree;
use crate::storage::lineage_index::LineageIndex;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::HashMap;
use std::sync::Arc;

/// Table-level state of an indexed string column, shared by its partitions.
#[derive(Debug)]
pub struct IndexedStringMetadata {
    pub column_name: String,
    pub dictionary: RwLock<Dictionary>,
    pub lineage_tree: Option<LineageTreeAndIdMap>,
    pub phylo_tree: Option<PhyloTree>,
}

impl IndexedStringMetadata {
    pub fn new(column_name: impl Into<String>) -> Arc<Self> {
        Arc::new(IndexedStringMetadata {
            column_name: column_name.into(),
            dictionary: RwLock::new(Dictionary::new()),
            lineage_tree: None,
            phylo_tree: None,
        })
    }

    /// Metadata for a lineage column. The column dictionary starts as the
    /// tree's lookup so that value ids and tree node ids coincide.
    pub fn with_lineage_tree(
        column_name: impl Into<String>,
        lineage_tree: LineageTreeAndIdMap,
    ) -> Arc<Self> {
        Arc::new(IndexedStringMetadata {
            column_name: column_name.into(),
            dictionary: RwLock::new(lineage_tree.lookup.clone()),
            lineage_tree: Some(lineage_tree),
            phylo_tree: None,
        })
    }

    pub fn with_phylo_tree(column_name: impl Into<String>, phylo_tree: PhyloTree) -> Arc<Self> {
        Arc::new(IndexedStringMetadata {
            column_name: column_name.into(),
            dictionary: RwLock::new(Dictionary::new()),
            lineage_tree: None,
            phylo_tree: Some(phylo_tree),
        })
    }

    /// (Internal) reassemble loaded metadata.
    pub(crate) fn from_parts(
        column_name: String,
        dictionary: Dictionary,
        lineage_tree: Option<LineageTreeAndIdMap>,
        phylo_tree: Option<PhyloTree>,
    ) -> Arc<Self> {
        Arc::new(IndexedStringMetadata {
            column_name,
            dictionary: RwLock::new(dictionary),
            lineage_tree,
            phylo_tree,
        })
    }
}

/// Sentinel id stored in the dense vector for NULL rows.
const NULL_ID: Idx = Idx::MAX;

/// One partition of an indexed string column.
#[derive(Debug)]
pub struct IndexedStringColumnPartition {
    metadata: Arc<IndexedStringMetadata>,
    value_ids: Vec<Idx>,
    indexed_values: HashMap<Idx, RoaringBitmap>,
    null_bitmap: RoaringBitmap,
    lineage_index: Option<LineageIndex>,
}

impl IndexedStringColumnPartition {
    pub fn new(metadata: Arc<IndexedStringMetadata>) -> Self {
        let lineage_index = metadata
            .lineage_tree
            .as_ref()
            .map(|_| LineageIndex::new());
        IndexedStringColumnPartition {
            metadata,
            value_ids: Vec::new(),
            indexed_values: HashMap::new(),
            null_bitmap: RoaringBitmap::new(),
            lineage_index,
        }
    }

    pub fn metadata(&self) -> &Arc<IndexedStringMetadata> {
        &self.metadata
    }

    pub fn insert(&mut self, value: &str) {
        let row = self.value_ids.len() as u32;
        let id = self.metadata.dictionary.write().get_or_create_id(value);
        self.value_ids.push(id);
        self.indexed_values.entry(id).or_default().insert(row);
        if let (Some(index), Some(tree)) =
            (self.lineage_index.as_mut(), self.metadata.lineage_tree.as_ref())
        {
            index.insert(&tree.tree, row, id);
        }
    }

    pub fn insert_null(&mut self) {
        let row = self.value_ids.len() as u32;
        self.value_ids.push(NULL_ID);
        self.null_bitmap.insert(row);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.value_ids.reserve(additional);
    }

    pub fn len(&self) -> usize {
        self.value_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_ids.is_empty()
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.value_ids[row as usize] == NULL_ID
    }

    pub fn value(&self, row: u32) -> Option<String> {
        match self.value_ids[row as usize] {
            NULL_ID => None,
            id => Some(self.metadata.dictionary.read().value_of(id).to_string()),
        }
    }

    pub fn value_ids(&self) -> &[Idx] {
        &self.value_ids
    }

    /// Rows holding exactly `value`. `None` means the value was never seen
    /// anywhere in the table; a value seen only in other partitions yields
    /// an empty bitmap.
    pub fn filter(&self, value: &str) -> Option<&RoaringBitmap> {
        let id = self.metadata.dictionary.read().id_of(value)?;
        Some(self.filter_by_id(id))
    }

    pub fn filter_by_id(&self, id: Idx) -> &RoaringBitmap {
        self.indexed_values
            .get(&id)
            .unwrap_or_else(|| crate::common::bitmap::empty())
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub fn lineage_index(&self) -> Option<&LineageIndex> {
        self.lineage_index.as_ref()
    }

    /// Rows whose lineage is `value_id` or a descendant of it.
    pub fn filter_including_sublineages(
        &self,
        value_id: Idx,
        mode: RecombinantFollowingMode,
    ) -> Option<&RoaringBitmap> {
        let tree = &self.metadata.lineage_tree.as_ref()?.tree;
        self.lineage_index
            .as_ref()?
            .filter_including_sublineages(tree, value_id, mode)
    }

    /// Rows whose lineage is exactly `value_id`.
    pub fn filter_excluding_sublineages(&self, value_id: Idx) -> Option<&RoaringBitmap> {
        let tree = &self.metadata.lineage_tree.as_ref()?.tree;
        self.lineage_index
            .as_ref()?
            .filter_excluding_sublineages(tree, value_id)
    }

    /// (Internal) inverted index for persistence.
    pub(crate) fn indexed_values(&self) -> &HashMap<Idx, RoaringBitmap> {
        &self.indexed_values
    }

    /// (Internal) rebuild from persisted parts.
    pub(crate) fn from_parts(
        metadata: Arc<IndexedStringMetadata>,
        value_ids: Vec<Idx>,
        indexed_values: HashMap<Idx, RoaringBitmap>,
        null_bitmap: RoaringBitmap,
        lineage_index: Option<LineageIndex>,
    ) -> Self {
        IndexedStringColumnPartition {
            metadata,
            value_ids,
            indexed_values,
            null_bitmap,
            lineage_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bitmap;

    #[test]
    fn inverted_index_matches_the_dense_vector() {
        let metadata = IndexedStringMetadata::new("country");
        let mut column = IndexedStringColumnPartition::new(Arc::clone(&metadata));
        for value in ["CH", "DE", "CH", "FR", "CH"] {
            column.insert(value);
        }
        column.insert_null();

        assert_eq!(column.filter("CH"), Some(&bitmap::of([0, 2, 4])));
        assert_eq!(column.filter("DE"), Some(&bitmap::of([1])));
        assert_eq!(column.filter("IT"), None);
        assert_eq!(column.null_bitmap(), &bitmap::of([5]));
        assert_eq!(column.value(3), Some("FR".to_string()));
        assert_eq!(column.value(5), None);
        assert!(column.is_null(5));
        assert_eq!(column.len(), 6);
    }

    #[test]
    fn partitions_share_value_ids_through_the_metadata() {
        let metadata = IndexedStringMetadata::new("country");
        let mut first = IndexedStringColumnPartition::new(Arc::clone(&metadata));
        let mut second = IndexedStringColumnPartition::new(Arc::clone(&metadata));
        first.insert("CH");
        second.insert("DE");
        second.insert("CH");

        assert_eq!(first.value_ids()[0], second.value_ids()[1]);
        assert_ne!(first.value_ids()[0], second.value_ids()[0]);

        // A value seen only in the other partition is known but empty here;
        // a value the whole table never saw is None.
        assert_eq!(first.filter("DE"), Some(crate::common::bitmap::empty()));
        assert_eq!(first.filter("IT"), None);
    }

    #[test]
    fn lineage_columns_maintain_their_index() {
        let lineage = crate::common::lineage::LineageTreeAndIdMap::from_yaml(
            "A:\nA.1:\n  parents: [A]\n",
        )
        .unwrap();
        let metadata = IndexedStringMetadata::with_lineage_tree("pango_lineage", lineage);
        let mut column = IndexedStringColumnPartition::new(Arc::clone(&metadata));
        column.insert("A");
        column.insert("A.1");

        let a = metadata.dictionary.read().id_of("A").unwrap();
        assert_eq!(
            column.filter_including_sublineages(a, RecombinantFollowingMode::DoNotFollow),
            Some(&bitmap::of([0, 1]))
        );
        assert_eq!(
            column.filter_excluding_sublineages(a),
            Some(&bitmap::of([0]))
        );
    }
}
