//! Plain (non-indexed) string column.
//!
//! Rows are fixed 16-byte Umbra descriptors; suffixes of long strings live
//! in a per-partition append-only page registry. Point predicates run as
//! row scans with the descriptor fast path.

use crate::common::umbra::{UmbraString, VariableDataRegistry};
use roaring::RoaringBitmap;

#[derive(Debug, Default)]
pub struct StringColumnPartition {
    values: Vec<UmbraString>,
    registry: VariableDataRegistry,
    null_bitmap: RoaringBitmap,
}

impl StringColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: &str) {
        let interned = UmbraString::new(value, &mut self.registry);
        self.values.push(interned);
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(UmbraString::new("", &mut self.registry));
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
        Some(self.values[row as usize].resolve(&self.registry))
    }

    /// Descriptor-level equality against `other`, for row-scan selections.
    pub fn row_equals(&self, row: u32, other: &str) -> bool {
        self.values[row as usize].eq_str(other, &self.registry)
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub fn registry(&self) -> &VariableDataRegistry {
        &self.registry
    }

    pub(crate) fn values(&self) -> &[UmbraString] {
        &self.values
    }

    pub(crate) fn from_parts(
        values: Vec<UmbraString>,
        registry: VariableDataRegistry,
        null_bitmap: RoaringBitmap,
    ) -> Self {
        StringColumnPartition {
            values,
            registry,
            null_bitmap,
        }
    }
}
