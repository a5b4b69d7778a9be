//! Scalar columns: Int32, Float64 and Bool.
//!
//! Int and float columns are plain vectors plus a null bitmap; the
//! sentinel values `i32::MIN` and `NaN` are also read as null so a loaded
//! vector is self-describing. The bool column is three bitmaps
//! partitioning the row space.

use roaring::RoaringBitmap;

#[derive(Debug, Default)]
pub struct IntColumnPartition {
    values: Vec<i32>,
    null_bitmap: RoaringBitmap,
}

impl IntColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: i32) {
        if value == i32::MIN {
            self.insert_null();
        } else {
            self.values.push(value);
        }
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(i32::MIN);
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
        self.values[row as usize] == i32::MIN
    }

    pub fn value(&self, row: u32) -> Option<i32> {
        let value = self.values[row as usize];
        (value != i32::MIN).then_some(value)
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub(crate) fn from_parts(values: Vec<i32>, null_bitmap: RoaringBitmap) -> Self {
        IntColumnPartition {
            values,
            null_bitmap,
        }
    }
}

#[derive(Debug, Default)]
pub struct FloatColumnPartition {
    values: Vec<f64>,
    null_bitmap: RoaringBitmap,
}

impl FloatColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: f64) {
        if value.is_nan() {
            self.insert_null();
        } else {
            self.values.push(value);
        }
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(f64::NAN);
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
        self.values[row as usize].is_nan()
    }

    pub fn value(&self, row: u32) -> Option<f64> {
        let value = self.values[row as usize];
        (!value.is_nan()).then_some(value)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub(crate) fn from_parts(values: Vec<f64>, null_bitmap: RoaringBitmap) -> Self {
        FloatColumnPartition {
            values,
            null_bitmap,
        }
    }
}

/// Three bitmaps partitioning `[0, len)` disjointly.
#[derive(Debug, Default)]
pub struct BoolColumnPartition {
    true_bitmap: RoaringBitmap,
    false_bitmap: RoaringBitmap,
    null_bitmap: RoaringBitmap,
    row_count: u32,
}

impl BoolColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: bool) {
        let row = self.row_count;
        if value {
            self.true_bitmap.insert(row);
        } else {
            self.false_bitmap.insert(row);
        }
        self.row_count += 1;
    }

    pub fn insert_null(&mut self) {
        self.null_bitmap.insert(self.row_count);
        self.row_count += 1;
    }

    pub fn reserve(&mut self, _additional: usize) {}

    pub fn len(&self) -> usize {
        self.row_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.null_bitmap.contains(row)
    }

    pub fn value(&self, row: u32) -> Option<bool> {
        if self.true_bitmap.contains(row) {
            Some(true)
        } else if self.false_bitmap.contains(row) {
            Some(false)
        } else {
            None
        }
    }

    pub fn true_bitmap(&self) -> &RoaringBitmap {
        &self.true_bitmap
    }

    pub fn false_bitmap(&self) -> &RoaringBitmap {
        &self.false_bitmap
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub(crate) fn from_parts(
        true_bitmap: RoaringBitmap,
        false_bitmap: RoaringBitmap,
        null_bitmap: RoaringBitmap,
        row_count: u32,
    ) -> Self {
        BoolColumnPartition {
            true_bitmap,
            false_bitmap,
            null_bitmap,
            row_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bitmap;

    #[test]
    fn int_sentinel_reads_as_null() {
        let mut column = IntColumnPartition::new();
        column.insert(42);
        column.insert(i32::MIN);
        column.insert_null();
        assert_eq!(column.value(0), Some(42));
        assert_eq!(column.value(1), None);
        assert_eq!(column.value(2), None);
        assert_eq!(column.null_bitmap(), &bitmap::of([1, 2]));
    }

    #[test]
    fn float_nan_reads_as_null() {
        let mut column = FloatColumnPartition::new();
        column.insert(1.5);
        column.insert(f64::NAN);
        assert_eq!(column.value(0), Some(1.5));
        assert_eq!(column.value(1), None);
        assert!(column.is_null(1));
    }

    #[test]
    fn bool_bitmaps_partition_the_rows() {
        let mut column = BoolColumnPartition::new();
        column.insert(true);
        column.insert(false);
        column.insert_null();
        column.insert(true);
        assert_eq!(column.true_bitmap(), &bitmap::of([0, 3]));
        assert_eq!(column.false_bitmap(), &bitmap::of([1]));
        assert_eq!(column.null_bitmap(), &bitmap::of([2]));
        assert_eq!(column.len(), 4);
        assert_eq!(column.value(3), Some(true));
        assert_eq!(column.value(2), None);
    }
}
