//! Date column.
//!
//! Values are packed `u32` dates (`0` = NULL). The partition remembers
//! whether rows arrived in non-decreasing date order; a sorted partition
//! answers range filters by binary search instead of a row scan.

use crate::common::date::Date;
use roaring::RoaringBitmap;

#[derive(Debug)]
pub struct DateColumnPartition {
    values: Vec<Date>,
    null_bitmap: RoaringBitmap,
    is_sorted: bool,
}

impl Default for DateColumnPartition {
    fn default() -> Self {
        DateColumnPartition {
            values: Vec::new(),
            null_bitmap: RoaringBitmap::new(),
            is_sorted: true,
        }
    }
}

impl DateColumnPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: Date) {
        if let Some(&last) = self.values.last() {
            if value < last {
                self.is_sorted = false;
            }
        }
        self.values.push(value);
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        // NULL packs as 0, so a null after any real date unsorts the column.
        self.insert(Date::NULL);
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
        self.values[row as usize].is_null()
    }

    pub fn value(&self, row: u32) -> Option<Date> {
        let value = self.values[row as usize];
        (!value.is_null()).then_some(value)
    }

    pub fn values(&self) -> &[Date] {
        &self.values
    }

    pub fn is_sorted(&self) -> bool {
        self.is_sorted
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }

    pub(crate) fn from_parts(values: Vec<Date>, null_bitmap: RoaringBitmap, is_sorted: bool) -> Self {
        DateColumnPartition {
            values,
            null_bitmap,
            is_sorted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(text: &str) -> Date {
        Date::parse(text).unwrap()
    }

    #[test]
    fn sortedness_is_tracked_per_partition() {
        let mut column = DateColumnPartition::new();
        assert!(column.is_sorted());
        column.insert(date("2024-01-01"));
        column.insert(date("2024-01-02"));
        column.insert(date("2024-01-02"));
        assert!(column.is_sorted());
        column.insert(date("2023-12-31"));
        assert!(!column.is_sorted());
    }

    #[test]
    fn null_after_data_unsorts() {
        let mut column = DateColumnPartition::new();
        column.insert(date("2024-01-01"));
        column.insert_null();
        assert!(!column.is_sorted());
        assert!(column.is_null(1));
        assert_eq!(column.value(1), None);
        assert_eq!(column.value(0), Some(date("2024-01-01")));
    }
}
