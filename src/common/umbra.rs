//! Umbra-style string values.
//!
//! Large string columns store one fixed 16-byte descriptor per row: the
//! length, an inlined prefix and either the full string (when it fits) or
//! an id into an append-only suffix page registry. Equality and most
//! comparisons resolve from the descriptor alone; only a shared prefix
//! forces a suffix lookup.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Strings up to this many bytes are stored entirely in the descriptor.
pub const INLINE_CAPACITY: usize = 12;

/// Prefix bytes kept in the descriptor of a long string.
pub const PREFIX_LENGTH: usize = 8;

/// Fixed 16-byte string descriptor: 4 bytes length + 12 bytes payload.
///
/// Long strings keep `PREFIX_LENGTH` prefix bytes in the payload followed by
/// a little-endian [`SuffixId`] pointing at the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UmbraString {
    length: u32,
    payload: [u8; INLINE_CAPACITY],
}

/// Identifier of a suffix inside a [`VariableDataRegistry`]:
/// `page << 16 | offset`.
pub type SuffixId = u32;

impl UmbraString {
    /// Intern `value`, appending its suffix to `registry` when it does not
    /// fit inline.
    pub fn new(value: &str, registry: &mut VariableDataRegistry) -> UmbraString {
        let bytes = value.as_bytes();
        let mut payload = [0u8; INLINE_CAPACITY];
        if bytes.len() <= INLINE_CAPACITY {
            payload[..bytes.len()].copy_from_slice(bytes);
        } else {
            payload[..PREFIX_LENGTH].copy_from_slice(&bytes[..PREFIX_LENGTH]);
            let suffix_id = registry.append(&bytes[PREFIX_LENGTH..]);
            payload[PREFIX_LENGTH..].copy_from_slice(&suffix_id.to_le_bytes());
        }
        UmbraString {
            length: bytes.len() as u32,
            payload,
        }
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_inline(&self) -> bool {
        self.len() <= INLINE_CAPACITY
    }

    fn prefix(&self) -> &[u8] {
        if self.is_inline() {
            &self.payload[..self.len()]
        } else {
            &self.payload[..PREFIX_LENGTH]
        }
    }

    fn suffix_id(&self) -> SuffixId {
        debug_assert!(!self.is_inline());
        SuffixId::from_le_bytes(self.payload[PREFIX_LENGTH..].try_into().unwrap())
    }

    /// Reconstruct the original string.
    pub fn resolve(&self, registry: &VariableDataRegistry) -> String {
        if self.is_inline() {
            return String::from_utf8_lossy(self.prefix()).into_owned();
        }
        let suffix = registry.get(self.suffix_id(), self.len() - PREFIX_LENGTH);
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(self.prefix());
        bytes.extend_from_slice(suffix);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Compare against `other` using the descriptor alone.
    /// `None` means the prefix and length cannot decide.
    pub fn fast_compare(&self, other: &str) -> Option<Ordering> {
        let other_bytes = other.as_bytes();
        if self.is_inline() {
            return Some(self.prefix().cmp(other_bytes));
        }
        let compared = other_bytes.len().min(PREFIX_LENGTH);
        match self.prefix().cmp(&other_bytes[..compared]) {
            Ordering::Equal if other_bytes.len() <= PREFIX_LENGTH => {
                // Our string is longer than the whole of `other`.
                Some(Ordering::Greater)
            }
            Ordering::Equal => None,
            decided => Some(decided),
        }
    }

    /// Full equality check, touching the registry only when the descriptor
    /// cannot decide.
    pub fn eq_str(&self, other: &str, registry: &VariableDataRegistry) -> bool {
        if self.len() != other.len() {
            return false;
        }
        match self.fast_compare(other) {
            Some(ordering) => ordering == Ordering::Equal,
            None => {
                let suffix = registry.get(self.suffix_id(), self.len() - PREFIX_LENGTH);
                suffix == &other.as_bytes()[PREFIX_LENGTH..]
            }
        }
    }
}

const PAGE_SIZE: usize = 1 << 16;

/// Append-only page storage for string suffixes.
///
/// A suffix never spans pages: when it does not fit into the tail of the
/// current page, a new page is started (oversized suffixes get a page of
/// their own).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableDataRegistry {
    pages: Vec<Vec<u8>>,
}

impl VariableDataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&mut self, suffix: &[u8]) -> SuffixId {
        let needs_fresh_page = match self.pages.last() {
            Some(page) => page.len() + suffix.len() > PAGE_SIZE,
            None => true,
        };
        if needs_fresh_page {
            self.pages.push(Vec::new());
        }
        let page_index = self.pages.len() - 1;
        assert!(page_index < (1 << 16), "suffix registry page limit exceeded");
        let page = &mut self.pages[page_index];
        let offset = page.len();
        page.extend_from_slice(suffix);
        ((page_index as u32) << 16) | offset as u32
    }

    fn get(&self, id: SuffixId, length: usize) -> &[u8] {
        let page = &self.pages[(id >> 16) as usize];
        let offset = (id & 0xFFFF) as usize;
        &page[offset..offset + length]
    }

    /// Bytes held across all pages.
    pub fn size_in_bytes(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_round_trip_without_pages() {
        let mut registry = VariableDataRegistry::new();
        let value = UmbraString::new("Switzerland!", &mut registry);
        assert!(value.is_inline());
        assert_eq!(registry.size_in_bytes(), 0);
        assert_eq!(value.resolve(&registry), "Switzerland!");
    }

    #[test]
    fn long_strings_round_trip_through_the_registry() {
        let mut registry = VariableDataRegistry::new();
        let text = "a string that is much longer than twelve bytes";
        let value = UmbraString::new(text, &mut registry);
        assert!(!value.is_inline());
        assert_eq!(value.resolve(&registry), text);
    }

    #[test]
    fn equality_uses_fast_path_where_possible() {
        let mut registry = VariableDataRegistry::new();
        let value = UmbraString::new("hCoV-19/Switzerland/GE-1234/2021", &mut registry);
        assert!(value.eq_str("hCoV-19/Switzerland/GE-1234/2021", &registry));
        assert!(!value.eq_str("hCoV-19/Germany/BW-1234/2021", &registry));
        // Same prefix and length, different suffix: needs the registry.
        assert!(!value.eq_str("hCoV-19/Switzerland/GE-9999/2021", &registry));
    }

    #[test]
    fn fast_compare_decides_on_prefix() {
        let mut registry = VariableDataRegistry::new();
        let value = UmbraString::new("mmmmmmmmmmmmmmmm", &mut registry);
        assert_eq!(value.fast_compare("zzz"), Some(Ordering::Less));
        assert_eq!(value.fast_compare("aaa"), Some(Ordering::Greater));
        assert_eq!(value.fast_compare("mmmmmmmmmmmmmmmm"), None);
        assert_eq!(value.fast_compare("mmmm"), Some(Ordering::Greater));
    }

    #[test]
    fn suffixes_do_not_span_pages() {
        let mut registry = VariableDataRegistry::new();
        let long = "x".repeat(PAGE_SIZE - 100);
        let a = UmbraString::new(&long, &mut registry);
        let b = UmbraString::new("another long string beyond inline capacity", &mut registry);
        assert_eq!(registry.pages.len(), 2);
        assert_eq!(a.resolve(&registry), long);
        assert_eq!(
            b.resolve(&registry),
            "another long string beyond inline capacity"
        );
    }

    #[test]
    fn empty_string_is_inline() {
        let mut registry = VariableDataRegistry::new();
        let value = UmbraString::new("", &mut registry);
        assert!(value.is_empty());
        assert_eq!(value.resolve(&registry), "");
        assert!(value.eq_str("", &registry));
    }
}
