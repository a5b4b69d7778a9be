//! Bidirectional string interning.
//!
//! Indexed columns never store strings row-wise; they store dense ids into a
//! table-owned dictionary so that every partition sees the same id for the
//! same string.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dense id of an interned string.
pub type Idx = u32;

/// Interning map `string <-> Idx`.
///
/// Ids are allocated in first-seen order and never reused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dictionary {
    values: Vec<String>,
    #[serde(skip)]
    ids: HashMap<String, Idx>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `value`, allocating a new one on first sight.
    pub fn get_or_create_id(&mut self, value: &str) -> Idx {
        if let Some(&id) = self.ids.get(value) {
            return id;
        }
        let id = self.values.len() as Idx;
        self.values.push(value.to_string());
        self.ids.insert(value.to_string(), id);
        id
    }

    /// Id of `value` if it was interned before.
    pub fn id_of(&self, value: &str) -> Option<Idx> {
        self.ids.get(value).copied()
    }

    /// The string behind `id`.
    ///
    /// Ids only come from this dictionary, so an unknown id is a bug.
    pub fn value_of(&self, id: Idx) -> &str {
        &self.values[id as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Rebuilds the reverse map after deserialization; the forward vector is
    /// the single persisted source of truth.
    pub fn rebuild_reverse_index(&mut self) {
        self.ids = self
            .values
            .iter()
            .enumerate()
            .map(|(id, value)| (value.clone(), id as Idx))
            .collect();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Idx, &str)> {
        self.values
            .iter()
            .enumerate()
            .map(|(id, value)| (id as Idx, value.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_stable() {
        let mut dictionary = Dictionary::new();
        assert_eq!(dictionary.get_or_create_id("CH"), 0);
        assert_eq!(dictionary.get_or_create_id("DE"), 1);
        assert_eq!(dictionary.get_or_create_id("CH"), 0);
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.value_of(1), "DE");
        assert_eq!(dictionary.id_of("FR"), None);
    }

    #[test]
    fn reverse_index_survives_serialization() {
        let mut dictionary = Dictionary::new();
        dictionary.get_or_create_id("alpha");
        dictionary.get_or_create_id("beta");

        let bytes = bincode::serialize(&dictionary).unwrap();
        let mut restored: Dictionary = bincode::deserialize(&bytes).unwrap();
        restored.rebuild_reverse_index();

        assert_eq!(restored.id_of("beta"), Some(1));
        assert_eq!(restored.get_or_create_id("gamma"), 2);
    }
}
