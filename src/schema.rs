//! Table schema: the fixed shape of a database.
//!
//! A schema names the primary-key column, the ordered set of columns with
//! their types, the reference sequence of every sequence column and the
//! optional default sequence names used when a filter omits one. Schemas
//! are written to and read from `schema.yaml` inside a data directory.

use crate::common::symbols::{parse_sequence, Alphabet, AlphabetKind, AminoAcid, Nucleotide};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The type of a column. Sequence and insertion kinds come in a
/// nucleotide and an amino-acid flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    /// Dictionary-encoded string with an inverted bitmap index.
    IndexedString,
    /// Indexed string with an attached lineage tree.
    PangoLineageIndexedString,
    /// Plain string, stored as Umbra descriptors.
    String,
    Date,
    Int32,
    Float64,
    Bool,
    NucleotideSequence,
    AminoAcidSequence,
    /// Raw unaligned sequence text; stored but never position-indexed.
    UnalignedSequence,
    NucleotideInsertion,
    AminoAcidInsertion,
}

impl ColumnType {
    pub fn is_sequence(self) -> bool {
        matches!(
            self,
            ColumnType::NucleotideSequence | ColumnType::AminoAcidSequence
        )
    }

    pub fn is_insertion(self) -> bool {
        matches!(
            self,
            ColumnType::NucleotideInsertion | ColumnType::AminoAcidInsertion
        )
    }
}

/// One column of the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnIdentifier {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// For insertion columns: the sequence column the insertions belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_name: Option<String>,
}

/// The complete schema of a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub instance_name: String,
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_nucleotide_sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_amino_acid_sequence: Option<String>,
    pub columns: Vec<ColumnIdentifier>,
    /// Reference sequence per sequence column, keyed by column name.
    #[serde(default)]
    pub reference_sequences: BTreeMap<String, String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnIdentifier> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn reference_sequence(&self, column_name: &str) -> Option<&str> {
        self.reference_sequences
            .get(column_name)
            .map(String::as_str)
    }

    /// The sequence name to use for a filter that omitted one.
    pub fn default_sequence_name<A: Alphabet>(&self) -> Option<&str> {
        match A::KIND {
            AlphabetKind::Nucleotide => self.default_nucleotide_sequence.as_deref(),
            AlphabetKind::AminoAcid => self.default_amino_acid_sequence.as_deref(),
        }
    }

    /// The insertion column attached to `sequence_name` for the alphabet.
    pub fn insertion_column_for<A: Alphabet>(&self, sequence_name: &str) -> Option<&ColumnIdentifier> {
        let wanted = match A::KIND {
            AlphabetKind::Nucleotide => ColumnType::NucleotideInsertion,
            AlphabetKind::AminoAcid => ColumnType::AminoAcidInsertion,
        };
        self.columns.iter().find(|column| {
            column.column_type == wanted && column.sequence_name.as_deref() == Some(sequence_name)
        })
    }

    /// Structural consistency of the schema itself.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(format!("duplicate column name '{}'", column.name));
            }
        }
        let primary = self
            .column(&self.primary_key)
            .ok_or_else(|| format!("primary key column '{}' is not declared", self.primary_key))?;
        if !matches!(
            primary.column_type,
            ColumnType::String | ColumnType::IndexedString
        ) {
            return Err(format!(
                "primary key column '{}' must be a string column",
                self.primary_key
            ));
        }
        for column in &self.columns {
            if column.column_type.is_sequence() {
                let Some(reference) = self.reference_sequence(&column.name) else {
                    return Err(format!(
                        "sequence column '{}' has no reference sequence",
                        column.name
                    ));
                };
                let parses = match column.column_type {
                    ColumnType::NucleotideSequence => parse_sequence::<Nucleotide>(reference).is_ok(),
                    _ => parse_sequence::<AminoAcid>(reference).is_ok(),
                };
                if !parses {
                    return Err(format!(
                        "reference sequence of '{}' contains an illegal symbol",
                        column.name
                    ));
                }
            }
            if column.column_type.is_insertion() {
                let Some(sequence) = column.sequence_name.as_deref() else {
                    return Err(format!(
                        "insertion column '{}' does not name its sequence column",
                        column.name
                    ));
                };
                if !self
                    .column(sequence)
                    .is_some_and(|target| target.column_type.is_sequence())
                {
                    return Err(format!(
                        "insertion column '{}' references unknown sequence column '{}'",
                        column.name, sequence
                    ));
                }
            }
        }
        for name in self.reference_sequences.keys() {
            if !self.column(name).is_some_and(|c| c.column_type.is_sequence()) {
                return Err(format!(
                    "reference sequence given for '{name}', which is not a sequence column"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::symbols::{AminoAcid, Nucleotide};

    fn test_schema() -> TableSchema {
        TableSchema {
            instance_name: "sars_cov-2".to_string(),
            primary_key: "accession".to_string(),
            default_nucleotide_sequence: Some("main".to_string()),
            default_amino_acid_sequence: None,
            columns: vec![
                ColumnIdentifier {
                    name: "accession".to_string(),
                    column_type: ColumnType::String,
                    sequence_name: None,
                },
                ColumnIdentifier {
                    name: "country".to_string(),
                    column_type: ColumnType::IndexedString,
                    sequence_name: None,
                },
                ColumnIdentifier {
                    name: "main".to_string(),
                    column_type: ColumnType::NucleotideSequence,
                    sequence_name: None,
                },
                ColumnIdentifier {
                    name: "main_insertions".to_string(),
                    column_type: ColumnType::NucleotideInsertion,
                    sequence_name: Some("main".to_string()),
                },
            ],
            reference_sequences: BTreeMap::from([("main".to_string(), "ACGT".to_string())]),
        }
    }

    #[test]
    fn valid_schema_passes_validation() {
        assert_eq!(test_schema().validate(), Ok(()));
    }

    #[test]
    fn default_sequence_names_are_per_alphabet() {
        let schema = test_schema();
        assert_eq!(schema.default_sequence_name::<Nucleotide>(), Some("main"));
        assert_eq!(schema.default_sequence_name::<AminoAcid>(), None);
    }

    #[test]
    fn insertion_columns_resolve_by_sequence_name() {
        let schema = test_schema();
        let column = schema.insertion_column_for::<Nucleotide>("main").unwrap();
        assert_eq!(column.name, "main_insertions");
        assert!(schema.insertion_column_for::<AminoAcid>("main").is_none());
    }

    #[test]
    fn missing_reference_sequence_is_rejected() {
        let mut schema = test_schema();
        schema.reference_sequences.clear();
        assert!(schema.validate().is_err());
    }

    #[test]
    fn unknown_primary_key_is_rejected() {
        let mut schema = test_schema();
        schema.primary_key = "nope".to_string();
        assert!(schema.validate().is_err());
    }

    #[test]
    fn schema_round_trips_through_yaml() {
        let schema = test_schema();
        let yaml = serde_yaml::to_string(&schema).unwrap();
        let restored: TableSchema = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored.primary_key, schema.primary_key);
        assert_eq!(restored.columns.len(), schema.columns.len());
        assert_eq!(restored.reference_sequence("main"), Some("ACGT"));
    }
}
