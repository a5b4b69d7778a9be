//! NDJSON row decoding.
//!
//! One JSON object per line. Metadata fields carry the column name at the
//! top level; sequence columns arrive as
//! `{"sequence": "ACGT...", "insertions": ["pos:TEXT", ...]}` objects whose
//! insertion list is routed to the insertion column attached to that
//! sequence. Nulls and missing fields become null cells. Shape violations
//! are per-line errors and never touch the table.

use crate::common::date::Date;
use crate::error::{AppendError, AppendResult};
use crate::schema::{ColumnType, TableSchema};
use crate::storage::column::Cell;
use crate::storage::table::RowValues;
use serde_json::Value;

fn shape(message: impl Into<String>) -> AppendError {
    AppendError::JsonShape(message.into())
}

fn decode_scalar(column_type: ColumnType, name: &str, value: &Value) -> AppendResult<Cell> {
    if value.is_null() {
        return Ok(Cell::Null);
    }
    match column_type {
        ColumnType::IndexedString
        | ColumnType::PangoLineageIndexedString
        | ColumnType::String
        | ColumnType::UnalignedSequence => value
            .as_str()
            .map(|text| Cell::String(text.to_string()))
            .ok_or_else(|| shape(format!("field '{name}' must be a string"))),
        ColumnType::Date => {
            let text = value
                .as_str()
                .ok_or_else(|| shape(format!("field '{name}' must be a date string")))?;
            Date::parse(text)
                .map(Cell::Date)
                .ok_or_else(|| shape(format!("field '{name}' is not a valid date: '{text}'")))
        }
        ColumnType::Int32 => {
            let number = value
                .as_i64()
                .ok_or_else(|| shape(format!("field '{name}' must be an integer")))?;
            i32::try_from(number)
                .map(Cell::Int)
                .map_err(|_| shape(format!("field '{name}' is out of range: {number}")))
        }
        ColumnType::Float64 => value
            .as_f64()
            .map(Cell::Float)
            .ok_or_else(|| shape(format!("field '{name}' must be a number"))),
        ColumnType::Bool => value
            .as_bool()
            .map(Cell::Bool)
            .ok_or_else(|| shape(format!("field '{name}' must be a boolean"))),
        ColumnType::NucleotideSequence
        | ColumnType::AminoAcidSequence
        | ColumnType::NucleotideInsertion
        | ColumnType::AminoAcidInsertion => {
            unreachable!("sequence columns are decoded from their object form")
        }
    }
}

/// Decode one ndjson line into cells keyed by column name.
pub fn decode_row(schema: &TableSchema, line: &str) -> AppendResult<RowValues> {
    let document: Value = serde_json::from_str(line)
        .map_err(|error| shape(format!("line is not valid JSON: {error}")))?;
    let object = document
        .as_object()
        .ok_or_else(|| shape("line is not a JSON object"))?;

    let mut row = RowValues::new();
    for column in &schema.columns {
        match column.column_type {
            // Insertion columns are filled while decoding their sequence.
            ColumnType::NucleotideInsertion | ColumnType::AminoAcidInsertion => {}
            ColumnType::NucleotideSequence | ColumnType::AminoAcidSequence => {
                decode_sequence_object(schema, column.name.as_str(), object, &mut row)?;
            }
            other => {
                if let Some(value) = object.get(&column.name) {
                    let cell = decode_scalar(other, &column.name, value)?;
                    row.insert(column.name.clone(), cell);
                }
            }
        }
    }
    Ok(row)
}

fn decode_sequence_object(
    schema: &TableSchema,
    sequence_name: &str,
    object: &serde_json::Map<String, Value>,
    row: &mut RowValues,
) -> AppendResult<()> {
    let Some(value) = object.get(sequence_name) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }

    let (sequence, insertions) = match value {
        // Bare string shortcut: a sequence without insertions.
        Value::String(sequence) => (Some(sequence.clone()), Vec::new()),
        Value::Object(fields) => {
            let sequence = match fields.get("sequence") {
                None | Some(Value::Null) => None,
                Some(Value::String(sequence)) => Some(sequence.clone()),
                Some(_) => {
                    return Err(shape(format!(
                        "field '{sequence_name}.sequence' must be a string or null"
                    )))
                }
            };
            let insertions = match fields.get("insertions") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(entries)) => entries
                    .iter()
                    .map(|entry| {
                        entry.as_str().map(str::to_string).ok_or_else(|| {
                            shape(format!(
                                "field '{sequence_name}.insertions' must contain strings"
                            ))
                        })
                    })
                    .collect::<AppendResult<Vec<String>>>()?,
                Some(_) => {
                    return Err(shape(format!(
                        "field '{sequence_name}.insertions' must be an array"
                    )))
                }
            };
            (sequence, insertions)
        }
        _ => {
            return Err(shape(format!(
                "field '{sequence_name}' must be an object or string"
            )))
        }
    };

    if let Some(sequence) = sequence {
        row.insert(sequence_name.to_string(), Cell::String(sequence));
    }
    if !insertions.is_empty() {
        let column_type = schema
            .column(sequence_name)
            .expect("decoded column exists")
            .column_type;
        let insertion_column = match column_type {
            ColumnType::NucleotideSequence => {
                schema.insertion_column_for::<crate::common::symbols::Nucleotide>(sequence_name)
            }
            ColumnType::AminoAcidSequence => {
                schema.insertion_column_for::<crate::common::symbols::AminoAcid>(sequence_name)
            }
            _ => None,
        };
        let insertion_column = insertion_column.ok_or_else(|| {
            shape(format!(
                "sequence '{sequence_name}' has insertions but no insertion column"
            ))
        })?;
        row.insert(
            insertion_column.name.clone(),
            Cell::String(insertions.join(",")),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnIdentifier;
    use std::collections::BTreeMap;

    fn schema() -> TableSchema {
        TableSchema {
            instance_name: "test".to_string(),
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
                    name: "date".to_string(),
                    column_type: ColumnType::Date,
                    sequence_name: None,
                },
                ColumnIdentifier {
                    name: "age".to_string(),
                    column_type: ColumnType::Int32,
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
    fn full_row_decodes_every_column() {
        let line = r#"{
            "accession": "k1", "date": "2024-01-03", "age": 52,
            "main": {"sequence": "ACGT", "insertions": ["2:GGG"]}
        }"#;
        let row = decode_row(&schema(), line).unwrap();
        assert_eq!(row["accession"], Cell::String("k1".to_string()));
        assert_eq!(row["date"], Cell::Date(Date::parse("2024-01-03").unwrap()));
        assert_eq!(row["age"], Cell::Int(52));
        assert_eq!(row["main"], Cell::String("ACGT".to_string()));
        assert_eq!(row["main_insertions"], Cell::String("2:GGG".to_string()));
    }

    #[test]
    fn nulls_and_missing_fields_are_equivalent() {
        let row = decode_row(&schema(), r#"{"accession": "k1", "age": null}"#).unwrap();
        assert!(!row.contains_key("age") || row["age"] == Cell::Null);
        assert!(!row.contains_key("date"));
        assert!(!row.contains_key("main"));
    }

    #[test]
    fn bare_string_sequences_are_accepted() {
        let row = decode_row(&schema(), r#"{"accession": "k1", "main": "ACGT"}"#).unwrap();
        assert_eq!(row["main"], Cell::String("ACGT".to_string()));
    }

    #[test]
    fn invalid_dates_are_shape_errors() {
        let error =
            decode_row(&schema(), r#"{"accession": "k1", "date": "2024-02-30"}"#).unwrap_err();
        assert!(matches!(error, AppendError::JsonShape(_)));
    }

    #[test]
    fn out_of_range_ints_are_shape_errors() {
        let error =
            decode_row(&schema(), r#"{"accession": "k1", "age": 3000000000}"#).unwrap_err();
        assert!(matches!(error, AppendError::JsonShape(_)));
    }

    #[test]
    fn non_object_lines_are_rejected() {
        assert!(decode_row(&schema(), "[1, 2]").is_err());
        assert!(decode_row(&schema(), "not json").is_err());
    }
}
