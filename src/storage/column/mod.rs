//! Column partition kinds and the cell values that feed them.

pub mod date;
pub mod indexed_string;
pub mod insertion;
pub mod numeric;
pub mod sequence;
pub mod string;

pub use date::DateColumnPartition;
pub use indexed_string::{IndexedStringColumnPartition, IndexedStringMetadata};
pub use insertion::{InsertionColumnPartition, InsertionIndex, NGRAM_LENGTH};
pub use numeric::{BoolColumnPartition, FloatColumnPartition, IntColumnPartition};
pub use sequence::SequenceColumnPartition;
pub use string::StringColumnPartition;

use crate::common::date::Date;
use crate::common::symbols::{AminoAcid, Nucleotide};
use crate::error::{AppendError, AppendResult};

/// A decoded cell on its way into a column partition.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    String(String),
    Int(i32),
    Float(f64),
    Bool(bool),
    Date(Date),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// One partition of one column, dispatched by kind.
#[derive(Debug)]
pub enum ColumnPartition {
    IndexedString(IndexedStringColumnPartition),
    PlainString(StringColumnPartition),
    Date(DateColumnPartition),
    Int(IntColumnPartition),
    Float(FloatColumnPartition),
    Bool(BoolColumnPartition),
    NucleotideSequence(SequenceColumnPartition<Nucleotide>),
    AminoAcidSequence(SequenceColumnPartition<AminoAcid>),
    NucleotideInsertion(InsertionColumnPartition<Nucleotide>),
    AminoAcidInsertion(InsertionColumnPartition<AminoAcid>),
}

impl ColumnPartition {
    pub fn len(&self) -> usize {
        match self {
            ColumnPartition::IndexedString(column) => column.len(),
            ColumnPartition::PlainString(column) => column.len(),
            ColumnPartition::Date(column) => column.len(),
            ColumnPartition::Int(column) => column.len(),
            ColumnPartition::Float(column) => column.len(),
            ColumnPartition::Bool(column) => column.len(),
            ColumnPartition::NucleotideSequence(column) => column.len(),
            ColumnPartition::AminoAcidSequence(column) => column.len(),
            ColumnPartition::NucleotideInsertion(column) => column.len(),
            ColumnPartition::AminoAcidInsertion(column) => column.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reserve(&mut self, additional: usize) {
        match self {
            ColumnPartition::IndexedString(column) => column.reserve(additional),
            ColumnPartition::PlainString(column) => column.reserve(additional),
            ColumnPartition::Date(column) => column.reserve(additional),
            ColumnPartition::Int(column) => column.reserve(additional),
            ColumnPartition::Float(column) => column.reserve(additional),
            ColumnPartition::Bool(column) => column.reserve(additional),
            ColumnPartition::NucleotideSequence(column) => column.reserve(additional),
            ColumnPartition::AminoAcidSequence(column) => column.reserve(additional),
            ColumnPartition::NucleotideInsertion(column) => column.reserve(additional),
            ColumnPartition::AminoAcidInsertion(column) => column.reserve(additional),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ColumnPartition::IndexedString(_) => "indexedString",
            ColumnPartition::PlainString(_) => "string",
            ColumnPartition::Date(_) => "date",
            ColumnPartition::Int(_) => "int32",
            ColumnPartition::Float(_) => "float64",
            ColumnPartition::Bool(_) => "bool",
            ColumnPartition::NucleotideSequence(_) => "nucleotideSequence",
            ColumnPartition::AminoAcidSequence(_) => "aminoAcidSequence",
            ColumnPartition::NucleotideInsertion(_) => "nucleotideInsertion",
            ColumnPartition::AminoAcidInsertion(_) => "aminoAcidInsertion",
        }
    }

    fn type_mismatch(&self, cell: &Cell) -> AppendError {
        AppendError::JsonShape(format!(
            "cell {cell:?} does not fit a {} column",
            self.kind_name()
        ))
    }

    /// Check a cell without touching any state. A row is only committed
    /// after every one of its cells validated, which is what makes the
    /// per-row insert transactional.
    pub fn validate_cell(&self, cell: &Cell) -> AppendResult<()> {
        if cell.is_null() {
            return Ok(());
        }
        match (self, cell) {
            (ColumnPartition::IndexedString(_), Cell::String(_)) => Ok(()),
            (ColumnPartition::PlainString(_), Cell::String(_)) => Ok(()),
            (ColumnPartition::Date(_), Cell::Date(_)) => Ok(()),
            (ColumnPartition::Int(_), Cell::Int(_)) => Ok(()),
            (ColumnPartition::Float(_), Cell::Float(_)) => Ok(()),
            (ColumnPartition::Bool(_), Cell::Bool(_)) => Ok(()),
            (ColumnPartition::NucleotideSequence(column), Cell::String(sequence)) => {
                column.validate(sequence)
            }
            (ColumnPartition::AminoAcidSequence(column), Cell::String(sequence)) => {
                column.validate(sequence)
            }
            (ColumnPartition::NucleotideInsertion(column), Cell::String(value)) => {
                column.validate(value)
            }
            (ColumnPartition::AminoAcidInsertion(column), Cell::String(value)) => {
                column.validate(value)
            }
            _ => Err(self.type_mismatch(cell)),
        }
    }

    /// Append a previously validated cell.
    pub fn insert_cell(&mut self, cell: &Cell) -> AppendResult<()> {
        match (&mut *self, cell) {
            (column, Cell::Null) => {
                column.insert_null();
                Ok(())
            }
            (ColumnPartition::IndexedString(column), Cell::String(value)) => {
                column.insert(value);
                Ok(())
            }
            (ColumnPartition::PlainString(column), Cell::String(value)) => {
                column.insert(value);
                Ok(())
            }
            (ColumnPartition::Date(column), Cell::Date(value)) => {
                column.insert(*value);
                Ok(())
            }
            (ColumnPartition::Int(column), Cell::Int(value)) => {
                column.insert(*value);
                Ok(())
            }
            (ColumnPartition::Float(column), Cell::Float(value)) => {
                column.insert(*value);
                Ok(())
            }
            (ColumnPartition::Bool(column), Cell::Bool(value)) => {
                column.insert(*value);
                Ok(())
            }
            (ColumnPartition::NucleotideSequence(column), Cell::String(sequence)) => {
                column.insert(sequence)
            }
            (ColumnPartition::AminoAcidSequence(column), Cell::String(sequence)) => {
                column.insert(sequence)
            }
            (ColumnPartition::NucleotideInsertion(column), Cell::String(value)) => {
                column.insert(value)
            }
            (ColumnPartition::AminoAcidInsertion(column), Cell::String(value)) => {
                column.insert(value)
            }
            (column, cell) => Err(column.type_mismatch(cell)),
        }
    }

    pub fn insert_null(&mut self) {
        match self {
            ColumnPartition::IndexedString(column) => column.insert_null(),
            ColumnPartition::PlainString(column) => column.insert_null(),
            ColumnPartition::Date(column) => column.insert_null(),
            ColumnPartition::Int(column) => column.insert_null(),
            ColumnPartition::Float(column) => column.insert_null(),
            ColumnPartition::Bool(column) => column.insert_null(),
            ColumnPartition::NucleotideSequence(column) => column.insert_null(),
            ColumnPartition::AminoAcidSequence(column) => column.insert_null(),
            ColumnPartition::NucleotideInsertion(column) => column.insert_null(),
            ColumnPartition::AminoAcidInsertion(column) => column.insert_null(),
        }
    }

    pub fn is_null(&self, row: u32) -> bool {
        match self {
            ColumnPartition::IndexedString(column) => column.is_null(row),
            ColumnPartition::PlainString(column) => column.is_null(row),
            ColumnPartition::Date(column) => column.is_null(row),
            ColumnPartition::Int(column) => column.is_null(row),
            ColumnPartition::Float(column) => column.is_null(row),
            ColumnPartition::Bool(column) => column.is_null(row),
            ColumnPartition::NucleotideSequence(column) => column.null_bitmap().contains(row),
            ColumnPartition::AminoAcidSequence(column) => column.null_bitmap().contains(row),
            ColumnPartition::NucleotideInsertion(column) => column.is_null(row),
            ColumnPartition::AminoAcidInsertion(column) => column.is_null(row),
        }
    }
}
