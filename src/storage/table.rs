//! Table and table partitions.
//!
//! A table owns the schema, the shared column metadata (dictionaries,
//! lineage and phylogenetic trees) and the partitions. Partitions are the
//! unit of parallel query evaluation; within a partition rows are densely
//! numbered in insertion order and never removed.
//!
//! The append path is transactional per row: every cell of a row is
//! validated against its column before any column is written, so a failed
//! row leaves the partition exactly as it was.

use crate::common::dictionary::Dictionary;
use crate::common::lineage::LineageTreeAndIdMap;
use crate::common::phylo::PhyloTree;
use crate::common::symbols::{parse_sequence, AminoAcid, Nucleotide};
use crate::error::{AppendError, AppendResult};
use crate::schema::{ColumnType, TableSchema};
use crate::storage::column::{
    Cell, ColumnPartition, IndexedStringColumnPartition, IndexedStringMetadata,
    InsertionColumnPartition, SequenceColumnPartition,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// A decoded input row: cells keyed by column name. Missing columns read
/// as null.
pub type RowValues = HashMap<String, Cell>;

/// Auxiliary structures attached to columns at table construction.
#[derive(Debug, Default)]
pub struct TableAuxiliaries {
    /// Lineage trees, keyed by (pango lineage) column name.
    pub lineage_trees: HashMap<String, LineageTreeAndIdMap>,
    /// Phylogenetic trees, keyed by indexed-string column name.
    pub phylo_trees: HashMap<String, PhyloTree>,
}

/// One partition: a set of column partitions advancing in lockstep.
#[derive(Debug)]
pub struct TablePartition {
    columns: HashMap<String, ColumnPartition>,
    sequence_count: u32,
    finalized: bool,
}

impl TablePartition {
    pub fn sequence_count(&self) -> u32 {
        self.sequence_count
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn column(&self, name: &str) -> Option<&ColumnPartition> {
        self.columns.get(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnPartition)> {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    pub(crate) fn from_raw(
        columns: HashMap<String, ColumnPartition>,
        sequence_count: u32,
        finalized: bool,
    ) -> Self {
        TablePartition {
            columns,
            sequence_count,
            finalized,
        }
    }
}

/// Table-level shared state per column.
#[derive(Debug, Default)]
pub struct TableMetadata {
    pub indexed_string: HashMap<String, Arc<IndexedStringMetadata>>,
    pub insertion_lookups: HashMap<String, Arc<RwLock<Dictionary>>>,
}

#[derive(Debug)]
pub struct Table {
    schema: TableSchema,
    metadata: TableMetadata,
    partitions: Vec<TablePartition>,
    primary_keys: HashSet<String>,
    reference_implicit: bool,
}

impl Table {
    pub fn new(schema: TableSchema, mut auxiliaries: TableAuxiliaries) -> Result<Table, String> {
        schema.validate()?;
        let mut metadata = TableMetadata::default();
        for column in &schema.columns {
            match column.column_type {
                ColumnType::IndexedString => {
                    let shared = match auxiliaries.phylo_trees.remove(&column.name) {
                        Some(tree) => IndexedStringMetadata::with_phylo_tree(&column.name, tree),
                        None => IndexedStringMetadata::new(&column.name),
                    };
                    metadata.indexed_string.insert(column.name.clone(), shared);
                }
                ColumnType::PangoLineageIndexedString => {
                    let tree = auxiliaries.lineage_trees.remove(&column.name).ok_or_else(|| {
                        format!("lineage column '{}' has no lineage definition", column.name)
                    })?;
                    metadata.indexed_string.insert(
                        column.name.clone(),
                        IndexedStringMetadata::with_lineage_tree(&column.name, tree),
                    );
                }
                ColumnType::NucleotideInsertion | ColumnType::AminoAcidInsertion => {
                    metadata
                        .insertion_lookups
                        .insert(column.name.clone(), Arc::new(RwLock::new(Dictionary::new())));
                }
                _ => {}
            }
        }
        Ok(Table {
            schema,
            metadata,
            partitions: Vec::new(),
            primary_keys: HashSet::new(),
            reference_implicit: true,
        })
    }

    /// Switch new partitions to explicit per-symbol bitmaps. The encodings
    /// answer queries identically; explicit trades memory for simpler
    /// reference-symbol reads.
    pub fn set_reference_implicit(&mut self, reference_implicit: bool) {
        self.reference_implicit = reference_implicit;
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    pub fn partitions(&self) -> &[TablePartition] {
        &self.partitions
    }

    pub fn partition(&self, index: usize) -> &TablePartition {
        &self.partitions[index]
    }

    pub fn row_count(&self) -> u64 {
        self.partitions
            .iter()
            .map(|partition| u64::from(partition.sequence_count))
            .sum()
    }

    fn build_column_partition(&self, column_type: ColumnType, name: &str) -> ColumnPartition {
        match column_type {
            ColumnType::IndexedString | ColumnType::PangoLineageIndexedString => {
                let shared = Arc::clone(&self.metadata.indexed_string[name]);
                ColumnPartition::IndexedString(IndexedStringColumnPartition::new(shared))
            }
            ColumnType::String | ColumnType::UnalignedSequence => {
                ColumnPartition::PlainString(Default::default())
            }
            ColumnType::Date => ColumnPartition::Date(Default::default()),
            ColumnType::Int32 => ColumnPartition::Int(Default::default()),
            ColumnType::Float64 => ColumnPartition::Float(Default::default()),
            ColumnType::Bool => ColumnPartition::Bool(Default::default()),
            ColumnType::NucleotideSequence => {
                let reference = parse_sequence::<Nucleotide>(
                    self.schema.reference_sequence(name).unwrap_or_default(),
                )
                .unwrap_or_default();
                ColumnPartition::NucleotideSequence(SequenceColumnPartition::new(
                    name,
                    reference,
                    self.reference_implicit,
                ))
            }
            ColumnType::AminoAcidSequence => {
                let reference = parse_sequence::<AminoAcid>(
                    self.schema.reference_sequence(name).unwrap_or_default(),
                )
                .unwrap_or_default();
                ColumnPartition::AminoAcidSequence(SequenceColumnPartition::new(
                    name,
                    reference,
                    self.reference_implicit,
                ))
            }
            ColumnType::NucleotideInsertion => {
                let column = self.schema.column(name).expect("column exists");
                ColumnPartition::NucleotideInsertion(InsertionColumnPartition::new(
                    name,
                    column.sequence_name.clone(),
                    Arc::clone(&self.metadata.insertion_lookups[name]),
                ))
            }
            ColumnType::AminoAcidInsertion => {
                let column = self.schema.column(name).expect("column exists");
                ColumnPartition::AminoAcidInsertion(InsertionColumnPartition::new(
                    name,
                    column.sequence_name.clone(),
                    Arc::clone(&self.metadata.insertion_lookups[name]),
                ))
            }
        }
    }

    /// Append a fresh, empty partition and return its id.
    pub fn add_partition(&mut self) -> usize {
        let columns = self
            .schema
            .columns
            .iter()
            .map(|column| {
                (
                    column.name.clone(),
                    self.build_column_partition(column.column_type, &column.name),
                )
            })
            .collect();
        self.partitions.push(TablePartition {
            columns,
            sequence_count: 0,
            finalized: false,
        });
        self.partitions.len() - 1
    }

    /// Append one row to a partition. Transactional: on error nothing
    /// changed.
    pub fn append(&mut self, partition_id: usize, row: &RowValues) -> AppendResult<()> {
        assert!(
            !self.partitions[partition_id].finalized,
            "appending to a finalized partition"
        );

        let primary_key = match row.get(&self.schema.primary_key) {
            Some(Cell::String(key)) => key.clone(),
            Some(other) => {
                return Err(AppendError::JsonShape(format!(
                    "primary key '{}' must be a string, got {other:?}",
                    self.schema.primary_key
                )))
            }
            None => {
                return Err(AppendError::JsonShape(format!(
                    "primary key '{}' is missing",
                    self.schema.primary_key
                )))
            }
        };
        if self.primary_keys.contains(&primary_key) {
            return Err(AppendError::DuplicatePrimaryKey(primary_key));
        }

        const NULL: Cell = Cell::Null;
        let partition = &self.partitions[partition_id];
        for column in &self.schema.columns {
            let cell = row.get(&column.name).unwrap_or(&NULL);
            partition.columns[&column.name].validate_cell(cell)?;
        }

        let partition = &mut self.partitions[partition_id];
        for column in &self.schema.columns {
            let cell = row.get(&column.name).unwrap_or(&NULL);
            partition
                .columns
                .get_mut(&column.name)
                .expect("schema column exists")
                .insert_cell(cell)
                .expect("cell was validated");
        }
        partition.sequence_count += 1;
        self.primary_keys.insert(primary_key);
        Ok(())
    }

    /// Build the deferred auxiliary indexes of a partition and freeze it.
    pub fn finalize(&mut self, partition_id: usize) {
        let partition = &mut self.partitions[partition_id];
        for column in partition.columns.values_mut() {
            match column {
                ColumnPartition::NucleotideInsertion(insertion) => {
                    insertion.build_insertion_indexes()
                }
                ColumnPartition::AminoAcidInsertion(insertion) => {
                    insertion.build_insertion_indexes()
                }
                _ => {}
            }
        }
        partition.finalized = true;
        info!(
            partition = partition_id,
            rows = partition.sequence_count,
            "partition finalized"
        );
    }

    /// Structural invariants: every column of every partition has exactly
    /// `sequence_count` rows.
    pub fn validate(&self) -> Result<(), String> {
        for (partition_id, partition) in self.partitions.iter().enumerate() {
            for (name, column) in &partition.columns {
                if column.len() != partition.sequence_count as usize {
                    return Err(format!(
                        "column '{name}' of partition {partition_id} has {} rows, expected {}",
                        column.len(),
                        partition.sequence_count
                    ));
                }
            }
        }
        Ok(())
    }

    /// Row counts and index footprints, per sequence column.
    pub fn info(&self) -> TableInfo {
        let mut sequence_index_bytes = HashMap::new();
        for partition in &self.partitions {
            for (name, column) in &partition.columns {
                let bytes = match column {
                    ColumnPartition::NucleotideSequence(store) => store.size_in_bytes(),
                    ColumnPartition::AminoAcidSequence(store) => store.size_in_bytes(),
                    _ => continue,
                };
                *sequence_index_bytes.entry(name.clone()).or_insert(0) += bytes;
            }
        }
        TableInfo {
            partition_count: self.partitions.len(),
            row_count: self.row_count(),
            sequence_index_bytes,
        }
    }

    pub(crate) fn from_raw(
        schema: TableSchema,
        metadata: TableMetadata,
        partitions: Vec<TablePartition>,
        primary_keys: HashSet<String>,
        reference_implicit: bool,
    ) -> Self {
        Table {
            schema,
            metadata,
            partitions,
            primary_keys,
            reference_implicit,
        }
    }

}

/// Summary statistics of a table, reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub partition_count: usize,
    pub row_count: u64,
    pub sequence_index_bytes: HashMap<String, usize>,
}
