//! Versioned binary persistence.
//!
//! A data directory is named by a 10-digit Unix timestamp and contains
//! `data_version.silo` (the [`DataVersion`] marker), `schema.yaml` and one
//! binary file per column: shared table-level state (dictionaries, trees)
//! under `table/column_<name>.meta.bin`, per-partition state under
//! `table/partition_<n>/column_<name>.bin`. Every binary file starts with
//! a magic/version header; loading refuses any mismatch outright. All
//! auxiliary indexes are persisted, so a load does no recomputation.

use crate::common::date::Date;
use crate::common::dictionary::{Dictionary, Idx};
use crate::common::lineage::LineageTreeAndIdMap;
use crate::common::phylo::PhyloTree;
use crate::common::symbols::{parse_sequence, Alphabet, AminoAcid, Nucleotide};
use crate::common::umbra::{UmbraString, VariableDataRegistry};
use crate::error::{StorageError, StorageResult};
use crate::schema::{ColumnType, TableSchema};
use crate::storage::column::{
    BoolColumnPartition, ColumnPartition, DateColumnPartition, FloatColumnPartition,
    IndexedStringColumnPartition, IndexedStringMetadata, InsertionColumnPartition,
    IntColumnPartition, SequenceColumnPartition, StringColumnPartition,
};
use crate::storage::lineage_index::LineageIndex;
use crate::storage::table::{Table, TableMetadata, TablePartition};
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Bumped on any change to the on-disk format. Only equal versions load.
pub const SERIALIZATION_VERSION: u32 = 1;

const FILE_MAGIC: [u8; 4] = *b"SILO";
const DATA_VERSION_FILENAME: &str = "data_version.silo";
const SCHEMA_FILENAME: &str = "schema.yaml";

/// Identity of one immutable dataset snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataVersion {
    pub timestamp: u64,
    pub serialization_version: u32,
}

impl DataVersion {
    pub fn new(timestamp: u64) -> DataVersion {
        DataVersion {
            timestamp,
            serialization_version: SERIALIZATION_VERSION,
        }
    }

    /// The directory name this version persists under.
    pub fn directory_name(&self) -> String {
        format!("{:010}", self.timestamp)
    }

    pub fn is_compatible(&self) -> bool {
        self.serialization_version == SERIALIZATION_VERSION
    }
}

#[derive(Serialize, Deserialize)]
struct FileHeader {
    magic: [u8; 4],
    version: u32,
}

fn write_versioned<T: Serialize>(path: &Path, body: &T) -> StorageResult<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    bincode::serialize_into(
        &mut writer,
        &FileHeader {
            magic: FILE_MAGIC,
            version: SERIALIZATION_VERSION,
        },
    )?;
    bincode::serialize_into(&mut writer, body)?;
    Ok(())
}

fn read_versioned<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let header: FileHeader = bincode::deserialize_from(&mut reader)?;
    if header.magic != FILE_MAGIC {
        return Err(StorageError::Corrupt(format!(
            "'{}' is not a column file",
            path.display()
        )));
    }
    if header.version != SERIALIZATION_VERSION {
        return Err(StorageError::IncompatibleVersion {
            expected: SERIALIZATION_VERSION,
            found: header.version,
        });
    }
    Ok(bincode::deserialize_from(&mut reader)?)
}

type Bytes = Vec<u8>;

fn bitmap_bytes(bitmap: &RoaringBitmap) -> Bytes {
    let mut bytes = Vec::with_capacity(bitmap.serialized_size());
    bitmap
        .serialize_into(&mut bytes)
        .expect("writing to a vector cannot fail");
    bytes
}

fn bitmap_from_bytes(bytes: &[u8]) -> StorageResult<RoaringBitmap> {
    Ok(RoaringBitmap::deserialize_from(bytes)?)
}

fn bitmap_map_bytes(map: &HashMap<Idx, RoaringBitmap>) -> Vec<(Idx, Bytes)> {
    let mut entries: Vec<(Idx, Bytes)> = map
        .iter()
        .map(|(&id, bitmap)| (id, bitmap_bytes(bitmap)))
        .collect();
    entries.sort_unstable_by_key(|(id, _)| *id);
    entries
}

fn bitmap_map_from_bytes(entries: Vec<(Idx, Bytes)>) -> StorageResult<HashMap<Idx, RoaringBitmap>> {
    entries
        .into_iter()
        .map(|(id, bytes)| Ok((id, bitmap_from_bytes(&bytes)?)))
        .collect()
}

/// Table-level shared state of a column.
#[derive(Serialize, Deserialize)]
enum ColumnMetaState {
    IndexedString {
        dictionary: Dictionary,
        lineage_tree: Option<LineageTreeAndIdMap>,
        phylo_tree: Option<PhyloTree>,
    },
    InsertionLookup {
        dictionary: Dictionary,
    },
}

/// Per-partition serialized state of a column, tagged by kind.
#[derive(Serialize, Deserialize)]
enum ColumnState {
    IndexedString {
        value_ids: Vec<Idx>,
        indexed_values: Vec<(Idx, Bytes)>,
        null_bitmap: Bytes,
        lineage_index: Option<[Vec<(Idx, Bytes)>; 4]>,
    },
    PlainString {
        values: Vec<UmbraString>,
        registry: VariableDataRegistry,
        null_bitmap: Bytes,
    },
    Date {
        values: Vec<Date>,
        null_bitmap: Bytes,
        is_sorted: bool,
    },
    Int {
        values: Vec<i32>,
        null_bitmap: Bytes,
    },
    Float {
        values: Vec<f64>,
        null_bitmap: Bytes,
    },
    Bool {
        true_bitmap: Bytes,
        false_bitmap: Bytes,
        null_bitmap: Bytes,
        row_count: u32,
    },
    Sequence {
        positions: Vec<Vec<Bytes>>,
        null_bitmap: Bytes,
        row_count: u32,
        reference_implicit: bool,
    },
    Insertion {
        value_ids: Vec<Idx>,
        indexes: Vec<(String, Vec<(u32, Vec<(String, Bytes)>)>)>,
        null_bitmap: Bytes,
    },
}

fn encode_sequence<A: Alphabet>(column: &SequenceColumnPartition<A>) -> ColumnState {
    ColumnState::Sequence {
        positions: (0..column.reference_length())
            .map(|position| {
                column
                    .position_bitmaps(position)
                    .iter()
                    .map(bitmap_bytes)
                    .collect()
            })
            .collect(),
        null_bitmap: bitmap_bytes(column.null_bitmap()),
        row_count: column.len() as u32,
        reference_implicit: column.is_reference_implicit(),
    }
}

fn encode_insertion<A: Alphabet>(column: &InsertionColumnPartition<A>) -> ColumnState {
    let mut indexes: Vec<(String, Vec<(u32, Vec<(String, Bytes)>)>)> = column
        .indexes()
        .iter()
        .map(|(sequence_name, index)| {
            (
                sequence_name.clone(),
                index
                    .parts()
                    .into_iter()
                    .map(|(position, insertions)| {
                        (
                            position,
                            insertions
                                .into_iter()
                                .map(|(text, rows)| (text.to_string(), bitmap_bytes(rows)))
                                .collect(),
                        )
                    })
                    .collect(),
            )
        })
        .collect();
    indexes.sort_by(|(left, _), (right, _)| left.cmp(right));
    ColumnState::Insertion {
        value_ids: column.value_ids().to_vec(),
        indexes,
        null_bitmap: bitmap_bytes(column.null_bitmap()),
    }
}

fn encode_column(column: &ColumnPartition) -> ColumnState {
    match column {
        ColumnPartition::IndexedString(column) => ColumnState::IndexedString {
            value_ids: column.value_ids().to_vec(),
            indexed_values: bitmap_map_bytes(column.indexed_values()),
            null_bitmap: bitmap_bytes(column.null_bitmap()),
            lineage_index: column.lineage_index().map(|index| {
                let [excluding, do_not_follow, contained, always] = index.parts();
                [
                    bitmap_map_bytes(excluding),
                    bitmap_map_bytes(do_not_follow),
                    bitmap_map_bytes(contained),
                    bitmap_map_bytes(always),
                ]
            }),
        },
        ColumnPartition::PlainString(column) => ColumnState::PlainString {
            values: column.values().to_vec(),
            registry: column.registry().clone(),
            null_bitmap: bitmap_bytes(column.null_bitmap()),
        },
        ColumnPartition::Date(column) => ColumnState::Date {
            values: column.values().to_vec(),
            null_bitmap: bitmap_bytes(column.null_bitmap()),
            is_sorted: column.is_sorted(),
        },
        ColumnPartition::Int(column) => ColumnState::Int {
            values: column.values().to_vec(),
            null_bitmap: bitmap_bytes(column.null_bitmap()),
        },
        ColumnPartition::Float(column) => ColumnState::Float {
            values: column.values().to_vec(),
            null_bitmap: bitmap_bytes(column.null_bitmap()),
        },
        ColumnPartition::Bool(column) => ColumnState::Bool {
            true_bitmap: bitmap_bytes(column.true_bitmap()),
            false_bitmap: bitmap_bytes(column.false_bitmap()),
            null_bitmap: bitmap_bytes(column.null_bitmap()),
            row_count: column.len() as u32,
        },
        ColumnPartition::NucleotideSequence(column) => encode_sequence(column),
        ColumnPartition::AminoAcidSequence(column) => encode_sequence(column),
        ColumnPartition::NucleotideInsertion(column) => encode_insertion(column),
        ColumnPartition::AminoAcidInsertion(column) => encode_insertion(column),
    }
}

fn decode_bitmaps(positions: Vec<Vec<Bytes>>) -> StorageResult<Vec<Vec<RoaringBitmap>>> {
    positions
        .into_iter()
        .map(|bitmaps| bitmaps.iter().map(|bytes| bitmap_from_bytes(bytes)).collect())
        .collect()
}

fn decode_sequence<A: Alphabet>(
    name: &str,
    schema: &TableSchema,
    state: ColumnState,
) -> StorageResult<SequenceColumnPartition<A>> {
    let ColumnState::Sequence {
        positions,
        null_bitmap,
        row_count,
        reference_implicit,
    } = state
    else {
        return Err(StorageError::Corrupt(format!(
            "column '{name}' holds the wrong column kind"
        )));
    };
    let reference = parse_sequence::<A>(schema.reference_sequence(name).unwrap_or_default())
        .map_err(|(symbol, position)| {
            StorageError::Corrupt(format!(
                "reference of '{name}' holds illegal symbol '{symbol}' at {position}"
            ))
        })?;
    if reference.len() != positions.len() {
        return Err(StorageError::Corrupt(format!(
            "column '{name}' has {} positions, the reference has {}",
            positions.len(),
            reference.len()
        )));
    }
    Ok(SequenceColumnPartition::from_parts(
        name.to_string(),
        reference,
        decode_bitmaps(positions)?,
        bitmap_from_bytes(&null_bitmap)?,
        row_count,
        reference_implicit,
    ))
}

fn decode_insertion_indexes(
    indexes: Vec<(String, Vec<(u32, Vec<(String, Bytes)>)>)>,
) -> StorageResult<Vec<(String, Vec<(u32, Vec<(String, RoaringBitmap)>)>)>> {
    indexes
        .into_iter()
        .map(|(sequence_name, positions)| {
            let decoded = positions
                .into_iter()
                .map(|(position, insertions)| {
                    let insertions = insertions
                        .into_iter()
                        .map(|(text, bytes)| Ok((text, bitmap_from_bytes(&bytes)?)))
                        .collect::<StorageResult<Vec<_>>>()?;
                    Ok((position, insertions))
                })
                .collect::<StorageResult<Vec<_>>>()?;
            Ok((sequence_name, decoded))
        })
        .collect()
}

fn decode_column(
    name: &str,
    column_type: ColumnType,
    schema: &TableSchema,
    metadata: &TableMetadata,
    state: ColumnState,
) -> StorageResult<ColumnPartition> {
    let corrupt = || StorageError::Corrupt(format!("column '{name}' holds the wrong column kind"));
    Ok(match column_type {
        ColumnType::IndexedString | ColumnType::PangoLineageIndexedString => {
            let ColumnState::IndexedString {
                value_ids,
                indexed_values,
                null_bitmap,
                lineage_index,
            } = state
            else {
                return Err(corrupt());
            };
            let shared = Arc::clone(metadata.indexed_string.get(name).ok_or_else(corrupt)?);
            let lineage_index = match lineage_index {
                None => None,
                Some([excluding, do_not_follow, contained, always]) => {
                    Some(LineageIndex::from_parts([
                        bitmap_map_from_bytes(excluding)?,
                        bitmap_map_from_bytes(do_not_follow)?,
                        bitmap_map_from_bytes(contained)?,
                        bitmap_map_from_bytes(always)?,
                    ]))
                }
            };
            ColumnPartition::IndexedString(IndexedStringColumnPartition::from_parts(
                shared,
                value_ids,
                bitmap_map_from_bytes(indexed_values)?,
                bitmap_from_bytes(&null_bitmap)?,
                lineage_index,
            ))
        }
        ColumnType::String | ColumnType::UnalignedSequence => {
            let ColumnState::PlainString {
                values,
                registry,
                null_bitmap,
            } = state
            else {
                return Err(corrupt());
            };
            ColumnPartition::PlainString(StringColumnPartition::from_parts(
                values,
                registry,
                bitmap_from_bytes(&null_bitmap)?,
            ))
        }
        ColumnType::Date => {
            let ColumnState::Date {
                values,
                null_bitmap,
                is_sorted,
            } = state
            else {
                return Err(corrupt());
            };
            ColumnPartition::Date(DateColumnPartition::from_parts(
                values,
                bitmap_from_bytes(&null_bitmap)?,
                is_sorted,
            ))
        }
        ColumnType::Int32 => {
            let ColumnState::Int { values, null_bitmap } = state else {
                return Err(corrupt());
            };
            ColumnPartition::Int(IntColumnPartition::from_parts(
                values,
                bitmap_from_bytes(&null_bitmap)?,
            ))
        }
        ColumnType::Float64 => {
            let ColumnState::Float { values, null_bitmap } = state else {
                return Err(corrupt());
            };
            ColumnPartition::Float(FloatColumnPartition::from_parts(
                values,
                bitmap_from_bytes(&null_bitmap)?,
            ))
        }
        ColumnType::Bool => {
            let ColumnState::Bool {
                true_bitmap,
                false_bitmap,
                null_bitmap,
                row_count,
            } = state
            else {
                return Err(corrupt());
            };
            ColumnPartition::Bool(BoolColumnPartition::from_parts(
                bitmap_from_bytes(&true_bitmap)?,
                bitmap_from_bytes(&false_bitmap)?,
                bitmap_from_bytes(&null_bitmap)?,
                row_count,
            ))
        }
        ColumnType::NucleotideSequence => {
            ColumnPartition::NucleotideSequence(decode_sequence::<Nucleotide>(name, schema, state)?)
        }
        ColumnType::AminoAcidSequence => {
            ColumnPartition::AminoAcidSequence(decode_sequence::<AminoAcid>(name, schema, state)?)
        }
        ColumnType::NucleotideInsertion | ColumnType::AminoAcidInsertion => {
            let ColumnState::Insertion {
                value_ids,
                indexes,
                null_bitmap,
            } = state
            else {
                return Err(corrupt());
            };
            let lookup = Arc::clone(metadata.insertion_lookups.get(name).ok_or_else(corrupt)?);
            let sequence_name = schema
                .column(name)
                .and_then(|column| column.sequence_name.clone());
            let decoded = decode_insertion_indexes(indexes)?;
            let null_bitmap = bitmap_from_bytes(&null_bitmap)?;
            if column_type == ColumnType::NucleotideInsertion {
                ColumnPartition::NucleotideInsertion(InsertionColumnPartition::from_parts(
                    name.to_string(),
                    sequence_name,
                    lookup,
                    value_ids,
                    decoded,
                    null_bitmap,
                ))
            } else {
                ColumnPartition::AminoAcidInsertion(InsertionColumnPartition::from_parts(
                    name.to_string(),
                    sequence_name,
                    lookup,
                    value_ids,
                    decoded,
                    null_bitmap,
                ))
            }
        }
    })
}

fn meta_file(table_dir: &Path, column: &str) -> PathBuf {
    table_dir.join(format!("column_{column}.meta.bin"))
}

fn column_file(partition_dir: &Path, column: &str) -> PathBuf {
    partition_dir.join(format!("column_{column}.bin"))
}

/// Persist a table under `root/<data version>/`, returning the directory.
pub fn save_table(
    table: &Table,
    data_version: &DataVersion,
    root: &Path,
) -> StorageResult<PathBuf> {
    let directory = root.join(data_version.directory_name());
    let table_dir = directory.join("table");
    fs::create_dir_all(&table_dir)?;

    let version_bytes = bincode::serialize(data_version)?;
    fs::write(directory.join(DATA_VERSION_FILENAME), version_bytes)?;
    fs::write(
        directory.join(SCHEMA_FILENAME),
        serde_yaml::to_string(table.schema())?,
    )?;

    for (name, shared) in &table.metadata().indexed_string {
        write_versioned(
            &meta_file(&table_dir, name),
            &ColumnMetaState::IndexedString {
                dictionary: shared.dictionary.read().clone(),
                lineage_tree: shared.lineage_tree.clone(),
                phylo_tree: shared.phylo_tree.clone(),
            },
        )?;
    }
    for (name, lookup) in &table.metadata().insertion_lookups {
        write_versioned(
            &meta_file(&table_dir, name),
            &ColumnMetaState::InsertionLookup {
                dictionary: lookup.read().clone(),
            },
        )?;
    }

    for (partition_id, partition) in table.partitions().iter().enumerate() {
        let partition_dir = table_dir.join(format!("partition_{partition_id}"));
        fs::create_dir_all(&partition_dir)?;
        for (name, column) in partition.columns() {
            write_versioned(&column_file(&partition_dir, name), &encode_column(column))?;
        }
    }
    info!(
        directory = %directory.display(),
        partitions = table.partitions().len(),
        "saved data version"
    );
    Ok(directory)
}

/// Check the data-version marker of a directory: present, timestamp equal
/// to the directory name, compatible serialization version.
pub fn validate_data_directory(directory: &Path) -> StorageResult<DataVersion> {
    let invalid = |reason: &str| StorageError::InvalidDataDirectory {
        path: directory.display().to_string(),
        reason: reason.to_string(),
    };
    let name = directory
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| invalid("unnamed directory"))?;
    if name.len() != 10 || !name.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(invalid("directory name is not a 10-digit timestamp"));
    }
    let marker = directory.join(DATA_VERSION_FILENAME);
    if !marker.is_file() {
        return Err(invalid("data_version.silo is missing"));
    }
    let data_version: DataVersion = bincode::deserialize(&fs::read(marker)?)?;
    if data_version.directory_name() != name {
        return Err(invalid("timestamp does not match the directory name"));
    }
    if !data_version.is_compatible() {
        return Err(StorageError::IncompatibleVersion {
            expected: SERIALIZATION_VERSION,
            found: data_version.serialization_version,
        });
    }
    Ok(data_version)
}

/// Load a table from a validated data directory.
pub fn load_table(directory: &Path) -> StorageResult<(Table, DataVersion)> {
    let data_version = validate_data_directory(directory)?;
    let schema: TableSchema = serde_yaml::from_str(&fs::read_to_string(
        directory.join(SCHEMA_FILENAME),
    )?)?;
    schema.validate().map_err(StorageError::Corrupt)?;
    let table_dir = directory.join("table");

    let mut metadata = TableMetadata::default();
    for column in &schema.columns {
        match column.column_type {
            ColumnType::IndexedString | ColumnType::PangoLineageIndexedString => {
                let state: ColumnMetaState = read_versioned(&meta_file(&table_dir, &column.name))?;
                let ColumnMetaState::IndexedString {
                    mut dictionary,
                    mut lineage_tree,
                    mut phylo_tree,
                } = state
                else {
                    return Err(StorageError::Corrupt(format!(
                        "metadata of column '{}' holds the wrong kind",
                        column.name
                    )));
                };
                dictionary.rebuild_reverse_index();
                if let Some(tree) = lineage_tree.as_mut() {
                    tree.lookup.rebuild_reverse_index();
                }
                if let Some(tree) = phylo_tree.as_mut() {
                    tree.rebuild_lookup();
                }
                metadata.indexed_string.insert(
                    column.name.clone(),
                    IndexedStringMetadata::from_parts(
                        column.name.clone(),
                        dictionary,
                        lineage_tree,
                        phylo_tree,
                    ),
                );
            }
            ColumnType::NucleotideInsertion | ColumnType::AminoAcidInsertion => {
                let state: ColumnMetaState = read_versioned(&meta_file(&table_dir, &column.name))?;
                let ColumnMetaState::InsertionLookup { mut dictionary } = state else {
                    return Err(StorageError::Corrupt(format!(
                        "metadata of column '{}' holds the wrong kind",
                        column.name
                    )));
                };
                dictionary.rebuild_reverse_index();
                metadata
                    .insertion_lookups
                    .insert(column.name.clone(), Arc::new(RwLock::new(dictionary)));
            }
            _ => {}
        }
    }

    let mut partitions = Vec::new();
    let mut primary_keys: HashSet<String> = HashSet::new();
    for partition_id in 0.. {
        let partition_dir = table_dir.join(format!("partition_{partition_id}"));
        if !partition_dir.is_dir() {
            break;
        }
        let mut columns: HashMap<String, ColumnPartition> = HashMap::new();
        for column in &schema.columns {
            let state: ColumnState = read_versioned(&column_file(&partition_dir, &column.name))?;
            columns.insert(
                column.name.clone(),
                decode_column(&column.name, column.column_type, &schema, &metadata, state)?,
            );
        }
        let key_column = columns
            .get(&schema.primary_key)
            .ok_or_else(|| StorageError::Corrupt("primary key column missing".to_string()))?;
        let sequence_count = key_column.len() as u32;
        for row in 0..sequence_count {
            let key = match key_column {
                ColumnPartition::PlainString(column) => column.value(row),
                ColumnPartition::IndexedString(column) => column.value(row),
                _ => None,
            };
            if let Some(key) = key {
                primary_keys.insert(key);
            }
        }
        partitions.push(TablePartition::from_raw(columns, sequence_count, true));
    }

    let table = Table::from_raw(schema, metadata, partitions, primary_keys, true);
    table.validate().map_err(StorageError::Corrupt)?;
    info!(
        directory = %directory.display(),
        rows = table.row_count(),
        "loaded data version"
    );
    Ok((table, data_version))
}

/// Pick the newest compatible data directory under `root`.
/// Invalid and incompatible directories are skipped with a warning.
pub fn scan_newest_compatible(root: &Path) -> StorageResult<Option<PathBuf>> {
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match validate_data_directory(&path) {
            Ok(data_version) => {
                if best
                    .as_ref()
                    .is_none_or(|(timestamp, _)| *timestamp < data_version.timestamp)
                {
                    best = Some((data_version.timestamp, path));
                }
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping data directory");
            }
        }
    }
    Ok(best.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_version_directory_name_is_zero_padded() {
        assert_eq!(DataVersion::new(1234).directory_name(), "0000001234");
        assert_eq!(DataVersion::new(1700000000).directory_name(), "1700000000");
    }

    #[test]
    fn incompatible_versions_do_not_validate() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("0000000042");
        fs::create_dir_all(&path).unwrap();
        let stale = DataVersion {
            timestamp: 42,
            serialization_version: SERIALIZATION_VERSION + 1,
        };
        fs::write(
            path.join(DATA_VERSION_FILENAME),
            bincode::serialize(&stale).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            validate_data_directory(&path),
            Err(StorageError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn mismatched_directory_names_do_not_validate() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("0000000042");
        fs::create_dir_all(&path).unwrap();
        fs::write(
            path.join(DATA_VERSION_FILENAME),
            bincode::serialize(&DataVersion::new(43)).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            validate_data_directory(&path),
            Err(StorageError::InvalidDataDirectory { .. })
        ));
    }

    #[test]
    fn scan_skips_invalid_directories() {
        let root = tempfile::tempdir().unwrap();
        // A valid directory.
        let valid = root.path().join("0000000100");
        fs::create_dir_all(&valid).unwrap();
        fs::write(
            valid.join(DATA_VERSION_FILENAME),
            bincode::serialize(&DataVersion::new(100)).unwrap(),
        )
        .unwrap();
        // Newer but missing its marker.
        fs::create_dir_all(root.path().join("0000000200")).unwrap();
        // Not a timestamp at all.
        fs::create_dir_all(root.path().join("scratch")).unwrap();

        let newest = scan_newest_compatible(root.path()).unwrap();
        assert_eq!(newest, Some(valid));
    }
}
