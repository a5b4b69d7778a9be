//! # SILO
//!
//! A columnar search and analytics engine for large collections of
//! genomic sequences (nucleotide and amino acid) paired with structured
//! metadata. Data is ingested in append-only ndjson batches and queried
//! with a JSON filter DSL that combines metadata predicates with
//! position/symbol predicates over aligned sequences, insertion searches
//! and lineage/phylogeny filters.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Filter JSON
//!     ↓
//! [ast]        → Expression (closed sum type)
//!     ↓
//! [rewrite]    → canonical Expression (constant folding, flattening,
//!                ambiguity bounds, SymbolInSet / StringInSet merging)
//!     ↓  per partition
//! [compile]    → Operator tree over the partition's column indexes
//!     ↓
//! [operators]  → row-id bitmap (copy-on-write, deadline-checked)
//!     ↓
//! FilterResult (one bitmap per partition)
//! ```
//!
//! ### Storage Layout
//!
//! ```text
//! Engine (arc-swap snapshot)
//!   `-- Database
//!         `-- Table (schema, shared dictionaries, trees)
//!               `-- TablePartition (unit of parallel evaluation)
//!                     |-- IndexedStringColumnPartition  (inverted bitmaps)
//!                     |-- StringColumnPartition         (Umbra descriptors)
//!                     |-- Date/Int/Float/Bool columns
//!                     |-- SequenceColumnPartition       (per-position per-symbol bitmaps)
//!                     `-- InsertionColumnPartition      (trigram-indexed insertions)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use silo::{Config, Database, Engine, QueryDeadline};
//!
//! let config = Config::load()?;
//! let engine = Engine::new(config.query.parallel_threads, None)?;
//! let directory = silo::persist::scan_newest_compatible(&config.database.data_directory)?;
//! engine.swap(Database::load(&directory.unwrap())?);
//!
//! let result = engine.query_json(r#"{
//!     "type": "And", "children": [
//!         {"type": "StringEquals", "column": "country", "value": "Switzerland"},
//!         {"type": "HasNucleotideMutation", "position": 241}
//!     ]
//! }"#)?;
//! println!("{} matching rows", result.total_matches);
//! ```

pub mod append;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod query;
pub mod schema;
pub mod storage;

// Re-export the types a driver needs.
pub use append::{ingest_ndjson, IngestReport};
pub use common::{
    Alphabet, AminoAcid, Date, Dictionary, LineageTreeAndIdMap, Nucleotide, PhyloTree,
    RecombinantFollowingMode,
};
pub use config::Config;
pub use engine::{Database, Engine};
pub use error::{
    AppendError, PreprocessingError, QueryError, QueryResult, StorageError, StorageResult,
};
pub use persist::{DataVersion, SERIALIZATION_VERSION};
pub use query::{
    evaluate_filter, AmbiguityMode, Expression, FilterResult, Operator, QueryDeadline,
};
pub use schema::{ColumnIdentifier, ColumnType, TableSchema};
pub use storage::{Cell, RowValues, Table, TableAuxiliaries, TableInfo, TablePartition};
