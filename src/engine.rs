//! The engine handle: an atomically swappable database snapshot.
//!
//! Queries read the current snapshot through one atomic load; an external
//! loader (e.g. a directory watcher) pushes replacement snapshots with a
//! single pointer swap. In-flight queries keep their snapshot alive until
//! they finish, so a swap never blocks readers and readers never block a
//! swap.

use crate::error::{QueryError, QueryResult, StorageResult};
use crate::persist::{self, DataVersion};
use crate::query::ast::Expression;
use crate::query::deadline::QueryDeadline;
use crate::query::executor::{evaluate_filter, FilterResult};
use crate::storage::table::{Table, TableInfo};
use arc_swap::ArcSwapOption;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One immutable dataset snapshot: a table plus its version identity.
#[derive(Debug)]
pub struct Database {
    pub table: Table,
    pub data_version: DataVersion,
}

impl Database {
    pub fn new(table: Table, data_version: DataVersion) -> Database {
        Database {
            table,
            data_version,
        }
    }

    /// Run a parsed filter over all partitions.
    pub fn query(
        &self,
        expression: &Expression,
        deadline: &QueryDeadline,
    ) -> QueryResult<FilterResult> {
        evaluate_filter(&self.table, expression, deadline)
    }

    /// Parse a JSON filter and run it.
    pub fn query_json(&self, filter: &str, deadline: &QueryDeadline) -> QueryResult<FilterResult> {
        let expression = Expression::from_json_str(filter)?;
        self.query(&expression, deadline)
    }

    pub fn info(&self) -> TableInfo {
        self.table.info()
    }

    /// Persist this snapshot under `root`.
    pub fn save(&self, root: &Path) -> StorageResult<std::path::PathBuf> {
        persist::save_table(&self.table, &self.data_version, root)
    }

    /// Load a snapshot from a data directory.
    pub fn load(directory: &Path) -> StorageResult<Database> {
        let (table, data_version) = persist::load_table(directory)?;
        Ok(Database {
            table,
            data_version,
        })
    }
}

/// Process-wide engine: the active snapshot and the query worker pool.
pub struct Engine {
    snapshot: ArcSwapOption<Database>,
    pool: rayon::ThreadPool,
    timeout: Option<Duration>,
}

impl Engine {
    pub fn new(
        parallel_threads: usize,
        timeout: Option<Duration>,
    ) -> Result<Engine, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel_threads)
            .thread_name(|index| format!("silo-query-{index}"))
            .build()?;
        Ok(Engine {
            snapshot: ArcSwapOption::const_empty(),
            pool,
            timeout,
        })
    }

    /// Publish a new snapshot. Readers pick it up on their next query.
    pub fn swap(&self, database: Database) {
        info!(
            data_version = database.data_version.timestamp,
            rows = database.table.row_count(),
            "activating data version"
        );
        self.snapshot.store(Some(Arc::new(database)));
    }

    /// The current snapshot, if any data version was activated yet.
    pub fn database(&self) -> Option<Arc<Database>> {
        self.snapshot.load_full()
    }

    /// Parse and evaluate a JSON filter on the worker pool, under the
    /// engine's configured timeout.
    pub fn query_json(&self, filter: &str) -> QueryResult<FilterResult> {
        let Some(database) = self.database() else {
            return Err(QueryError::BadRequest(
                "no data version has been loaded yet".to_string(),
            ));
        };
        let deadline = QueryDeadline::new(self.timeout);
        self.pool
            .install(|| database.query_json(filter, &deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnIdentifier, ColumnType, TableSchema};
    use crate::storage::column::Cell;
    use crate::storage::table::{RowValues, TableAuxiliaries};
    use std::collections::{BTreeMap, HashMap};

    fn small_database(countries: &[&str]) -> Database {
        let schema = TableSchema {
            instance_name: "test".to_string(),
            primary_key: "accession".to_string(),
            default_nucleotide_sequence: None,
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
            ],
            reference_sequences: BTreeMap::new(),
        };
        let mut table = Table::new(schema, TableAuxiliaries::default()).unwrap();
        let partition = table.add_partition();
        for (index, country) in countries.iter().enumerate() {
            let row: RowValues = HashMap::from([
                ("accession".to_string(), Cell::String(format!("k{index}"))),
                ("country".to_string(), Cell::String(country.to_string())),
            ]);
            table.append(partition, &row).unwrap();
        }
        table.finalize(partition);
        Database::new(table, DataVersion::new(1))
    }

    #[test]
    fn queries_read_the_active_snapshot() {
        let engine = Engine::new(2, None).unwrap();
        assert!(engine.query_json(r#"{"type": "True"}"#).is_err());

        engine.swap(small_database(&["CH", "DE"]));
        let result = engine
            .query_json(r#"{"type": "StringEquals", "column": "country", "value": "CH"}"#)
            .unwrap();
        assert_eq!(result.total_matches, 1);
    }

    #[test]
    fn swapping_does_not_invalidate_held_snapshots() {
        let engine = Engine::new(2, None).unwrap();
        engine.swap(small_database(&["CH"]));
        let held = engine.database().unwrap();

        engine.swap(small_database(&["CH", "DE", "FR"]));
        // The held snapshot still answers from the old version.
        assert_eq!(held.table.row_count(), 1);
        assert_eq!(engine.database().unwrap().table.row_count(), 3);
    }
}
