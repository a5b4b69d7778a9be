//! Partition-parallel filter evaluation.
//!
//! Partitions are independent: each worker rewrites the filter, compiles
//! it against its partition's indexes and evaluates the operator tree.
//! The shared deadline is cancelled by the first failing partition so the
//! remaining tasks stop at their next operator boundary instead of
//! finishing doomed work.

use crate::error::QueryResult;
use crate::query::ast::{AmbiguityMode, Expression};
use crate::query::compile::compile;
use crate::query::deadline::QueryDeadline;
use crate::query::operators::EvalContext;
use crate::query::rewrite::rewrite;
use crate::storage::table::{Table, TablePartition};
use rayon::prelude::*;
use roaring::RoaringBitmap;
use tracing::{debug, error};

/// The filter core's answer: one row-id set per partition.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub partitions: Vec<RoaringBitmap>,
    pub total_matches: u64,
}

fn evaluate_partition(
    table: &Table,
    partition_id: usize,
    partition: &TablePartition,
    expression: &Expression,
    deadline: &QueryDeadline,
) -> QueryResult<RoaringBitmap> {
    let rewritten = rewrite(expression, table.schema(), AmbiguityMode::None)?;
    debug!(partition = partition_id, filter = %rewritten, "rewritten filter");
    let operator = compile(&rewritten, table.schema(), partition)?;
    debug!(partition = partition_id, operator = %operator, "compiled filter");
    let context = EvalContext {
        row_count: partition.sequence_count(),
        deadline,
    };
    Ok(operator.evaluate(&context)?.into_owned())
}

/// Evaluate `expression` over all partitions of `table`.
pub fn evaluate_filter(
    table: &Table,
    expression: &Expression,
    deadline: &QueryDeadline,
) -> QueryResult<FilterResult> {
    let partitions: Vec<RoaringBitmap> = table
        .partitions()
        .par_iter()
        .enumerate()
        .map(|(partition_id, partition)| {
            evaluate_partition(table, partition_id, partition, expression, deadline).map_err(
                |failure| {
                    if matches!(failure, crate::error::QueryError::Internal(_)) {
                        error!(partition = partition_id, %failure, "invariant violation");
                    }
                    // Stop sibling partitions at their next deadline check.
                    deadline.cancel();
                    failure
                },
            )
        })
        .collect::<QueryResult<_>>()?;

    let total_matches = partitions.iter().map(RoaringBitmap::len).sum();
    Ok(FilterResult {
        partitions,
        total_matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bitmap;
    use crate::schema::{ColumnIdentifier, ColumnType, TableSchema};
    use crate::storage::column::Cell;
    use crate::storage::table::{RowValues, TableAuxiliaries};
    use std::collections::{BTreeMap, HashMap};

    fn table_with_two_partitions() -> Table {
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
        for (partition_values, offset) in [(["CH", "DE"], 0), (["CH", "FR"], 2)] {
            let partition = table.add_partition();
            for (index, country) in partition_values.iter().enumerate() {
                let row: RowValues = HashMap::from([
                    (
                        "accession".to_string(),
                        Cell::String(format!("k{}", offset + index)),
                    ),
                    ("country".to_string(), Cell::String(country.to_string())),
                ]);
                table.append(partition, &row).unwrap();
            }
            table.finalize(partition);
        }
        table
    }

    #[test]
    fn partitions_evaluate_independently() {
        let table = table_with_two_partitions();
        let expression = Expression::StringEquals {
            column: "country".to_string(),
            value: Some("CH".to_string()),
        };
        let result =
            evaluate_filter(&table, &expression, &QueryDeadline::unlimited()).unwrap();
        assert_eq!(result.partitions.len(), 2);
        assert_eq!(result.partitions[0], bitmap::of([0]));
        assert_eq!(result.partitions[1], bitmap::of([0]));
        assert_eq!(result.total_matches, 2);
    }

    #[test]
    fn reference_errors_surface_from_any_partition() {
        let table = table_with_two_partitions();
        let expression = Expression::StringEquals {
            column: "no_such_column".to_string(),
            value: None,
        };
        assert!(evaluate_filter(&table, &expression, &QueryDeadline::unlimited()).is_err());
    }
}
