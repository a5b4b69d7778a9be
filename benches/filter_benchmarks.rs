//! Microbenchmarks for the filter pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use silo::query::{compile, rewrite};
use silo::query::{AmbiguityMode, EvalContext, Expression, QueryDeadline};
use silo::storage::table::{RowValues, TableAuxiliaries};
use silo::storage::Cell;
use silo::{Table, TableSchema};
use std::collections::{BTreeMap, HashMap};

const ROWS: usize = 20_000;

fn build_table() -> Table {
    let schema = TableSchema {
        instance_name: "bench".to_string(),
        primary_key: "accession".to_string(),
        default_nucleotide_sequence: Some("main".to_string()),
        default_amino_acid_sequence: None,
        columns: vec![
            silo::ColumnIdentifier {
                name: "accession".to_string(),
                column_type: silo::ColumnType::String,
                sequence_name: None,
            },
            silo::ColumnIdentifier {
                name: "country".to_string(),
                column_type: silo::ColumnType::IndexedString,
                sequence_name: None,
            },
            silo::ColumnIdentifier {
                name: "main".to_string(),
                column_type: silo::ColumnType::NucleotideSequence,
                sequence_name: None,
            },
        ],
        reference_sequences: BTreeMap::from([("main".to_string(), "ACGTACGTACGT".to_string())]),
    };
    let mut table = Table::new(schema, TableAuxiliaries::default()).unwrap();
    let partition = table.add_partition();
    let countries = ["CH", "DE", "FR", "IT", "AT"];
    let bases = ['A', 'C', 'G', 'T', 'N'];
    for index in 0..ROWS {
        // Mutate one position per row, round-robin over position and base.
        let mut sequence: Vec<char> = "ACGTACGTACGT".chars().collect();
        sequence[index % 12] = bases[index % bases.len()];
        let row: RowValues = HashMap::from([
            ("accession".to_string(), Cell::String(format!("key{index}"))),
            (
                "country".to_string(),
                Cell::String(countries[index % countries.len()].to_string()),
            ),
            (
                "main".to_string(),
                Cell::String(sequence.into_iter().collect()),
            ),
        ]);
        table.append(partition, &row).unwrap();
    }
    table.finalize(partition);
    table
}

fn query(table: &Table, expression: &Expression) -> u64 {
    let rewritten = rewrite(expression, table.schema(), AmbiguityMode::None).unwrap();
    let partition = table.partition(0);
    let operator = compile(&rewritten, table.schema(), partition).unwrap();
    let deadline = QueryDeadline::unlimited();
    let context = EvalContext {
        row_count: partition.sequence_count(),
        deadline: &deadline,
    };
    operator.evaluate(&context).unwrap().len()
}

fn bench_filters(criterion: &mut Criterion) {
    let table = build_table();

    let string_equals = Expression::StringEquals {
        column: "country".to_string(),
        value: Some("CH".to_string()),
    };
    criterion.bench_function("index_scan_string_equals", |bencher| {
        bencher.iter(|| black_box(query(&table, &string_equals)))
    });

    let mutation = Expression::Maybe(Box::new(Expression::HasNucleotideMutation {
        sequence_name: None,
        position: 3,
    }));
    criterion.bench_function("has_mutation_upper_bound", |bencher| {
        bencher.iter(|| black_box(query(&table, &mutation)))
    });

    let combined = Expression::And(vec![
        Expression::StringEquals {
            column: "country".to_string(),
            value: Some("DE".to_string()),
        },
        Expression::Not(Box::new(Expression::NucleotideEquals {
            sequence_name: None,
            position: 5,
            symbol: silo::query::SymbolOrDot::Dot,
        })),
    ]);
    criterion.bench_function("and_with_negated_symbol_filter", |bencher| {
        bencher.iter(|| black_box(query(&table, &combined)))
    });

    let n_of = Expression::NOf {
        children: (0..4u32)
            .map(|position| Expression::HasNucleotideMutation {
                sequence_name: None,
                position,
            })
            .collect(),
        number_of_matchers: 2,
        match_exactly: false,
    };
    criterion.bench_function("threshold_two_of_four", |bencher| {
        bencher.iter(|| black_box(query(&table, &n_of)))
    });
}

criterion_group!(benches, bench_filters);
criterion_main!(benches);
