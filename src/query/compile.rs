//! Expression → operator compilation.
//!
//! Compilation consults one partition's column indexes and produces the
//! operator tree evaluated by the executor. It is total over rewritten
//! expressions; reference errors (unknown column, wrong column type,
//! out-of-range position) surface as `InvalidReference`.
//!
//! Structural folds happen here rather than in the rewriter because they
//! depend on per-partition state: a `DateBetween` turns into a range
//! selection only where the partition is sorted, an `Or` with a negated
//! child compiles through de Morgan to avoid materializing complements,
//! and `NOf` collapses its many trivial cases before a real threshold
//! operator is built.

use crate::common::date::Date;
use crate::common::pattern::SearchPattern;
use crate::common::symbols::{Alphabet, AminoAcid, Nucleotide};
use crate::error::{QueryError, QueryResult};
use crate::query::ast::{AmbiguityMode, Expression};
use crate::query::operators::{Comparator, Operator, Predicate};
use crate::query::rewrite;
use crate::schema::TableSchema;
use crate::storage::column::{
    ColumnPartition, InsertionColumnPartition, SequenceColumnPartition,
};
use crate::storage::table::TablePartition;
use roaring::RoaringBitmap;
use std::borrow::Cow;

/// Per-alphabet access to the column partitions of a [`TablePartition`].
trait SequenceAccess: Alphabet {
    fn sequence_partition<'a>(
        partition: &'a TablePartition,
        name: &str,
    ) -> Option<&'a SequenceColumnPartition<Self>>;

    fn insertion_partition<'a>(
        partition: &'a TablePartition,
        name: &str,
    ) -> Option<&'a InsertionColumnPartition<Self>>;
}

impl SequenceAccess for Nucleotide {
    fn sequence_partition<'a>(
        partition: &'a TablePartition,
        name: &str,
    ) -> Option<&'a SequenceColumnPartition<Nucleotide>> {
        match partition.column(name) {
            Some(ColumnPartition::NucleotideSequence(column)) => Some(column),
            _ => None,
        }
    }

    fn insertion_partition<'a>(
        partition: &'a TablePartition,
        name: &str,
    ) -> Option<&'a InsertionColumnPartition<Nucleotide>> {
        match partition.column(name) {
            Some(ColumnPartition::NucleotideInsertion(column)) => Some(column),
            _ => None,
        }
    }
}

impl SequenceAccess for AminoAcid {
    fn sequence_partition<'a>(
        partition: &'a TablePartition,
        name: &str,
    ) -> Option<&'a SequenceColumnPartition<AminoAcid>> {
        match partition.column(name) {
            Some(ColumnPartition::AminoAcidSequence(column)) => Some(column),
            _ => None,
        }
    }

    fn insertion_partition<'a>(
        partition: &'a TablePartition,
        name: &str,
    ) -> Option<&'a InsertionColumnPartition<AminoAcid>> {
        match partition.column(name) {
            Some(ColumnPartition::AminoAcidInsertion(column)) => Some(column),
            _ => None,
        }
    }
}

fn unknown_column(name: &str) -> QueryError {
    QueryError::InvalidReference(format!("unknown column '{name}'"))
}

fn wrong_type(name: &str, expected: &str) -> QueryError {
    QueryError::InvalidReference(format!("column '{name}' is not a {expected} column"))
}

fn lookup<'a>(partition: &'a TablePartition, name: &str) -> QueryResult<&'a ColumnPartition> {
    partition.column(name).ok_or_else(|| unknown_column(name))
}

/// Compile a rewritten expression against one partition.
pub fn compile<'a>(
    expression: &Expression,
    schema: &TableSchema,
    partition: &'a TablePartition,
) -> QueryResult<Operator<'a>> {
    match expression {
        Expression::True => Ok(Operator::Full),
        Expression::False => Ok(Operator::Empty),
        Expression::And(children) => {
            let compiled = children
                .iter()
                .map(|child| compile(child, schema, partition))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(compile_and(compiled))
        }
        Expression::Or(children) => {
            let compiled = children
                .iter()
                .map(|child| compile(child, schema, partition))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(compile_or(compiled))
        }
        Expression::Not(child) => Ok(compile(child, schema, partition)?.negate()),
        Expression::NOf {
            children,
            number_of_matchers,
            match_exactly,
        } => {
            let compiled = children
                .iter()
                .map(|child| compile(child, schema, partition))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(compile_n_of(compiled, *number_of_matchers, *match_exactly))
        }
        // Pure ambiguity-mode carriers; a rewritten tree no longer has them.
        Expression::Maybe(child) | Expression::Exact(child) => compile(child, schema, partition),
        Expression::DateBetween { column, from, to } => {
            compile_date_between(partition, column, *from, *to)
        }
        Expression::DateEquals { column, value } => {
            let ColumnPartition::Date(date_column) = lookup(partition, column)? else {
                return Err(wrong_type(column, "date"));
            };
            Ok(match value {
                None => Operator::IndexScan {
                    bitmap: date_column.null_bitmap(),
                },
                Some(value) => Operator::Selection {
                    predicates: vec![Predicate::DateCompare {
                        column: date_column,
                        comparator: Comparator::Equals,
                        value: *value,
                        with_nulls: false,
                    }],
                    child: None,
                },
            })
        }
        Expression::IntEquals { column, value } => {
            let ColumnPartition::Int(int_column) = lookup(partition, column)? else {
                return Err(wrong_type(column, "int"));
            };
            Ok(match value {
                None => Operator::IndexScan {
                    bitmap: int_column.null_bitmap(),
                },
                Some(value) => Operator::Selection {
                    predicates: vec![Predicate::IntCompare {
                        column: int_column,
                        comparator: Comparator::Equals,
                        value: *value,
                        with_nulls: false,
                    }],
                    child: None,
                },
            })
        }
        Expression::IntBetween { column, from, to } => {
            let ColumnPartition::Int(int_column) = lookup(partition, column)? else {
                return Err(wrong_type(column, "int"));
            };
            Ok(Operator::Selection {
                predicates: vec![
                    Predicate::IntCompare {
                        column: int_column,
                        comparator: Comparator::GreaterOrEquals,
                        value: from.unwrap_or(i32::MIN + 1),
                        with_nulls: false,
                    },
                    Predicate::IntCompare {
                        column: int_column,
                        comparator: Comparator::LessOrEquals,
                        value: to.unwrap_or(i32::MAX),
                        with_nulls: false,
                    },
                ],
                child: None,
            })
        }
        Expression::FloatEquals { column, value } => {
            let ColumnPartition::Float(float_column) = lookup(partition, column)? else {
                return Err(wrong_type(column, "float"));
            };
            Ok(match value {
                None => Operator::IndexScan {
                    bitmap: float_column.null_bitmap(),
                },
                Some(value) => Operator::Selection {
                    predicates: vec![Predicate::FloatCompare {
                        column: float_column,
                        comparator: Comparator::Equals,
                        value: *value,
                        with_nulls: false,
                    }],
                    child: None,
                },
            })
        }
        Expression::FloatBetween { column, from, to } => {
            let ColumnPartition::Float(float_column) = lookup(partition, column)? else {
                return Err(wrong_type(column, "float"));
            };
            Ok(Operator::Selection {
                predicates: vec![
                    Predicate::FloatCompare {
                        column: float_column,
                        comparator: Comparator::GreaterOrEquals,
                        value: from.unwrap_or(f64::NEG_INFINITY),
                        with_nulls: false,
                    },
                    Predicate::FloatCompare {
                        column: float_column,
                        comparator: Comparator::LessOrEquals,
                        value: to.unwrap_or(f64::INFINITY),
                        with_nulls: false,
                    },
                ],
                child: None,
            })
        }
        Expression::BoolEquals { column, value } => {
            let ColumnPartition::Bool(bool_column) = lookup(partition, column)? else {
                return Err(wrong_type(column, "bool"));
            };
            Ok(Operator::IndexScan {
                bitmap: match value {
                    Some(true) => bool_column.true_bitmap(),
                    Some(false) => bool_column.false_bitmap(),
                    None => bool_column.null_bitmap(),
                },
            })
        }
        Expression::StringEquals { column, value } => match lookup(partition, column)? {
            ColumnPartition::IndexedString(indexed) => Ok(match value {
                None => Operator::IndexScan {
                    bitmap: indexed.null_bitmap(),
                },
                Some(value) => match indexed.filter(value) {
                    Some(bitmap) => Operator::IndexScan { bitmap },
                    None => Operator::Empty,
                },
            }),
            ColumnPartition::PlainString(plain) => Ok(match value {
                None => Operator::IndexScan {
                    bitmap: plain.null_bitmap(),
                },
                Some(value) => Operator::Selection {
                    predicates: vec![Predicate::StringEquals {
                        column: plain,
                        value: value.clone(),
                        negated: false,
                        with_nulls: false,
                    }],
                    child: None,
                },
            }),
            _ => Err(wrong_type(column, "string")),
        },
        Expression::StringInSet { column, values } => match lookup(partition, column)? {
            ColumnPartition::IndexedString(indexed) => {
                let children: Vec<Operator<'a>> = values
                    .iter()
                    .filter_map(|value| indexed.filter(value))
                    .map(|bitmap| Operator::IndexScan { bitmap })
                    .collect();
                Ok(compile_or(children))
            }
            ColumnPartition::PlainString(plain) => Ok(Operator::Selection {
                predicates: vec![Predicate::StringInSet {
                    column: plain,
                    values: values.clone(),
                    negated: false,
                    with_nulls: false,
                }],
                child: None,
            }),
            _ => Err(wrong_type(column, "string")),
        },
        Expression::StringSearch { column, pattern } => {
            let pattern = SearchPattern::parse(pattern)
                .map_err(|error| QueryError::BadRequest(format!("invalid pattern: {error}")))?;
            match lookup(partition, column)? {
                ColumnPartition::IndexedString(indexed) => Ok(Operator::Selection {
                    predicates: vec![Predicate::IndexedStringSearch {
                        column: indexed,
                        pattern,
                        negated: false,
                        with_nulls: false,
                    }],
                    child: None,
                }),
                ColumnPartition::PlainString(plain) => Ok(Operator::Selection {
                    predicates: vec![Predicate::StringSearch {
                        column: plain,
                        pattern,
                        negated: false,
                        with_nulls: false,
                    }],
                    child: None,
                }),
                _ => Err(wrong_type(column, "string")),
            }
        }
        Expression::NucleotideInSet {
            sequence_name,
            position,
            symbols,
        } => compile_symbol_in_set::<Nucleotide>(
            schema,
            partition,
            sequence_name,
            *position,
            symbols,
            "NucleotideInSet",
        ),
        Expression::AminoAcidInSet {
            sequence_name,
            position,
            symbols,
        } => compile_symbol_in_set::<AminoAcid>(
            schema,
            partition,
            sequence_name,
            *position,
            symbols,
            "AminoAcidInSet",
        ),
        // Symbol filters normally lower during rewrite; compiling them
        // directly applies the literal (mode-free) semantics.
        Expression::NucleotideEquals {
            sequence_name,
            position,
            symbol,
        } => {
            let (name, symbols) = rewrite::lower_symbol_equals::<Nucleotide>(
                schema,
                sequence_name,
                *position,
                *symbol,
                AmbiguityMode::None,
                "NucleotideEquals",
            )?;
            compile_symbol_in_set::<Nucleotide>(
                schema,
                partition,
                &Some(name),
                *position,
                &symbols,
                "NucleotideEquals",
            )
        }
        Expression::AminoAcidEquals {
            sequence_name,
            position,
            symbol,
        } => {
            let (name, symbols) = rewrite::lower_symbol_equals::<AminoAcid>(
                schema,
                sequence_name,
                *position,
                *symbol,
                AmbiguityMode::None,
                "AminoAcidEquals",
            )?;
            compile_symbol_in_set::<AminoAcid>(
                schema,
                partition,
                &Some(name),
                *position,
                &symbols,
                "AminoAcidEquals",
            )
        }
        Expression::HasNucleotideMutation {
            sequence_name,
            position,
        } => {
            let (name, symbols) = rewrite::lower_has_mutation::<Nucleotide>(
                schema,
                sequence_name,
                *position,
                AmbiguityMode::UpperBound,
                "HasNucleotideMutation",
            )?;
            compile_symbol_in_set::<Nucleotide>(
                schema,
                partition,
                &Some(name),
                *position,
                &symbols,
                "HasNucleotideMutation",
            )
        }
        Expression::HasAminoAcidMutation {
            sequence_name,
            position,
        } => {
            let (name, symbols) = rewrite::lower_has_mutation::<AminoAcid>(
                schema,
                sequence_name,
                *position,
                AmbiguityMode::UpperBound,
                "HasAminoAcidMutation",
            )?;
            compile_symbol_in_set::<AminoAcid>(
                schema,
                partition,
                &Some(name),
                *position,
                &symbols,
                "HasAminoAcidMutation",
            )
        }
        Expression::NucleotideInsertionContains {
            sequence_name,
            position,
            pattern,
        } => compile_insertion_contains::<Nucleotide>(
            schema,
            partition,
            sequence_name,
            *position,
            pattern,
            "InsertionContains",
        ),
        Expression::AminoAcidInsertionContains {
            sequence_name,
            position,
            pattern,
        } => compile_insertion_contains::<AminoAcid>(
            schema,
            partition,
            sequence_name,
            *position,
            pattern,
            "AminoAcidInsertionContains",
        ),
        Expression::Lineage {
            column,
            value,
            include_sublineages,
            mode,
        } => {
            let ColumnPartition::IndexedString(indexed) = lookup(partition, column)? else {
                return Err(wrong_type(column, "lineage"));
            };
            if indexed.metadata().lineage_tree.is_none() {
                return Err(wrong_type(column, "lineage"));
            }
            let Some(value) = value else {
                return Ok(Operator::IndexScan {
                    bitmap: indexed.null_bitmap(),
                });
            };
            let Some(value_id) = indexed.metadata().dictionary.read().id_of(value) else {
                return Ok(Operator::Empty);
            };
            let bitmap = if *include_sublineages {
                indexed.filter_including_sublineages(value_id, *mode)
            } else {
                indexed.filter_excluding_sublineages(value_id)
            };
            Ok(match bitmap {
                Some(bitmap) => Operator::IndexScan { bitmap },
                None => Operator::Empty,
            })
        }
        Expression::PhyloDescendantOf { column, node } => {
            let ColumnPartition::IndexedString(indexed) = lookup(partition, column)? else {
                return Err(wrong_type(column, "indexed string"));
            };
            let Some(tree) = indexed.metadata().phylo_tree.as_ref() else {
                return Err(QueryError::InvalidReference(format!(
                    "column '{column}' has no phylogenetic tree"
                )));
            };
            let descendants: Vec<String> = tree
                .descendants(node)
                .ok_or_else(|| {
                    QueryError::InvalidReference(format!(
                        "node '{node}' does not exist in the phylogenetic tree of '{column}'"
                    ))
                })?
                .into_iter()
                .map(str::to_string)
                .collect();
            let label = format!("phylo-descendants:{node}");
            Ok(Operator::BitmapProducer {
                producer: Box::new(move || {
                    let bitmaps: Vec<&RoaringBitmap> = descendants
                        .iter()
                        .filter_map(|name| indexed.filter(name))
                        .collect();
                    crate::common::bitmap::fast_union(&bitmaps)
                }),
                label,
            })
        }
        Expression::IsNull { column } => Ok(Operator::IndexScan {
            bitmap: match lookup(partition, column)? {
                ColumnPartition::IndexedString(indexed) => indexed.null_bitmap(),
                ColumnPartition::PlainString(plain) => plain.null_bitmap(),
                ColumnPartition::Date(date) => date.null_bitmap(),
                ColumnPartition::Int(int) => int.null_bitmap(),
                ColumnPartition::Float(float) => float.null_bitmap(),
                ColumnPartition::Bool(bool_column) => bool_column.null_bitmap(),
                ColumnPartition::NucleotideSequence(sequence) => sequence.null_bitmap(),
                ColumnPartition::AminoAcidSequence(sequence) => sequence.null_bitmap(),
                ColumnPartition::NucleotideInsertion(insertion) => insertion.null_bitmap(),
                ColumnPartition::AminoAcidInsertion(insertion) => insertion.null_bitmap(),
            },
        }),
    }
}

fn compile_and(compiled: Vec<Operator<'_>>) -> Operator<'_> {
    let mut children = Vec::new();
    let mut negated_children = Vec::new();
    for operator in compiled {
        match operator {
            Operator::Full => {}
            Operator::Empty => return Operator::Empty,
            Operator::Complement { child } => negated_children.push(*child),
            Operator::Intersection {
                children: nested,
                negated_children: nested_negated,
            } => {
                children.extend(nested);
                negated_children.extend(nested_negated);
            }
            other => children.push(other),
        }
    }
    match (children.len(), negated_children.len()) {
        (0, 0) => Operator::Full,
        (1, 0) => children.pop().expect("one child"),
        (0, _) => Operator::Complement {
            child: Box::new(Operator::Union {
                children: negated_children,
            }),
        },
        _ => Operator::Intersection {
            children,
            negated_children,
        },
    }
}

fn compile_or(compiled: Vec<Operator<'_>>) -> Operator<'_> {
    let mut children = Vec::new();
    for operator in compiled {
        match operator {
            Operator::Empty => {}
            Operator::Full => return Operator::Full,
            Operator::Union { children: nested } => children.extend(nested),
            other => children.push(other),
        }
    }
    if children.is_empty() {
        return Operator::Empty;
    }
    if children.len() == 1 {
        return children.pop().expect("one child");
    }
    let has_complement = children
        .iter()
        .any(|child| matches!(child, Operator::Complement { .. }));
    if has_complement {
        // De Morgan: Or(a, !b, c) = !(And(b, !a, !c)); complements become
        // cheap positive legs instead of materialized inversions.
        let mut positive = Vec::new();
        let mut negated = Vec::new();
        for child in children {
            match child {
                Operator::Complement { child } => positive.push(*child),
                other => negated.push(other),
            }
        }
        return Operator::Complement {
            child: Box::new(Operator::Intersection {
                children: positive,
                negated_children: negated,
            }),
        };
    }
    Operator::Union { children }
}

fn compile_n_of(compiled: Vec<Operator<'_>>, number_of_matchers: u32, match_exactly: bool) -> Operator<'_> {
    let mut children = Vec::new();
    let mut negated_children = Vec::new();
    let mut matchers = i64::from(number_of_matchers);
    for operator in compiled {
        match operator {
            Operator::Empty => {}
            Operator::Full => matchers -= 1,
            Operator::Complement { child } => negated_children.push(*child),
            other => children.push(other),
        }
    }
    let total = (children.len() + negated_children.len()) as i64;

    if matchers > total {
        return Operator::Empty;
    }
    if matchers < 0 {
        return if match_exactly {
            Operator::Empty
        } else {
            Operator::Full
        };
    }
    if matchers == 0 {
        if !match_exactly || total == 0 {
            return Operator::Full;
        }
        // Exactly none: the complement of "any child matches".
        if total == 1 {
            return if children.is_empty() {
                negated_children.pop().expect("one negated child")
            } else {
                Operator::Complement {
                    child: Box::new(children.pop().expect("one child")),
                }
            };
        }
        if negated_children.is_empty() {
            return Operator::Complement {
                child: Box::new(Operator::Union { children }),
            };
        }
        return Operator::Intersection {
            children: negated_children,
            negated_children: children,
        };
    }
    if matchers == 1 && total == 1 {
        return if negated_children.is_empty() {
            children.pop().expect("one child")
        } else {
            Operator::Complement {
                child: Box::new(negated_children.pop().expect("one negated child")),
            }
        };
    }
    if matchers == total {
        // Degenerates to And.
        if children.is_empty() {
            return Operator::Complement {
                child: Box::new(Operator::Union {
                    children: negated_children,
                }),
            };
        }
        return Operator::Intersection {
            children,
            negated_children,
        };
    }
    if matchers == 1 && !match_exactly {
        // Degenerates to Or.
        if negated_children.is_empty() {
            return Operator::Union { children };
        }
        return Operator::Complement {
            child: Box::new(Operator::Intersection {
                children: negated_children,
                negated_children: children,
            }),
        };
    }
    Operator::Threshold {
        children,
        negated_children,
        number_of_matchers: matchers as u32,
        match_exactly,
    }
}

fn compile_date_between<'a>(
    partition: &'a TablePartition,
    column: &str,
    from: Option<Date>,
    to: Option<Date>,
) -> QueryResult<Operator<'a>> {
    let ColumnPartition::Date(date_column) = lookup(partition, column)? else {
        return Err(wrong_type(column, "date"));
    };
    if !date_column.is_sorted() {
        return Ok(Operator::Selection {
            predicates: vec![
                Predicate::DateCompare {
                    column: date_column,
                    comparator: Comparator::GreaterOrEquals,
                    // NULL packs as 0; the smallest real date excludes it.
                    value: from.unwrap_or(Date(1)),
                    with_nulls: false,
                },
                Predicate::DateCompare {
                    column: date_column,
                    comparator: Comparator::LessOrEquals,
                    value: to.unwrap_or(Date::MAX),
                    with_nulls: false,
                },
            ],
            child: None,
        });
    }
    let values = date_column.values();
    let lower_bound = from.unwrap_or(Date(1));
    let lower = values.partition_point(|&date| date < lower_bound) as u32;
    let upper = match to {
        Some(to) => values.partition_point(|&date| date <= to) as u32,
        None => values.len() as u32,
    };
    Ok(Operator::RangeSelection {
        ranges: vec![lower..upper],
    })
}

fn compile_symbol_in_set<'a, A: SequenceAccess>(
    schema: &TableSchema,
    partition: &'a TablePartition,
    sequence_name: &Option<String>,
    position: u32,
    symbols: &[A::Symbol],
    filter_name: &str,
) -> QueryResult<Operator<'a>> {
    let name = rewrite::resolve_sequence_name::<A>(schema, sequence_name, filter_name)?;
    let store = A::sequence_partition(partition, &name)
        .ok_or_else(|| wrong_type(&name, A::NAME))?;
    if position as usize >= store.reference_length() {
        return Err(QueryError::InvalidReference(format!(
            "position {} is out of bounds for sequence '{name}' of length {}",
            position + 1,
            store.reference_length()
        )));
    }
    let children: Vec<Operator<'a>> = symbols
        .iter()
        .map(|&symbol| match store.symbol_bitmap(position as usize, symbol) {
            Cow::Borrowed(bitmap) => Operator::IndexScan { bitmap },
            Cow::Owned(bitmap) => Operator::BitmapScan { bitmap },
        })
        .collect();
    Ok(compile_or(children))
}

fn compile_insertion_contains<'a, A: SequenceAccess>(
    schema: &TableSchema,
    partition: &'a TablePartition,
    sequence_name: &Option<String>,
    position: u32,
    pattern: &str,
    filter_name: &str,
) -> QueryResult<Operator<'a>> {
    let name = rewrite::resolve_sequence_name::<A>(schema, sequence_name, filter_name)?;
    let column = schema
        .insertion_column_for::<A>(&name)
        .ok_or_else(|| {
            QueryError::InvalidReference(format!(
                "sequence '{name}' has no {} insertion column",
                A::NAME
            ))
        })?;
    let insertion = A::insertion_partition(partition, &column.name)
        .ok_or_else(|| wrong_type(&column.name, "insertion"))?;
    // Stored insertion texts are uppercased at ingest; match them that way.
    let pattern = SearchPattern::parse(&pattern.to_ascii_uppercase())
        .map_err(|error| QueryError::BadRequest(format!("invalid pattern: {error}")))?;
    let label = format!("insertion-search:{name}:{position}");
    Ok(Operator::BitmapProducer {
        producer: Box::new(move || insertion.search(&name, position, &pattern)),
        label,
    })
}
