//! Expression rewriting.
//!
//! The rewriter canonicalizes a parsed filter before compilation, applied
//! to fixpoint:
//!
//! - flatten nested `And`/`Or` of the same kind and fold constants
//! - push the ambiguity mode through `Not` (inverting) and fix it at
//!   `Maybe`/`Exact`, which are then eliminated
//! - resolve missing sequence names against the schema defaults and `.`
//!   against the reference symbol
//! - lower `SymbolEquals` and `HasMutation` to `SymbolInSet` under the
//!   active ambiguity mode
//! - merge `SymbolInSet` siblings of one `Or` sharing `(sequence,
//!   position)`, and `StringEquals`/`StringInSet` siblings sharing an
//!   indexed column
//! - decompose an exact `NOf` into `And(>=k, Not(>=k+1))` when a bound is
//!   active, since bounds do not distribute over exact counting
//!
//! The result contains no `Maybe`, `Exact`, `SymbolEquals` or
//! `HasMutation` nodes and rewrites to itself.

use crate::common::symbols::{Alphabet, AlphabetKind, AminoAcid, Nucleotide};
use crate::error::{QueryError, QueryResult};
use crate::query::ast::{AmbiguityMode, Expression, SymbolOrDot};
use crate::schema::{ColumnType, TableSchema};
use std::collections::BTreeMap;

const MAX_REWRITE_ITERATIONS: usize = 10;

/// Rewrite `expression` to its canonical form under `mode`.
pub fn rewrite(
    expression: &Expression,
    schema: &TableSchema,
    mode: AmbiguityMode,
) -> QueryResult<Expression> {
    let mut current = rewrite_node(expression, schema, mode)?;
    for _ in 0..MAX_REWRITE_ITERATIONS {
        let next = rewrite_node(&current, schema, mode)?;
        if next == current {
            break;
        }
        current = next;
    }
    Ok(current)
}

fn expected_sequence_type(kind: AlphabetKind) -> ColumnType {
    match kind {
        AlphabetKind::Nucleotide => ColumnType::NucleotideSequence,
        AlphabetKind::AminoAcid => ColumnType::AminoAcidSequence,
    }
}

/// Resolve an optional sequence name to a validated column name.
pub(crate) fn resolve_sequence_name<A: Alphabet>(
    schema: &TableSchema,
    sequence_name: &Option<String>,
    filter_name: &str,
) -> QueryResult<String> {
    let name = match sequence_name {
        Some(name) => name.clone(),
        None => schema
            .default_sequence_name::<A>()
            .ok_or_else(|| {
                QueryError::BadRequest(format!(
                    "the schema has no default {} sequence; provide 'sequenceName' in the \
                     {filter_name} filter",
                    A::NAME
                ))
            })?
            .to_string(),
    };
    let column = schema.column(&name).ok_or_else(|| {
        QueryError::InvalidReference(format!("unknown sequence column '{name}'"))
    })?;
    if column.column_type != expected_sequence_type(A::KIND) {
        return Err(QueryError::InvalidReference(format!(
            "column '{name}' is not a {} sequence column",
            A::NAME
        )));
    }
    Ok(name)
}

/// Reference symbol of a sequence column at a 0-indexed position.
pub(crate) fn reference_symbol<A: Alphabet>(
    schema: &TableSchema,
    sequence_name: &str,
    position: u32,
) -> QueryResult<A::Symbol> {
    let reference = schema
        .reference_sequence(sequence_name)
        .ok_or_else(|| {
            QueryError::InvalidReference(format!(
                "sequence column '{sequence_name}' has no reference sequence"
            ))
        })?;
    let character = reference.chars().nth(position as usize).ok_or_else(|| {
        QueryError::InvalidReference(format!(
            "position {} is out of bounds for sequence '{sequence_name}' of length {}",
            position + 1,
            reference.chars().count()
        ))
    })?;
    A::from_char(character).ok_or_else(|| {
        QueryError::Internal(format!(
            "reference of '{sequence_name}' holds illegal symbol '{character}'"
        ))
    })
}

fn canonical_symbols<A: Alphabet>(mut symbols: Vec<A::Symbol>) -> Vec<A::Symbol> {
    symbols.sort_unstable_by_key(|&symbol| A::index_of(symbol));
    symbols.dedup();
    symbols
}

/// Lower a symbol-equals filter to the symbol set it matches under `mode`.
pub(crate) fn lower_symbol_equals<A: Alphabet>(
    schema: &TableSchema,
    sequence_name: &Option<String>,
    position: u32,
    symbol: SymbolOrDot<A::Symbol>,
    mode: AmbiguityMode,
    filter_name: &str,
) -> QueryResult<(String, Vec<A::Symbol>)> {
    let name = resolve_sequence_name::<A>(schema, sequence_name, filter_name)?;
    let symbol = match symbol {
        SymbolOrDot::Symbol(symbol) => {
            // Bounds check even without a dot so out-of-range positions are
            // caught before compilation.
            reference_symbol::<A>(schema, &name, position)?;
            symbol
        }
        SymbolOrDot::Dot => reference_symbol::<A>(schema, &name, position)?,
    };
    let symbols = match mode {
        AmbiguityMode::UpperBound => A::ambiguity_expansion(symbol).to_vec(),
        AmbiguityMode::None | AmbiguityMode::LowerBound => vec![symbol],
    };
    Ok((name, canonical_symbols::<A>(symbols)))
}

/// Lower a has-mutation filter to the symbol set it matches under `mode`.
/// Without an explicit bound the upper bound applies.
pub(crate) fn lower_has_mutation<A: Alphabet>(
    schema: &TableSchema,
    sequence_name: &Option<String>,
    position: u32,
    mode: AmbiguityMode,
    filter_name: &str,
) -> QueryResult<(String, Vec<A::Symbol>)> {
    let name = resolve_sequence_name::<A>(schema, sequence_name, filter_name)?;
    let reference = reference_symbol::<A>(schema, &name, position)?;
    let excluded: &[A::Symbol] = match mode {
        // Only the reference symbol itself rules a mutation out.
        AmbiguityMode::UpperBound | AmbiguityMode::None => std::slice::from_ref(&reference),
        // Anything that could still be the reference is not certainly mutated.
        AmbiguityMode::LowerBound => A::ambiguity_expansion(reference),
    };
    let symbols: Vec<A::Symbol> = A::symbols()
        .iter()
        .copied()
        .filter(|symbol| !excluded.contains(symbol))
        .collect();
    Ok((name, canonical_symbols::<A>(symbols)))
}

fn is_indexed_string_column(schema: &TableSchema, column: &str) -> bool {
    schema.column(column).is_some_and(|identifier| {
        matches!(
            identifier.column_type,
            ColumnType::IndexedString | ColumnType::PangoLineageIndexedString
        )
    })
}

/// Merge mergeable children of an `Or`: `SymbolInSet` per `(sequence,
/// position)` and `StringEquals`/`StringInSet` per indexed column.
/// Merged nodes are appended after the remaining children in key order,
/// which keeps the pass idempotent.
fn merge_or_children(schema: &TableSchema, children: Vec<Expression>) -> Vec<Expression> {
    let mut remaining: Vec<Expression> = Vec::new();
    let mut nucleotide_sets: BTreeMap<(String, u32), Vec<crate::common::symbols::NucSymbol>> =
        BTreeMap::new();
    let mut amino_acid_sets: BTreeMap<(String, u32), Vec<crate::common::symbols::AaSymbol>> =
        BTreeMap::new();
    let mut string_sets: BTreeMap<String, std::collections::BTreeSet<String>> = BTreeMap::new();

    for child in children {
        match child {
            Expression::NucleotideInSet {
                sequence_name: Some(name),
                position,
                symbols,
            } => {
                nucleotide_sets
                    .entry((name, position))
                    .or_default()
                    .extend(symbols);
            }
            Expression::AminoAcidInSet {
                sequence_name: Some(name),
                position,
                symbols,
            } => {
                amino_acid_sets
                    .entry((name, position))
                    .or_default()
                    .extend(symbols);
            }
            Expression::StringEquals {
                column,
                value: Some(value),
            } if is_indexed_string_column(schema, &column) => {
                string_sets.entry(column).or_default().insert(value);
            }
            Expression::StringInSet { column, values }
                if is_indexed_string_column(schema, &column) =>
            {
                string_sets.entry(column).or_default().extend(values);
            }
            other => remaining.push(other),
        }
    }

    for ((sequence_name, position), symbols) in nucleotide_sets {
        remaining.push(Expression::NucleotideInSet {
            sequence_name: Some(sequence_name),
            position,
            symbols: canonical_symbols::<Nucleotide>(symbols),
        });
    }
    for ((sequence_name, position), symbols) in amino_acid_sets {
        remaining.push(Expression::AminoAcidInSet {
            sequence_name: Some(sequence_name),
            position,
            symbols: canonical_symbols::<AminoAcid>(symbols),
        });
    }
    for (column, values) in string_sets {
        remaining.push(Expression::StringInSet { column, values });
    }
    remaining
}

fn rewrite_node(
    expression: &Expression,
    schema: &TableSchema,
    mode: AmbiguityMode,
) -> QueryResult<Expression> {
    match expression {
        Expression::And(children) => {
            let mut flattened = Vec::with_capacity(children.len());
            for child in children {
                match rewrite_node(child, schema, mode)? {
                    Expression::True => {}
                    Expression::False => return Ok(Expression::False),
                    Expression::And(nested) => flattened.extend(nested),
                    other => flattened.push(other),
                }
            }
            Ok(match flattened.len() {
                0 => Expression::True,
                1 => flattened.pop().expect("one child"),
                _ => Expression::And(flattened),
            })
        }
        Expression::Or(children) => {
            let mut flattened = Vec::with_capacity(children.len());
            for child in children {
                match rewrite_node(child, schema, mode)? {
                    Expression::False => {}
                    Expression::True => return Ok(Expression::True),
                    Expression::Or(nested) => flattened.extend(nested),
                    other => flattened.push(other),
                }
            }
            let mut merged = merge_or_children(schema, flattened);
            Ok(match merged.len() {
                0 => Expression::False,
                1 => merged.pop().expect("one child"),
                _ => Expression::Or(merged),
            })
        }
        Expression::Not(child) => {
            let inner = rewrite_node(child, schema, mode.invert())?;
            Ok(match inner {
                Expression::True => Expression::False,
                Expression::False => Expression::True,
                Expression::Not(inner) => *inner,
                other => Expression::Not(Box::new(other)),
            })
        }
        Expression::NOf {
            children,
            number_of_matchers,
            match_exactly,
        } => {
            // A bound does not distribute over exact counting; split into
            // ">= k but not >= k+1" and rewrite the parts separately.
            if *match_exactly
                && mode != AmbiguityMode::None
                && (*number_of_matchers as usize) < children.len()
            {
                let at_least_k = Expression::NOf {
                    children: children.clone(),
                    number_of_matchers: *number_of_matchers,
                    match_exactly: false,
                };
                let at_least_k_plus_one = Expression::NOf {
                    children: children.clone(),
                    number_of_matchers: number_of_matchers + 1,
                    match_exactly: false,
                };
                let decomposed = Expression::And(vec![
                    at_least_k,
                    Expression::Not(Box::new(at_least_k_plus_one)),
                ]);
                return rewrite_node(&decomposed, schema, mode);
            }
            let rewritten = children
                .iter()
                .map(|child| rewrite_node(child, schema, mode))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(Expression::NOf {
                children: rewritten,
                number_of_matchers: *number_of_matchers,
                match_exactly: *match_exactly,
            })
        }
        Expression::Maybe(child) => rewrite_node(child, schema, AmbiguityMode::UpperBound),
        Expression::Exact(child) => rewrite_node(child, schema, AmbiguityMode::LowerBound),
        Expression::NucleotideEquals {
            sequence_name,
            position,
            symbol,
        } => {
            let (sequence_name, symbols) = lower_symbol_equals::<Nucleotide>(
                schema,
                sequence_name,
                *position,
                *symbol,
                mode,
                "NucleotideEquals",
            )?;
            Ok(Expression::NucleotideInSet {
                sequence_name: Some(sequence_name),
                position: *position,
                symbols,
            })
        }
        Expression::AminoAcidEquals {
            sequence_name,
            position,
            symbol,
        } => {
            let (sequence_name, symbols) = lower_symbol_equals::<AminoAcid>(
                schema,
                sequence_name,
                *position,
                *symbol,
                mode,
                "AminoAcidEquals",
            )?;
            Ok(Expression::AminoAcidInSet {
                sequence_name: Some(sequence_name),
                position: *position,
                symbols,
            })
        }
        Expression::HasNucleotideMutation {
            sequence_name,
            position,
        } => {
            let (sequence_name, symbols) = lower_has_mutation::<Nucleotide>(
                schema,
                sequence_name,
                *position,
                mode,
                "HasNucleotideMutation",
            )?;
            Ok(Expression::NucleotideInSet {
                sequence_name: Some(sequence_name),
                position: *position,
                symbols,
            })
        }
        Expression::HasAminoAcidMutation {
            sequence_name,
            position,
        } => {
            let (sequence_name, symbols) = lower_has_mutation::<AminoAcid>(
                schema,
                sequence_name,
                *position,
                mode,
                "HasAminoAcidMutation",
            )?;
            Ok(Expression::AminoAcidInSet {
                sequence_name: Some(sequence_name),
                position: *position,
                symbols,
            })
        }
        Expression::NucleotideInSet {
            sequence_name,
            position,
            symbols,
        } => {
            let name =
                resolve_sequence_name::<Nucleotide>(schema, sequence_name, "NucleotideInSet")?;
            Ok(Expression::NucleotideInSet {
                sequence_name: Some(name),
                position: *position,
                symbols: canonical_symbols::<Nucleotide>(symbols.clone()),
            })
        }
        Expression::AminoAcidInSet {
            sequence_name,
            position,
            symbols,
        } => {
            let name =
                resolve_sequence_name::<AminoAcid>(schema, sequence_name, "AminoAcidInSet")?;
            Ok(Expression::AminoAcidInSet {
                sequence_name: Some(name),
                position: *position,
                symbols: canonical_symbols::<AminoAcid>(symbols.clone()),
            })
        }
        Expression::NucleotideInsertionContains {
            sequence_name,
            position,
            pattern,
        } => {
            let name = resolve_sequence_name::<Nucleotide>(
                schema,
                sequence_name,
                "InsertionContains",
            )?;
            Ok(Expression::NucleotideInsertionContains {
                sequence_name: Some(name),
                position: *position,
                pattern: pattern.clone(),
            })
        }
        Expression::AminoAcidInsertionContains {
            sequence_name,
            position,
            pattern,
        } => {
            let name = resolve_sequence_name::<AminoAcid>(
                schema,
                sequence_name,
                "AminoAcidInsertionContains",
            )?;
            Ok(Expression::AminoAcidInsertionContains {
                sequence_name: Some(name),
                position: *position,
                pattern: pattern.clone(),
            })
        }
        // Leaves without ambiguity or resolution concerns pass through.
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::symbols::NucSymbol;
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
                    name: "country".to_string(),
                    column_type: ColumnType::IndexedString,
                    sequence_name: None,
                },
                ColumnIdentifier {
                    name: "comment".to_string(),
                    column_type: ColumnType::String,
                    sequence_name: None,
                },
                ColumnIdentifier {
                    name: "main".to_string(),
                    column_type: ColumnType::NucleotideSequence,
                    sequence_name: None,
                },
            ],
            reference_sequences: BTreeMap::from([("main".to_string(), "ACGT".to_string())]),
        }
    }

    fn rewrite_default(expression: &Expression) -> Expression {
        rewrite(expression, &schema(), AmbiguityMode::None).unwrap()
    }

    fn string_equals(column: &str, value: &str) -> Expression {
        Expression::StringEquals {
            column: column.to_string(),
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn constants_fold_and_flatten() {
        let expression = Expression::And(vec![
            Expression::True,
            Expression::And(vec![string_equals("country", "CH"), Expression::True]),
        ]);
        assert_eq!(rewrite_default(&expression), string_equals("country", "CH"));

        let expression = Expression::Or(vec![Expression::False, Expression::True]);
        assert_eq!(rewrite_default(&expression), Expression::True);

        let expression = Expression::And(vec![string_equals("country", "CH"), Expression::False]);
        assert_eq!(rewrite_default(&expression), Expression::False);

        assert_eq!(rewrite_default(&Expression::Or(vec![])), Expression::False);
        assert_eq!(rewrite_default(&Expression::And(vec![])), Expression::True);
    }

    #[test]
    fn double_negation_cancels() {
        let expression = Expression::Not(Box::new(Expression::Not(Box::new(string_equals(
            "country", "CH",
        )))));
        assert_eq!(rewrite_default(&expression), string_equals("country", "CH"));
    }

    #[test]
    fn or_merges_string_equals_on_indexed_columns() {
        let expression = Expression::Or(vec![
            string_equals("country", "CH"),
            string_equals("country", "DE"),
            string_equals("country", "FR"),
        ]);
        let rewritten = rewrite_default(&expression);
        assert_eq!(
            rewritten,
            Expression::StringInSet {
                column: "country".to_string(),
                values: ["CH", "DE", "FR"].iter().map(|s| s.to_string()).collect(),
            }
        );
    }

    #[test]
    fn or_does_not_merge_plain_string_columns() {
        let expression = Expression::Or(vec![
            string_equals("comment", "a"),
            string_equals("comment", "b"),
        ]);
        assert!(matches!(rewrite_default(&expression), Expression::Or(_)));
    }

    #[test]
    fn symbol_equals_lowers_to_singleton_set() {
        let expression = Expression::NucleotideEquals {
            sequence_name: None,
            position: 1,
            symbol: SymbolOrDot::Symbol(NucSymbol::A),
        };
        assert_eq!(
            rewrite_default(&expression),
            Expression::NucleotideInSet {
                sequence_name: Some("main".to_string()),
                position: 1,
                symbols: vec![NucSymbol::A],
            }
        );
    }

    #[test]
    fn dot_resolves_to_the_reference_symbol() {
        let expression = Expression::NucleotideEquals {
            sequence_name: Some("main".to_string()),
            position: 1,
            symbol: SymbolOrDot::Dot,
        };
        assert_eq!(
            rewrite_default(&expression),
            Expression::NucleotideInSet {
                sequence_name: Some("main".to_string()),
                position: 1,
                symbols: vec![NucSymbol::C],
            }
        );
    }

    #[test]
    fn maybe_expands_the_symbol_set() {
        let expression = Expression::Maybe(Box::new(Expression::NucleotideEquals {
            sequence_name: None,
            position: 0,
            symbol: SymbolOrDot::Symbol(NucSymbol::A),
        }));
        match rewrite_default(&expression) {
            Expression::NucleotideInSet { symbols, .. } => {
                assert!(symbols.contains(&NucSymbol::A));
                assert!(symbols.contains(&NucSymbol::N));
                assert!(symbols.contains(&NucSymbol::R));
                assert!(!symbols.contains(&NucSymbol::C));
            }
            other => panic!("expected NucleotideInSet, got {other}"),
        }
    }

    #[test]
    fn negation_inverts_the_bound() {
        // Maybe(Not(x)) rewrites x under the lower bound.
        let expression = Expression::Maybe(Box::new(Expression::Not(Box::new(
            Expression::NucleotideEquals {
                sequence_name: None,
                position: 0,
                symbol: SymbolOrDot::Symbol(NucSymbol::A),
            },
        ))));
        match rewrite_default(&expression) {
            Expression::Not(inner) => match *inner {
                Expression::NucleotideInSet { ref symbols, .. } => {
                    assert_eq!(symbols, &vec![NucSymbol::A]);
                }
                ref other => panic!("expected NucleotideInSet, got {other}"),
            },
            other => panic!("expected Not, got {other}"),
        }
    }

    #[test]
    fn has_mutation_defaults_to_the_upper_bound() {
        let expression = Expression::HasNucleotideMutation {
            sequence_name: None,
            position: 1,
        };
        match rewrite_default(&expression) {
            Expression::NucleotideInSet { symbols, .. } => {
                // Everything but the reference symbol C.
                assert!(!symbols.contains(&NucSymbol::C));
                assert!(symbols.contains(&NucSymbol::A));
                assert!(symbols.contains(&NucSymbol::N));
                assert_eq!(symbols.len(), Nucleotide::COUNT - 1);
            }
            other => panic!("expected NucleotideInSet, got {other}"),
        }
    }

    #[test]
    fn exact_has_mutation_excludes_possible_reference_codes() {
        let expression = Expression::Exact(Box::new(Expression::HasNucleotideMutation {
            sequence_name: None,
            position: 1,
        }));
        match rewrite_default(&expression) {
            Expression::NucleotideInSet { symbols, .. } => {
                // The expansion of C (C, Y, S, M, B, H, V, N, .) is excluded.
                assert!(!symbols.contains(&NucSymbol::C));
                assert!(!symbols.contains(&NucSymbol::N));
                assert!(!symbols.contains(&NucSymbol::Y));
                assert!(symbols.contains(&NucSymbol::A));
                assert!(symbols.contains(&NucSymbol::Gap));
            }
            other => panic!("expected NucleotideInSet, got {other}"),
        }
    }

    #[test]
    fn exact_nof_decomposes_under_a_bound() {
        let children = vec![
            Expression::NucleotideEquals {
                sequence_name: None,
                position: 0,
                symbol: SymbolOrDot::Symbol(NucSymbol::A),
            },
            Expression::NucleotideEquals {
                sequence_name: None,
                position: 1,
                symbol: SymbolOrDot::Symbol(NucSymbol::C),
            },
        ];
        let expression = Expression::Maybe(Box::new(Expression::NOf {
            children: children.clone(),
            number_of_matchers: 1,
            match_exactly: true,
        }));
        match rewrite_default(&expression) {
            Expression::And(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(
                    parts[0],
                    Expression::NOf {
                        match_exactly: false,
                        number_of_matchers: 1,
                        ..
                    }
                ));
                assert!(matches!(parts[1], Expression::Not(_)));
            }
            other => panic!("expected And, got {other}"),
        }
        // Without a bound the exact NOf stays intact.
        let unbounded = Expression::NOf {
            children,
            number_of_matchers: 1,
            match_exactly: true,
        };
        assert!(matches!(
            rewrite_default(&unbounded),
            Expression::NOf {
                match_exactly: true,
                ..
            }
        ));
    }

    #[test]
    fn rewriting_twice_is_identity() {
        let expressions = [
            Expression::Or(vec![
                string_equals("country", "CH"),
                string_equals("country", "DE"),
                Expression::Not(Box::new(Expression::NucleotideEquals {
                    sequence_name: None,
                    position: 2,
                    symbol: SymbolOrDot::Dot,
                })),
                Expression::Maybe(Box::new(Expression::HasNucleotideMutation {
                    sequence_name: None,
                    position: 0,
                })),
            ]),
            Expression::NOf {
                children: vec![string_equals("country", "CH"), Expression::True],
                number_of_matchers: 2,
                match_exactly: true,
            },
        ];
        for expression in expressions {
            let once = rewrite(&expression, &schema(), AmbiguityMode::None).unwrap();
            let twice = rewrite(&once, &schema(), AmbiguityMode::None).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn out_of_bounds_positions_are_rejected() {
        let expression = Expression::NucleotideEquals {
            sequence_name: None,
            position: 99,
            symbol: SymbolOrDot::Symbol(NucSymbol::A),
        };
        assert!(matches!(
            rewrite(&expression, &schema(), AmbiguityMode::None),
            Err(QueryError::InvalidReference(_))
        ));
    }

    #[test]
    fn missing_default_sequence_is_a_bad_request() {
        let expression = Expression::AminoAcidEquals {
            sequence_name: None,
            position: 0,
            symbol: SymbolOrDot::Dot,
        };
        assert!(matches!(
            rewrite(&expression, &schema(), AmbiguityMode::None),
            Err(QueryError::BadRequest(_))
        ));
    }
}
