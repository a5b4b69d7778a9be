//! Filter expression AST.
//!
//! A closed sum type over every filter node the JSON DSL knows. Parsing is
//! explicit (no serde tagging): each node checks its own fields and
//! produces a precise `BadRequest` on violation, including the 1-indexed
//! position convention of the wire format. `Display` renders the compact
//! notation used in query logs.

use crate::common::date::Date;
use crate::common::lineage::RecombinantFollowingMode;
use crate::common::pattern::SearchPattern;
use crate::common::symbols::{AaSymbol, Alphabet, AminoAcid, NucSymbol, Nucleotide};
use crate::error::{QueryError, QueryResult};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Ambiguity semantics of symbol filters, threaded through rewriting.
///
/// `UpperBound` matches everything that *could* be the target symbol,
/// `LowerBound` only what *certainly* is. Negation swaps the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbiguityMode {
    None,
    UpperBound,
    LowerBound,
}

impl AmbiguityMode {
    pub fn invert(self) -> AmbiguityMode {
        match self {
            AmbiguityMode::UpperBound => AmbiguityMode::LowerBound,
            AmbiguityMode::LowerBound => AmbiguityMode::UpperBound,
            AmbiguityMode::None => AmbiguityMode::None,
        }
    }
}

/// A symbol literal or `.`, which stands for the reference symbol at the
/// filter's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolOrDot<S> {
    Symbol(S),
    Dot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    True,
    False,
    And(Vec<Expression>),
    Or(Vec<Expression>),
    NOf {
        children: Vec<Expression>,
        number_of_matchers: u32,
        match_exactly: bool,
    },
    Not(Box<Expression>),
    Maybe(Box<Expression>),
    Exact(Box<Expression>),
    DateBetween {
        column: String,
        from: Option<Date>,
        to: Option<Date>,
    },
    DateEquals {
        column: String,
        value: Option<Date>,
    },
    IntEquals {
        column: String,
        value: Option<i32>,
    },
    IntBetween {
        column: String,
        from: Option<i32>,
        to: Option<i32>,
    },
    FloatEquals {
        column: String,
        value: Option<f64>,
    },
    FloatBetween {
        column: String,
        from: Option<f64>,
        to: Option<f64>,
    },
    BoolEquals {
        column: String,
        value: Option<bool>,
    },
    StringEquals {
        column: String,
        value: Option<String>,
    },
    StringInSet {
        column: String,
        values: BTreeSet<String>,
    },
    StringSearch {
        column: String,
        pattern: String,
    },
    NucleotideEquals {
        sequence_name: Option<String>,
        position: u32,
        symbol: SymbolOrDot<NucSymbol>,
    },
    AminoAcidEquals {
        sequence_name: Option<String>,
        position: u32,
        symbol: SymbolOrDot<AaSymbol>,
    },
    NucleotideInSet {
        sequence_name: Option<String>,
        position: u32,
        symbols: Vec<NucSymbol>,
    },
    AminoAcidInSet {
        sequence_name: Option<String>,
        position: u32,
        symbols: Vec<AaSymbol>,
    },
    HasNucleotideMutation {
        sequence_name: Option<String>,
        position: u32,
    },
    HasAminoAcidMutation {
        sequence_name: Option<String>,
        position: u32,
    },
    NucleotideInsertionContains {
        sequence_name: Option<String>,
        position: u32,
        pattern: String,
    },
    AminoAcidInsertionContains {
        sequence_name: Option<String>,
        position: u32,
        pattern: String,
    },
    Lineage {
        column: String,
        value: Option<String>,
        include_sublineages: bool,
        mode: RecombinantFollowingMode,
    },
    PhyloDescendantOf {
        column: String,
        node: String,
    },
    IsNull {
        column: String,
    },
}

fn bad(message: impl Into<String>) -> QueryError {
    QueryError::BadRequest(message.into())
}

fn field<'a>(object: &'a Value, name: &str, node: &str) -> QueryResult<&'a Value> {
    object
        .get(name)
        .ok_or_else(|| bad(format!("the field '{name}' is required in a {node} expression")))
}

fn string_field(object: &Value, name: &str, node: &str) -> QueryResult<String> {
    field(object, name, node)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| bad(format!("the field '{name}' in a {node} expression must be a string")))
}

fn optional_string_field(object: &Value, name: &str, node: &str) -> QueryResult<Option<String>> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(bad(format!(
            "the field '{name}' in a {node} expression must be a string or null"
        ))),
    }
}

fn bool_field(object: &Value, name: &str, node: &str) -> QueryResult<bool> {
    field(object, name, node)?
        .as_bool()
        .ok_or_else(|| bad(format!("the field '{name}' in a {node} expression must be a boolean")))
}

/// Parse the 1-indexed wire position into the internal 0-indexed form.
fn position_field(object: &Value, node: &str) -> QueryResult<u32> {
    let position = field(object, "position", node)?
        .as_u64()
        .ok_or_else(|| {
            bad(format!(
                "the field 'position' in a {node} expression must be an unsigned integer"
            ))
        })?;
    if position == 0 {
        return Err(bad("the field 'position' is 1-indexed; 0 is not allowed"));
    }
    u32::try_from(position - 1)
        .map_err(|_| bad(format!("the field 'position' in a {node} expression is out of range")))
}

/// Insertion positions key the insertion index in wire form; only the
/// 1-indexed convention is checked.
fn insertion_position_field(object: &Value, node: &str) -> QueryResult<u32> {
    let position = field(object, "position", node)?.as_u64().ok_or_else(|| {
        bad(format!(
            "the field 'position' in a {node} expression must be an unsigned integer"
        ))
    })?;
    if position == 0 {
        return Err(bad("the field 'position' is 1-indexed; 0 is not allowed"));
    }
    u32::try_from(position)
        .map_err(|_| bad(format!("the field 'position' in a {node} expression is out of range")))
}

fn children_field(object: &Value, node: &str) -> QueryResult<Vec<Expression>> {
    field(object, "children", node)?
        .as_array()
        .ok_or_else(|| bad(format!("the field 'children' in a {node} expression must be an array")))?
        .iter()
        .map(Expression::from_json)
        .collect()
}

fn date_field(object: &Value, name: &str, node: &str) -> QueryResult<Option<Date>> {
    match optional_string_field(object, name, node)? {
        None => Ok(None),
        Some(text) => Date::parse(&text)
            .map(Some)
            .ok_or_else(|| bad(format!("'{text}' is not a valid date (expected YYYY-MM-DD)"))),
    }
}

fn symbol_field<A: Alphabet>(object: &Value, node: &str) -> QueryResult<SymbolOrDot<A::Symbol>> {
    let text = string_field(object, "symbol", node)?;
    let mut characters = text.chars();
    let (Some(character), None) = (characters.next(), characters.next()) else {
        return Err(bad(format!(
            "the field 'symbol' in a {node} expression must be exactly one character"
        )));
    };
    if character == '.' {
        return Ok(SymbolOrDot::Dot);
    }
    A::from_char(character)
        .map(SymbolOrDot::Symbol)
        .ok_or_else(|| {
            bad(format!(
                "'{character}' is not a valid {} symbol or '.'",
                A::NAME
            ))
        })
}

fn pattern_field(object: &Value, name: &str, node: &str) -> QueryResult<String> {
    let pattern = string_field(object, name, node)?;
    SearchPattern::parse(&pattern)
        .map_err(|error| bad(format!("invalid search pattern in {node}: {error}")))?;
    Ok(pattern)
}

fn recombinant_mode_field(object: &Value) -> QueryResult<RecombinantFollowingMode> {
    match object.get("recombinantFollowingMode") {
        None | Some(Value::Null) => Ok(RecombinantFollowingMode::DoNotFollow),
        Some(Value::String(text)) => match text.as_str() {
            "doNotFollow" => Ok(RecombinantFollowingMode::DoNotFollow),
            "followIfFullyContainedInClade" => {
                Ok(RecombinantFollowingMode::FollowIfFullyContainedInClade)
            }
            "alwaysFollow" => Ok(RecombinantFollowingMode::AlwaysFollow),
            other => Err(bad(format!("unknown recombinantFollowingMode '{other}'"))),
        },
        Some(_) => Err(bad("the field 'recombinantFollowingMode' must be a string")),
    }
}

impl Expression {
    /// Parse a filter expression from its JSON object form.
    pub fn from_json(json: &Value) -> QueryResult<Expression> {
        let node_type = json
            .get("type")
            .ok_or_else(|| bad("the field 'type' is required in any filter expression"))?
            .as_str()
            .ok_or_else(|| bad("the field 'type' of a filter expression must be a string"))?;

        match node_type {
            "True" => Ok(Expression::True),
            "False" => Ok(Expression::False),
            "And" => Ok(Expression::And(children_field(json, "And")?)),
            "Or" => Ok(Expression::Or(children_field(json, "Or")?)),
            "N-Of" => {
                let number_of_matchers = field(json, "numberOfMatchers", "N-Of")?
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| {
                        bad("the field 'numberOfMatchers' in an N-Of expression must be an unsigned integer")
                    })?;
                Ok(Expression::NOf {
                    children: children_field(json, "N-Of")?,
                    number_of_matchers,
                    match_exactly: bool_field(json, "matchExactly", "N-Of")?,
                })
            }
            "Not" => Ok(Expression::Not(Box::new(Expression::from_json(field(
                json, "child", "Not",
            )?)?))),
            "Maybe" => Ok(Expression::Maybe(Box::new(Expression::from_json(field(
                json, "child", "Maybe",
            )?)?))),
            "Exact" => Ok(Expression::Exact(Box::new(Expression::from_json(field(
                json, "child", "Exact",
            )?)?))),
            "DateBetween" => Ok(Expression::DateBetween {
                column: string_field(json, "column", "DateBetween")?,
                from: date_field(json, "from", "DateBetween")?,
                to: date_field(json, "to", "DateBetween")?,
            }),
            "DateEquals" => Ok(Expression::DateEquals {
                column: string_field(json, "column", "DateEquals")?,
                value: date_field(json, "value", "DateEquals")?,
            }),
            "IntEquals" => Ok(Expression::IntEquals {
                column: string_field(json, "column", "IntEquals")?,
                value: int_value(json, "value", "IntEquals")?,
            }),
            "IntBetween" => Ok(Expression::IntBetween {
                column: string_field(json, "column", "IntBetween")?,
                from: int_value(json, "from", "IntBetween")?,
                to: int_value(json, "to", "IntBetween")?,
            }),
            "FloatEquals" => Ok(Expression::FloatEquals {
                column: string_field(json, "column", "FloatEquals")?,
                value: float_value(json, "value", "FloatEquals")?,
            }),
            "FloatBetween" => Ok(Expression::FloatBetween {
                column: string_field(json, "column", "FloatBetween")?,
                from: float_value(json, "from", "FloatBetween")?,
                to: float_value(json, "to", "FloatBetween")?,
            }),
            "BooleanEquals" => {
                let value = match json.get("value") {
                    None | Some(Value::Null) => None,
                    Some(Value::Bool(value)) => Some(*value),
                    Some(_) => {
                        return Err(bad(
                            "the field 'value' in a BooleanEquals expression must be a boolean or null",
                        ))
                    }
                };
                Ok(Expression::BoolEquals {
                    column: string_field(json, "column", "BooleanEquals")?,
                    value,
                })
            }
            "StringEquals" => Ok(Expression::StringEquals {
                column: string_field(json, "column", "StringEquals")?,
                value: optional_string_field(json, "value", "StringEquals")?,
            }),
            "StringInSet" => {
                let values = field(json, "values", "StringInSet")?
                    .as_array()
                    .ok_or_else(|| {
                        bad("the field 'values' in a StringInSet expression must be an array")
                    })?
                    .iter()
                    .map(|value| {
                        value.as_str().map(str::to_string).ok_or_else(|| {
                            bad("the field 'values' in a StringInSet expression must contain strings")
                        })
                    })
                    .collect::<QueryResult<BTreeSet<String>>>()?;
                Ok(Expression::StringInSet {
                    column: string_field(json, "column", "StringInSet")?,
                    values,
                })
            }
            "StringSearch" => Ok(Expression::StringSearch {
                column: string_field(json, "column", "StringSearch")?,
                pattern: pattern_field(json, "searchExpression", "StringSearch")?,
            }),
            "NucleotideEquals" => Ok(Expression::NucleotideEquals {
                sequence_name: optional_string_field(json, "sequenceName", "NucleotideEquals")?,
                position: position_field(json, "NucleotideEquals")?,
                symbol: symbol_field::<Nucleotide>(json, "NucleotideEquals")?,
            }),
            "AminoAcidEquals" => Ok(Expression::AminoAcidEquals {
                sequence_name: optional_string_field(json, "sequenceName", "AminoAcidEquals")?,
                position: position_field(json, "AminoAcidEquals")?,
                symbol: symbol_field::<AminoAcid>(json, "AminoAcidEquals")?,
            }),
            "HasNucleotideMutation" => Ok(Expression::HasNucleotideMutation {
                sequence_name: optional_string_field(json, "sequenceName", "HasNucleotideMutation")?,
                position: position_field(json, "HasNucleotideMutation")?,
            }),
            "HasAminoAcidMutation" => Ok(Expression::HasAminoAcidMutation {
                sequence_name: optional_string_field(json, "sequenceName", "HasAminoAcidMutation")?,
                position: position_field(json, "HasAminoAcidMutation")?,
            }),
            "InsertionContains" => Ok(Expression::NucleotideInsertionContains {
                sequence_name: optional_string_field(json, "sequenceName", "InsertionContains")?,
                position: insertion_position_field(json, "InsertionContains")?,
                pattern: pattern_field(json, "value", "InsertionContains")?,
            }),
            "AminoAcidInsertionContains" => Ok(Expression::AminoAcidInsertionContains {
                sequence_name: optional_string_field(
                    json,
                    "sequenceName",
                    "AminoAcidInsertionContains",
                )?,
                position: insertion_position_field(json, "AminoAcidInsertionContains")?,
                pattern: pattern_field(json, "value", "AminoAcidInsertionContains")?,
            }),
            "Lineage" => Ok(Expression::Lineage {
                column: string_field(json, "column", "Lineage")?,
                value: optional_string_field(json, "value", "Lineage")?,
                include_sublineages: bool_field(json, "includeSublineages", "Lineage")?,
                mode: recombinant_mode_field(json)?,
            }),
            "PhyloDescendantOf" => Ok(Expression::PhyloDescendantOf {
                column: string_field(json, "column", "PhyloDescendantOf")?,
                node: string_field(json, "node", "PhyloDescendantOf")?,
            }),
            "IsNull" => Ok(Expression::IsNull {
                column: string_field(json, "column", "IsNull")?,
            }),
            "IsNotNull" => Ok(Expression::Not(Box::new(Expression::IsNull {
                column: string_field(json, "column", "IsNotNull")?,
            }))),
            other => Err(bad(format!("unknown filter expression type '{other}'"))),
        }
    }

    pub fn from_json_str(text: &str) -> QueryResult<Expression> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| bad(format!("filter is not valid JSON: {error}")))?;
        Expression::from_json(&value)
    }
}

fn int_value(object: &Value, name: &str, node: &str) -> QueryResult<Option<i32>> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|number| i32::try_from(number).ok())
            .map(Some)
            .ok_or_else(|| {
                bad(format!(
                    "the field '{name}' in a {node} expression must be a 32-bit integer or null"
                ))
            }),
    }
}

fn float_value(object: &Value, name: &str, node: &str) -> QueryResult<Option<f64>> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            bad(format!(
                "the field '{name}' in a {node} expression must be a number or null"
            ))
        }),
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    children: &[Expression],
    separator: &str,
) -> fmt::Result {
    for (index, child) in children.iter().enumerate() {
        if index > 0 {
            write!(f, "{separator}")?;
        }
        write!(f, "{child}")?;
    }
    Ok(())
}

fn sequence_prefix(sequence_name: &Option<String>) -> String {
    sequence_name
        .as_ref()
        .map(|name| format!("{name}:"))
        .unwrap_or_default()
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::True => write!(f, "True"),
            Expression::False => write!(f, "False"),
            Expression::And(children) => {
                write!(f, "And(")?;
                write_joined(f, children, " & ")?;
                write!(f, ")")
            }
            Expression::Or(children) => {
                write!(f, "Or(")?;
                write_joined(f, children, " | ")?;
                write!(f, ")")
            }
            Expression::NOf {
                children,
                number_of_matchers,
                match_exactly,
            } => {
                if *match_exactly {
                    write!(f, "[exactly-{number_of_matchers}-of: ")?;
                } else {
                    write!(f, "[{number_of_matchers}-of: ")?;
                }
                write_joined(f, children, ", ")?;
                write!(f, "]")
            }
            Expression::Not(child) => write!(f, "!({child})"),
            Expression::Maybe(child) => write!(f, "Maybe({child})"),
            Expression::Exact(child) => write!(f, "Exact({child})"),
            Expression::DateBetween { column, from, to } => {
                write!(
                    f,
                    "[{column} between {} and {}]",
                    from.map(|date| date.to_string())
                        .unwrap_or_else(|| "unbounded".to_string()),
                    to.map(|date| date.to_string())
                        .unwrap_or_else(|| "unbounded".to_string()),
                )
            }
            Expression::DateEquals { column, value } => match value {
                Some(value) => write!(f, "{column} = {value}"),
                None => write!(f, "{column} is null"),
            },
            Expression::IntEquals { column, value } => match value {
                Some(value) => write!(f, "{column} = {value}"),
                None => write!(f, "{column} is null"),
            },
            Expression::IntBetween { column, from, to } => write!(
                f,
                "[{column} between {} and {}]",
                from.map(|v| v.to_string()).unwrap_or_else(|| "unbounded".to_string()),
                to.map(|v| v.to_string()).unwrap_or_else(|| "unbounded".to_string()),
            ),
            Expression::FloatEquals { column, value } => match value {
                Some(value) => write!(f, "{column} = {value}"),
                None => write!(f, "{column} is null"),
            },
            Expression::FloatBetween { column, from, to } => write!(
                f,
                "[{column} between {} and {}]",
                from.map(|v| v.to_string()).unwrap_or_else(|| "unbounded".to_string()),
                to.map(|v| v.to_string()).unwrap_or_else(|| "unbounded".to_string()),
            ),
            Expression::BoolEquals { column, value } => match value {
                Some(value) => write!(f, "{column} = {value}"),
                None => write!(f, "{column} is null"),
            },
            Expression::StringEquals { column, value } => match value {
                Some(value) => write!(f, "{column} = \"{value}\""),
                None => write!(f, "{column} is null"),
            },
            Expression::StringInSet { column, values } => {
                write!(f, "{column} in {{")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{value}\"")?;
                }
                write!(f, "}}")
            }
            Expression::StringSearch { column, pattern } => {
                write!(f, "{column} ~ /{pattern}/")
            }
            Expression::NucleotideEquals {
                sequence_name,
                position,
                symbol,
            } => {
                let symbol = match symbol {
                    SymbolOrDot::Symbol(symbol) => Nucleotide::to_char(*symbol),
                    SymbolOrDot::Dot => '.',
                };
                write!(f, "{}{}{}", sequence_prefix(sequence_name), position + 1, symbol)
            }
            Expression::AminoAcidEquals {
                sequence_name,
                position,
                symbol,
            } => {
                let symbol = match symbol {
                    SymbolOrDot::Symbol(symbol) => AminoAcid::to_char(*symbol),
                    SymbolOrDot::Dot => '.',
                };
                write!(f, "{}{}{}", sequence_prefix(sequence_name), position + 1, symbol)
            }
            Expression::NucleotideInSet {
                sequence_name,
                position,
                symbols,
            } => {
                write!(f, "{}{}[", sequence_prefix(sequence_name), position + 1)?;
                for symbol in symbols {
                    write!(f, "{}", Nucleotide::to_char(*symbol))?;
                }
                write!(f, "]")
            }
            Expression::AminoAcidInSet {
                sequence_name,
                position,
                symbols,
            } => {
                write!(f, "{}{}[", sequence_prefix(sequence_name), position + 1)?;
                for symbol in symbols {
                    write!(f, "{}", AminoAcid::to_char(*symbol))?;
                }
                write!(f, "]")
            }
            Expression::HasNucleotideMutation {
                sequence_name,
                position,
            }
            | Expression::HasAminoAcidMutation {
                sequence_name,
                position,
            } => write!(f, "{}{}*", sequence_prefix(sequence_name), position + 1),
            Expression::NucleotideInsertionContains {
                sequence_name,
                position,
                pattern,
            }
            | Expression::AminoAcidInsertionContains {
                sequence_name,
                position,
                pattern,
            } => write!(
                f,
                "ins_{}{}:{}",
                sequence_prefix(sequence_name),
                position,
                pattern
            ),
            Expression::Lineage {
                column,
                value,
                include_sublineages,
                ..
            } => write!(
                f,
                "{column} = {}{}",
                value.as_deref().unwrap_or("null"),
                if *include_sublineages { "*" } else { "" }
            ),
            Expression::PhyloDescendantOf { column, node } => {
                write!(f, "{column} descendant-of {node}")
            }
            Expression::IsNull { column } => write!(f, "{column} is null"),
        }
    }
}
