//! Compiled filter operators.
//!
//! An [`Operator`] tree is the compiled form of a rewritten filter
//! expression for one partition. Evaluation is a bottom-up bitmap
//! computation: index scans borrow bitmaps from the column indexes
//! (copy-on-write), set operators combine them, selections fall back to
//! row scans where no index applies. The deadline is checked at every
//! operator entry and between children of the set operators.

use crate::common::bitmap::{self, CopyOnWriteBitmap};
use crate::common::date::Date;
use crate::common::pattern::SearchPattern;
use crate::error::QueryResult;
use crate::query::deadline::QueryDeadline;
use crate::storage::column::{
    DateColumnPartition, FloatColumnPartition, IndexedStringColumnPartition, IntColumnPartition,
    StringColumnPartition,
};
use roaring::RoaringBitmap;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

/// Evaluation context of one partition.
#[derive(Clone)]
pub struct EvalContext<'a> {
    /// Universe size for complements: the partition's row count.
    pub row_count: u32,
    pub deadline: &'a QueryDeadline,
}

/// Scalar comparison operators for row-scan predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    NotEquals,
    Less,
    LessOrEquals,
    Greater,
    GreaterOrEquals,
}

impl Comparator {
    pub fn negate(self) -> Comparator {
        match self {
            Comparator::Equals => Comparator::NotEquals,
            Comparator::NotEquals => Comparator::Equals,
            Comparator::Less => Comparator::GreaterOrEquals,
            Comparator::GreaterOrEquals => Comparator::Less,
            Comparator::Greater => Comparator::LessOrEquals,
            Comparator::LessOrEquals => Comparator::Greater,
        }
    }

    fn compare<T: PartialOrd>(self, left: T, right: T) -> bool {
        match self {
            Comparator::Equals => left == right,
            Comparator::NotEquals => left != right,
            Comparator::Less => left < right,
            Comparator::LessOrEquals => left <= right,
            Comparator::Greater => left > right,
            Comparator::GreaterOrEquals => left >= right,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparator::Equals => "=",
            Comparator::NotEquals => "!=",
            Comparator::Less => "<",
            Comparator::LessOrEquals => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEquals => ">=",
        };
        write!(f, "{symbol}")
    }
}

/// One row-scan predicate. A null row matches iff `with_nulls` is set;
/// negation flips both the comparison and the null flag.
pub enum Predicate<'a> {
    IntCompare {
        column: &'a IntColumnPartition,
        comparator: Comparator,
        value: i32,
        with_nulls: bool,
    },
    FloatCompare {
        column: &'a FloatColumnPartition,
        comparator: Comparator,
        value: f64,
        with_nulls: bool,
    },
    DateCompare {
        column: &'a DateColumnPartition,
        comparator: Comparator,
        value: Date,
        with_nulls: bool,
    },
    StringEquals {
        column: &'a StringColumnPartition,
        value: String,
        negated: bool,
        with_nulls: bool,
    },
    StringInSet {
        column: &'a StringColumnPartition,
        values: BTreeSet<String>,
        negated: bool,
        with_nulls: bool,
    },
    StringSearch {
        column: &'a StringColumnPartition,
        pattern: SearchPattern,
        negated: bool,
        with_nulls: bool,
    },
    IndexedStringSearch {
        column: &'a IndexedStringColumnPartition,
        pattern: SearchPattern,
        negated: bool,
        with_nulls: bool,
    },
}

impl Predicate<'_> {
    pub fn matches(&self, row: u32) -> bool {
        match self {
            Predicate::IntCompare {
                column,
                comparator,
                value,
                with_nulls,
            } => match column.value(row) {
                Some(actual) => comparator.compare(actual, *value),
                None => *with_nulls,
            },
            Predicate::FloatCompare {
                column,
                comparator,
                value,
                with_nulls,
            } => match column.value(row) {
                Some(actual) => comparator.compare(actual, *value),
                None => *with_nulls,
            },
            Predicate::DateCompare {
                column,
                comparator,
                value,
                with_nulls,
            } => match column.value(row) {
                Some(actual) => comparator.compare(actual, *value),
                None => *with_nulls,
            },
            Predicate::StringEquals {
                column,
                value,
                negated,
                with_nulls,
            } => {
                if column.is_null(row) {
                    *with_nulls
                } else {
                    column.row_equals(row, value) != *negated
                }
            }
            Predicate::StringInSet {
                column,
                values,
                negated,
                with_nulls,
            } => match column.value(row) {
                Some(actual) => values.contains(&actual) != *negated,
                None => *with_nulls,
            },
            Predicate::StringSearch {
                column,
                pattern,
                negated,
                with_nulls,
            } => match column.value(row) {
                Some(actual) => pattern.matches(&actual) != *negated,
                None => *with_nulls,
            },
            Predicate::IndexedStringSearch {
                column,
                pattern,
                negated,
                with_nulls,
            } => match column.value(row) {
                Some(actual) => pattern.matches(&actual) != *negated,
                None => *with_nulls,
            },
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::IntCompare {
                column,
                comparator,
                value,
                with_nulls,
            } => Predicate::IntCompare {
                column,
                comparator: comparator.negate(),
                value,
                with_nulls: !with_nulls,
            },
            Predicate::FloatCompare {
                column,
                comparator,
                value,
                with_nulls,
            } => Predicate::FloatCompare {
                column,
                comparator: comparator.negate(),
                value,
                with_nulls: !with_nulls,
            },
            Predicate::DateCompare {
                column,
                comparator,
                value,
                with_nulls,
            } => Predicate::DateCompare {
                column,
                comparator: comparator.negate(),
                value,
                with_nulls: !with_nulls,
            },
            Predicate::StringEquals {
                column,
                value,
                negated,
                with_nulls,
            } => Predicate::StringEquals {
                column,
                value,
                negated: !negated,
                with_nulls: !with_nulls,
            },
            Predicate::StringInSet {
                column,
                values,
                negated,
                with_nulls,
            } => Predicate::StringInSet {
                column,
                values,
                negated: !negated,
                with_nulls: !with_nulls,
            },
            Predicate::StringSearch {
                column,
                pattern,
                negated,
                with_nulls,
            } => Predicate::StringSearch {
                column,
                pattern,
                negated: !negated,
                with_nulls: !with_nulls,
            },
            Predicate::IndexedStringSearch {
                column,
                pattern,
                negated,
                with_nulls,
            } => Predicate::IndexedStringSearch {
                column,
                pattern,
                negated: !negated,
                with_nulls: !with_nulls,
            },
        }
    }
}

impl fmt::Display for Predicate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::IntCompare {
                comparator, value, ..
            } => write!(f, "$int {comparator} {value}"),
            Predicate::FloatCompare {
                comparator, value, ..
            } => write!(f, "$float {comparator} {value}"),
            Predicate::DateCompare {
                comparator, value, ..
            } => write!(f, "$date {comparator} {value}"),
            Predicate::StringEquals { value, negated, .. } => {
                write!(f, "$string {} {value}", if *negated { "!=" } else { "=" })
            }
            Predicate::StringInSet { values, negated, .. } => {
                write!(f, "$string {}in {values:?}", if *negated { "not-" } else { "" })
            }
            Predicate::StringSearch { pattern, negated, .. }
            | Predicate::IndexedStringSearch { pattern, negated, .. } => {
                write!(f, "$string {}~ /{}/", if *negated { "!" } else { "" }, pattern.source())
            }
        }
    }
}

/// Lazily computed bitmap, for results assembled outside the indexes
/// (phylogenetic descendants, insertion searches).
pub type BitmapProducerFn<'a> = Box<dyn Fn() -> RoaringBitmap + Send + Sync + 'a>;

pub enum Operator<'a> {
    Empty,
    Full,
    IndexScan {
        bitmap: &'a RoaringBitmap,
    },
    /// An owned bitmap computed at compile time (reference-implicit
    /// reconstructions and similar).
    BitmapScan {
        bitmap: RoaringBitmap,
    },
    BitmapProducer {
        producer: BitmapProducerFn<'a>,
        label: String,
    },
    Union {
        children: Vec<Operator<'a>>,
    },
    Intersection {
        children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
    },
    Complement {
        child: Box<Operator<'a>>,
    },
    Selection {
        predicates: Vec<Predicate<'a>>,
        child: Option<Box<Operator<'a>>>,
    },
    RangeSelection {
        ranges: Vec<Range<u32>>,
    },
    Threshold {
        children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
        number_of_matchers: u32,
        match_exactly: bool,
    },
}

impl<'a> Operator<'a> {
    /// Logical negation without materializing a complement where cheaper
    /// forms exist.
    pub fn negate(self) -> Operator<'a> {
        match self {
            Operator::Empty => Operator::Full,
            Operator::Full => Operator::Empty,
            Operator::Complement { child } => *child,
            Operator::Selection {
                mut predicates,
                child: None,
            } if predicates.len() == 1 => Operator::Selection {
                predicates: vec![predicates.pop().expect("one predicate").negate()],
                child: None,
            },
            other => Operator::Complement {
                child: Box::new(other),
            },
        }
    }

    /// Evaluate to a bitmap of matching rows in `[0, row_count)`.
    pub fn evaluate(&self, context: &EvalContext<'_>) -> QueryResult<CopyOnWriteBitmap<'a>> {
        context.deadline.check()?;
        match self {
            Operator::Empty => Ok(Cow::Owned(RoaringBitmap::new())),
            Operator::Full => Ok(Cow::Owned(bitmap::full(context.row_count))),
            Operator::IndexScan { bitmap } => Ok(Cow::Borrowed(*bitmap)),
            Operator::BitmapScan { bitmap } => Ok(Cow::Owned(bitmap.clone())),
            Operator::BitmapProducer { producer, .. } => Ok(Cow::Owned(producer())),
            Operator::Union { children } => {
                let mut evaluated = Vec::with_capacity(children.len());
                for child in children {
                    context.deadline.check()?;
                    evaluated.push(child.evaluate(context)?);
                }
                let borrowed: Vec<&RoaringBitmap> =
                    evaluated.iter().map(|bitmap| bitmap.as_ref()).collect();
                Ok(Cow::Owned(bitmap::fast_union(&borrowed)))
            }
            Operator::Intersection {
                children,
                negated_children,
            } => {
                let mut evaluated = Vec::with_capacity(children.len());
                for child in children {
                    context.deadline.check()?;
                    evaluated.push(child.evaluate(context)?);
                }
                // Cheapest-first: intersecting small sets early prunes most.
                evaluated.sort_by_key(|bitmap| bitmap.len());
                let mut iterator = evaluated.into_iter();
                let mut result = match iterator.next() {
                    Some(first) => first.into_owned(),
                    None => bitmap::full(context.row_count),
                };
                for bitmap in iterator {
                    if result.is_empty() {
                        return Ok(Cow::Owned(result));
                    }
                    result &= bitmap.as_ref();
                }
                for negated in negated_children {
                    if result.is_empty() {
                        break;
                    }
                    context.deadline.check()?;
                    result -= negated.evaluate(context)?.as_ref();
                }
                Ok(Cow::Owned(result))
            }
            Operator::Complement { child } => {
                let inner = child.evaluate(context)?;
                Ok(Cow::Owned(bitmap::complement(
                    inner.as_ref(),
                    context.row_count,
                )))
            }
            Operator::Selection { predicates, child } => {
                let matches_all =
                    |row: u32| predicates.iter().all(|predicate| predicate.matches(row));
                let result: RoaringBitmap = match child {
                    Some(child) => {
                        let input = child.evaluate(context)?;
                        input.iter().filter(|&row| matches_all(row)).collect()
                    }
                    None => (0..context.row_count).filter(|&row| matches_all(row)).collect(),
                };
                Ok(Cow::Owned(result))
            }
            Operator::RangeSelection { ranges } => {
                let mut result = RoaringBitmap::new();
                for range in ranges {
                    if range.start < range.end {
                        result.insert_range(range.clone());
                    }
                }
                Ok(Cow::Owned(result))
            }
            Operator::Threshold {
                children,
                negated_children,
                number_of_matchers,
                match_exactly,
            } => {
                let mut bitmaps: Vec<RoaringBitmap> = Vec::new();
                for child in children {
                    context.deadline.check()?;
                    bitmaps.push(child.evaluate(context)?.into_owned());
                }
                for negated in negated_children {
                    context.deadline.check()?;
                    let inner = negated.evaluate(context)?;
                    bitmaps.push(bitmap::complement(inner.as_ref(), context.row_count));
                }
                Ok(Cow::Owned(threshold_of(
                    &bitmaps,
                    *number_of_matchers,
                    *match_exactly,
                )))
            }
        }
    }
}

/// Standard k-of-n bitmap counting: `layers[i]` accumulates the rows
/// matched by more than `i` of the inputs seen so far.
fn threshold_of(bitmaps: &[RoaringBitmap], number_of_matchers: u32, match_exactly: bool) -> RoaringBitmap {
    let k = number_of_matchers as usize;
    debug_assert!(k >= 1, "trivial thresholds are folded at compile time");
    let layer_count = if match_exactly { k + 1 } else { k };
    let mut layers: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); layer_count];
    for bitmap in bitmaps {
        for layer in (1..layer_count).rev() {
            let promoted = &layers[layer - 1] & bitmap;
            layers[layer] |= promoted;
        }
        layers[0] |= bitmap;
    }
    if match_exactly {
        &layers[k - 1] - &layers[k]
    } else {
        layers.swap_remove(k - 1)
    }
}

impl fmt::Display for Operator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Empty => write!(f, "Empty"),
            Operator::Full => write!(f, "Full"),
            Operator::IndexScan { bitmap } => write!(f, "IndexScan(|{}|)", bitmap.len()),
            Operator::BitmapScan { bitmap } => write!(f, "BitmapScan(|{}|)", bitmap.len()),
            Operator::BitmapProducer { label, .. } => write!(f, "Producer({label})"),
            Operator::Union { children } => {
                write!(f, "Union(")?;
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            Operator::Intersection {
                children,
                negated_children,
            } => {
                write!(f, "Intersection(")?;
                for (index, child) in children.iter().enumerate() {
                    if index > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{child}")?;
                }
                for child in negated_children {
                    write!(f, " &! {child}")?;
                }
                write!(f, ")")
            }
            Operator::Complement { child } => write!(f, "Complement({child})"),
            Operator::Selection { predicates, child } => {
                write!(f, "Selection[")?;
                for (index, predicate) in predicates.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{predicate}")?;
                }
                write!(f, "]")?;
                if let Some(child) = child {
                    write!(f, "({child})")?;
                }
                Ok(())
            }
            Operator::RangeSelection { ranges } => write!(f, "RangeSelection({ranges:?})"),
            Operator::Threshold {
                children,
                negated_children,
                number_of_matchers,
                match_exactly,
            } => write!(
                f,
                "Threshold[{}{} of {}]",
                if *match_exactly { "exactly " } else { ">=" },
                number_of_matchers,
                children.len() + negated_children.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bitmap::of;

    fn context_with(deadline: &QueryDeadline, row_count: u32) -> EvalContext<'_> {
        EvalContext {
            row_count,
            deadline,
        }
    }

    fn eval(operator: &Operator<'_>, row_count: u32) -> RoaringBitmap {
        let deadline = QueryDeadline::unlimited();
        operator
            .evaluate(&context_with(&deadline, row_count))
            .unwrap()
            .into_owned()
    }

    #[test]
    fn set_operators_combine_bitmaps() {
        let a = of([0, 1, 2]);
        let b = of([2, 3]);
        let union = Operator::Union {
            children: vec![Operator::IndexScan { bitmap: &a }, Operator::IndexScan { bitmap: &b }],
        };
        assert_eq!(eval(&union, 10), of([0, 1, 2, 3]));

        let intersection = Operator::Intersection {
            children: vec![Operator::IndexScan { bitmap: &a }, Operator::IndexScan { bitmap: &b }],
            negated_children: vec![],
        };
        assert_eq!(eval(&intersection, 10), of([2]));

        let difference = Operator::Intersection {
            children: vec![Operator::IndexScan { bitmap: &a }],
            negated_children: vec![Operator::IndexScan { bitmap: &b }],
        };
        assert_eq!(eval(&difference, 10), of([0, 1]));
    }

    #[test]
    fn complement_uses_the_partition_universe() {
        let a = of([0, 2]);
        let complement = Operator::Complement {
            child: Box::new(Operator::IndexScan { bitmap: &a }),
        };
        assert_eq!(eval(&complement, 4), of([1, 3]));
    }

    #[test]
    fn negate_folds_cheap_cases() {
        assert!(matches!(Operator::Empty.negate(), Operator::Full));
        assert!(matches!(Operator::Full.negate(), Operator::Empty));
        let a = of([1]);
        let double = Operator::Complement {
            child: Box::new(Operator::IndexScan { bitmap: &a }),
        }
        .negate();
        assert!(matches!(double, Operator::IndexScan { .. }));
    }

    #[test]
    fn range_selection_inserts_half_open_ranges() {
        let operator = Operator::RangeSelection {
            ranges: vec![2..5, 7..7, 8..9],
        };
        assert_eq!(eval(&operator, 10), of([2, 3, 4, 8]));
    }

    #[test]
    fn threshold_counts_matches() {
        let a = of([0, 1, 2, 3]);
        let b = of([1, 2]);
        let c = of([2, 3]);
        let children = |at_least: u32, exactly: bool| Operator::Threshold {
            children: vec![
                Operator::IndexScan { bitmap: &a },
                Operator::IndexScan { bitmap: &b },
                Operator::IndexScan { bitmap: &c },
            ],
            negated_children: vec![],
            number_of_matchers: at_least,
            match_exactly: exactly,
        };
        // Counts: row0 -> 1, row1 -> 2, row2 -> 3, row3 -> 2.
        assert_eq!(eval(&children(2, false), 10), of([1, 2, 3]));
        assert_eq!(eval(&children(3, false), 10), of([2]));
        assert_eq!(eval(&children(2, true), 10), of([1, 3]));
        assert_eq!(eval(&children(1, true), 10), of([0]));
    }

    #[test]
    fn threshold_negated_children_count_misses() {
        let a = of([0, 1]);
        let b = of([1, 2]);
        let operator = Operator::Threshold {
            children: vec![Operator::IndexScan { bitmap: &a }],
            negated_children: vec![Operator::IndexScan { bitmap: &b }],
            number_of_matchers: 2,
            match_exactly: false,
        };
        // Row matches when in a AND not in b: row 0 only.
        assert_eq!(eval(&operator, 4), of([0]));
    }

    #[test]
    fn expired_deadline_aborts_evaluation() {
        let a = of([1]);
        let operator = Operator::IndexScan { bitmap: &a };
        let deadline = QueryDeadline::new(Some(std::time::Duration::ZERO));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let result = operator.evaluate(&context_with(&deadline, 4));
        assert!(matches!(result, Err(crate::error::QueryError::Timeout { .. })));
    }
}
