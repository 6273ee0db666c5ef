//! Column predicates for directory pruning and record filtering.
//!
//! A [`PathFilter`] is a per-column predicate used twice: at planning time a
//! strict filter pins a directory level to a single entry, and at read time
//! the remaining ("free") filters drop records while a packet decodes. The
//! lighter [`IndexFilter`] is the traversal-direction-aware form the engine
//! uses when walking a range of the directory tree.

use crate::schema::Value;
use regex::Regex;
use std::sync::Arc;

/// Direction of a sort directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending, nulls first.
    #[default]
    Asc,
    /// Descending, nulls last.
    Desc,
}

/// An arbitrary record predicate, applied after a record materializes.
///
/// Flex filters see the fully materialized record; columns missing from a
/// packet file are [`Value::Null`] by the time a filter runs.
pub type FlexFilter<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// A per-column predicate: an exact value, bounds, and/or regex patterns.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    equals: Option<Value>,
    min: Option<Value>,
    max: Option<Value>,
    patterns: Vec<Regex>,
}

impl PathFilter {
    /// Accepts exactly one value (which may be [`Value::Null`]).
    pub fn equals(value: impl Into<Value>) -> Self {
        Self {
            equals: Some(value.into()),
            ..Self::default()
        }
    }

    /// Accepts values `>= lo`.
    pub fn at_least(lo: impl Into<Value>) -> Self {
        Self {
            min: Some(lo.into()),
            ..Self::default()
        }
    }

    /// Accepts values `<= hi`.
    pub fn at_most(hi: impl Into<Value>) -> Self {
        Self {
            max: Some(hi.into()),
            ..Self::default()
        }
    }

    /// Accepts values in `[lo, hi]`.
    ///
    /// A [`Value::Null`] endpoint leaves that side of the interval open;
    /// `lo == hi` degrades to [`PathFilter::equals`].
    pub fn between(lo: impl Into<Value>, hi: impl Into<Value>) -> Self {
        let lo = lo.into();
        let hi = hi.into();
        match (lo.is_null(), hi.is_null()) {
            (true, true) => Self::default(),
            (false, true) => Self::at_least(lo),
            (true, false) => Self::at_most(hi),
            (false, false) if lo == hi => Self::equals(lo),
            (false, false) => Self {
                min: Some(lo),
                max: Some(hi),
                ..Self::default()
            },
        }
    }

    /// Accepts values whose string form matches the pattern.
    pub fn matching(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: vec![Regex::new(pattern)?],
            ..Self::default()
        })
    }

    /// Adds another pattern; all patterns must match.
    pub fn and_matching(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Evaluates the predicate against a value.
    pub fn evaluate(&self, value: &Value) -> bool {
        if let Some(eq) = &self.equals {
            if value != eq {
                return false;
            }
        }
        if let Some(min) = &self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = &self.max {
            if value > max {
                return false;
            }
        }
        if !self.patterns.is_empty() {
            let text = value.to_text("");
            if !self.patterns.iter().all(|p| p.is_match(&text)) {
                return false;
            }
        }
        true
    }

    /// True iff the filter accepts exactly one value.
    pub fn is_strict(&self) -> bool {
        self.equals.is_some()
    }

    /// The single accepted value, when [`is_strict`](Self::is_strict).
    pub fn strict_value(&self) -> Option<&Value> {
        self.equals.as_ref()
    }
}

/// Wire-level predicate for walking a range of the directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFilter {
    /// Exactly this value.
    Equals(Value),
    /// This value or later in traversal order.
    After(Value),
    /// This value or earlier in traversal order.
    Before(Value),
    /// Inclusive range, orientation-independent.
    Between(Value, Value),
}

impl IndexFilter {
    /// Answers "does this value pass the filter, respecting the traversal
    /// direction". `invert_order` flips `After`/`Before` for descending
    /// traversal.
    pub fn intersects(&self, value: &Value, invert_order: bool) -> bool {
        match self {
            IndexFilter::Equals(v) => value == v,
            IndexFilter::After(v) => {
                if invert_order {
                    value <= v
                } else {
                    value >= v
                }
            }
            IndexFilter::Before(v) => {
                if invert_order {
                    value >= v
                } else {
                    value <= v
                }
            }
            IndexFilter::Between(lo, hi) => value >= lo && value <= hi,
        }
    }
}
