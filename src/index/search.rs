//! Index predicates

use regex::{Regex, RegexBuilder};

use super::value::IndexValue;
use crate::error::{ChronoError, ChronoResult};

/// Relative tolerance for double equality
pub const DEFAULT_DOUBLE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringCondition {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    Matches,
    NotMatches,
}

impl StringCondition {
    fn is_negated(self) -> bool {
        matches!(
            self,
            StringCondition::NotEquals
                | StringCondition::NotContains
                | StringCondition::NotStartsWith
                | StringCondition::NotEndsWith
                | StringCondition::NotMatches
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberCondition {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    Strict,
    CaseInsensitive,
}

#[derive(Debug, Clone)]
enum Predicate {
    Any,
    String {
        condition: StringCondition,
        needle: String,
        mode: MatchMode,
        regex: Option<Regex>,
    },
    Long {
        condition: NumberCondition,
        operand: i64,
    },
    Double {
        condition: NumberCondition,
        operand: f64,
        tolerance: f64,
    },
}

/// A predicate over indexed values.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    predicate: Predicate,
}

impl SearchSpec {
    /// Matches every value
    pub fn any() -> Self {
        Self {
            predicate: Predicate::Any,
        }
    }

    /// String predicate. `Matches`/`NotMatches` compile `needle` as a regex
    /// that must match the whole value.
    pub fn string(
        condition: StringCondition,
        needle: impl Into<String>,
        mode: MatchMode,
    ) -> ChronoResult<Self> {
        let needle = needle.into();
        let regex = match condition {
            StringCondition::Matches | StringCondition::NotMatches => Some(
                RegexBuilder::new(&format!("^(?:{})$", needle))
                    .case_insensitive(mode == MatchMode::CaseInsensitive)
                    .build()
                    .map_err(|e| ChronoError::precondition(format!("invalid regex: {}", e)))?,
            ),
            _ => None,
        };
        Ok(Self {
            predicate: Predicate::String {
                condition,
                needle,
                mode,
                regex,
            },
        })
    }

    pub fn string_equals(needle: impl Into<String>) -> Self {
        Self {
            predicate: Predicate::String {
                condition: StringCondition::Equals,
                needle: needle.into(),
                mode: MatchMode::Strict,
                regex: None,
            },
        }
    }

    pub fn long(condition: NumberCondition, operand: i64) -> Self {
        Self {
            predicate: Predicate::Long { condition, operand },
        }
    }

    pub fn double(condition: NumberCondition, operand: f64) -> Self {
        Self::double_with_tolerance(condition, operand, DEFAULT_DOUBLE_TOLERANCE)
    }

    pub fn double_with_tolerance(condition: NumberCondition, operand: f64, tolerance: f64) -> Self {
        Self {
            predicate: Predicate::Double {
                condition,
                operand,
                tolerance,
            },
        }
    }

    /// Returns true if `value` satisfies the predicate. Values of a
    /// different type never match, not even negated conditions.
    pub fn matches(&self, value: &IndexValue) -> bool {
        match (&self.predicate, value) {
            (Predicate::Any, _) => true,
            (
                Predicate::String {
                    condition,
                    needle,
                    mode,
                    regex,
                },
                IndexValue::String(s),
            ) => {
                let positive = match regex {
                    Some(re) => re.is_match(s),
                    None => match_string(*condition, s, needle, *mode),
                };
                positive != condition.is_negated()
            }
            (Predicate::Long { condition, operand }, IndexValue::Long(v)) => {
                compare(*condition, v.cmp(operand))
            }
            (
                Predicate::Double {
                    condition,
                    operand,
                    tolerance,
                },
                IndexValue::Double(v),
            ) => {
                let scale = v.abs().max(operand.abs()).max(1.0);
                let equal = (v - operand).abs() <= tolerance * scale;
                match condition {
                    NumberCondition::Equals => equal,
                    NumberCondition::NotEquals => !equal,
                    NumberCondition::LessThan => !equal && v < operand,
                    NumberCondition::LessThanOrEqual => equal || v < operand,
                    NumberCondition::GreaterThan => !equal && v > operand,
                    NumberCondition::GreaterThanOrEqual => equal || v > operand,
                }
            }
            _ => false,
        }
    }
}

fn match_string(condition: StringCondition, value: &str, needle: &str, mode: MatchMode) -> bool {
    let (value, needle) = match mode {
        MatchMode::Strict => (value.to_string(), needle.to_string()),
        MatchMode::CaseInsensitive => (value.to_lowercase(), needle.to_lowercase()),
    };
    match condition {
        StringCondition::Equals | StringCondition::NotEquals => value == needle,
        StringCondition::Contains | StringCondition::NotContains => value.contains(&needle),
        StringCondition::StartsWith | StringCondition::NotStartsWith => value.starts_with(&needle),
        StringCondition::EndsWith | StringCondition::NotEndsWith => value.ends_with(&needle),
        // Regex conditions never reach here
        StringCondition::Matches | StringCondition::NotMatches => false,
    }
}

fn compare(condition: NumberCondition, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match condition {
        NumberCondition::Equals => ordering == Equal,
        NumberCondition::NotEquals => ordering != Equal,
        NumberCondition::LessThan => ordering == Less,
        NumberCondition::LessThanOrEqual => ordering != Greater,
        NumberCondition::GreaterThan => ordering == Greater,
        NumberCondition::GreaterThanOrEqual => ordering != Less,
    }
}
