//! Filter criteria model: conditions, groups, and the tagged condition value.
//!
//! Conditions arrive from the dashboard as loosely typed strings. They are
//! parsed exactly once into a [`FilterCondition`] carrying a typed
//! [`ConditionValue`], so evaluation never re-coerces the operand.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Exists,
    NotExists,
    IsEmpty,
    IsNotEmpty,
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Before,
    After,
    On,
    /// Anything the engine does not recognize. Always evaluates to false.
    Unsupported(String),
}

/// How an operator interprets its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Presence,
    Text,
    Numeric,
    Date,
    Unsupported,
}

impl FilterOperator {
    /// Parse a wire operator. Case, surrounding whitespace and spaces vs.
    /// underscores are not significant (`"is not"` == `"is_not"`).
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "exists" | "is_set" => Self::Exists,
            "not_exists" | "is_not_set" => Self::NotExists,
            "is_empty" => Self::IsEmpty,
            "is_not_empty" => Self::IsNotEmpty,
            "equals" | "is" | "eq" => Self::Equals,
            "not_equals" | "is_not" | "neq" => Self::NotEquals,
            "contains" => Self::Contains,
            "not_contains" | "does_not_contain" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "greater_than" | "gt" => Self::GreaterThan,
            "greater_than_or_equal" | "greater_than_or_equals" | "gte" => {
                Self::GreaterThanOrEqual
            }
            "less_than" | "lt" => Self::LessThan,
            "less_than_or_equal" | "less_than_or_equals" | "lte" => Self::LessThanOrEqual,
            "before" => Self::Before,
            "after" => Self::After,
            "on" => Self::On,
            _ => Self::Unsupported(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::Before => "before",
            Self::After => "after",
            Self::On => "on",
            Self::Unsupported(raw) => raw,
        }
    }

    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Exists | Self::NotExists | Self::IsEmpty | Self::IsNotEmpty => {
                OperatorKind::Presence
            }
            Self::Equals
            | Self::NotEquals
            | Self::Contains
            | Self::NotContains
            | Self::StartsWith
            | Self::EndsWith => OperatorKind::Text,
            Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::LessThan
            | Self::LessThanOrEqual => OperatorKind::Numeric,
            Self::Before | Self::After | Self::On => OperatorKind::Date,
            Self::Unsupported(_) => OperatorKind::Unsupported,
        }
    }
}

/// Condition operand, typed once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(DateTime<Utc>),
}

impl ConditionValue {
    fn parse(operator: &FilterOperator, raw: &str) -> Self {
        let trimmed = raw.trim();
        match operator.kind() {
            OperatorKind::Presence | OperatorKind::Unsupported => Self::Empty,
            OperatorKind::Numeric => trimmed
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Self::Number)
                .unwrap_or_else(|| Self::Text(trimmed.to_lowercase())),
            OperatorKind::Date => parse_date(trimmed)
                .map(Self::Date)
                .unwrap_or_else(|| Self::Text(trimmed.to_lowercase())),
            OperatorKind::Text => {
                if is_null_like(trimmed) {
                    Self::Empty
                } else if let Some(b) = parse_bool_token(trimmed) {
                    Self::Bool(b)
                } else {
                    Self::Text(trimmed.to_lowercase())
                }
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Wire representation of a condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCondition {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

/// A single parsed predicate over one profile field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCondition", into = "RawCondition")]
pub struct FilterCondition {
    pub field: String,
    pub operator: FilterOperator,
    pub value: ConditionValue,
    /// Trimmed, lowercased operand used by text comparisons.
    pub needle: String,
    raw: String,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, operator: &str, value: impl Into<String>) -> Self {
        let field = field.into();
        let raw = value.into();
        let operator = FilterOperator::parse(operator);
        let value = ConditionValue::parse(&operator, &raw);
        Self {
            field,
            operator,
            value,
            needle: raw.trim().to_lowercase(),
            raw,
        }
    }

    /// The operand as the dashboard sent it.
    pub fn raw_value(&self) -> &str {
        &self.raw
    }

    pub fn is_status_field(&self) -> bool {
        self.field == "status"
    }

    /// Fields named `is_*` / `has_*` are compared as booleans even when the
    /// stored value is a string.
    pub fn is_boolean_named(&self) -> bool {
        let leaf = self.field.rsplit('.').next().unwrap_or(&self.field);
        leaf.starts_with("is_") || leaf.starts_with("has_")
    }
}

impl From<RawCondition> for FilterCondition {
    fn from(raw: RawCondition) -> Self {
        let value = match raw.value {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => other.to_string(),
        };
        Self::new(raw.field, &raw.operator, value)
    }
}

impl From<FilterCondition> for RawCondition {
    fn from(condition: FilterCondition) -> Self {
        Self {
            field: condition.field,
            operator: condition.operator.as_str().to_string(),
            value: Value::String(condition.raw),
        }
    }
}

/// Conditions joined by AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

impl FilterGroup {
    pub fn new(conditions: Vec<FilterCondition>) -> Self {
        Self { conditions }
    }
}

/// Groups joined by OR. An empty group list means "no filter".
///
/// Deserializes from either the grouped shape `{"groups": [...]}` or the
/// legacy flat condition list, which becomes one implicit group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CriteriaInput")]
pub struct FilterCriteria {
    pub groups: Vec<FilterGroup>,
}

impl FilterCriteria {
    /// Criteria that lets every profile through.
    pub fn unfiltered() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn any_of(groups: Vec<FilterGroup>) -> Self {
        Self { groups }
    }

    /// A single AND group.
    pub fn all_of(conditions: Vec<FilterCondition>) -> Self {
        Self {
            groups: vec![FilterGroup::new(conditions)],
        }
    }

    pub fn conditions(&self) -> impl Iterator<Item = &FilterCondition> {
        self.groups.iter().flat_map(|g| g.conditions.iter())
    }
}

/// The two criteria shapes accepted at the boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CriteriaInput {
    Grouped { groups: Vec<FilterGroup> },
    Legacy(Vec<FilterCondition>),
}

impl From<CriteriaInput> for FilterCriteria {
    fn from(input: CriteriaInput) -> Self {
        match input {
            CriteriaInput::Grouped { groups } => Self { groups },
            CriteriaInput::Legacy(conditions) => Self::all_of(conditions),
        }
    }
}

pub(crate) fn is_null_like(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("null")
}

/// `Yes/yes/true/1` and `No/no/false/0`.
pub(crate) fn parse_bool_token(s: &str) -> Option<bool> {
    match s.trim() {
        "Yes" | "yes" | "true" | "1" => Some(true),
        "No" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
