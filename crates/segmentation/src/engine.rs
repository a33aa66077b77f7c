//! Filter engine: evaluates conditions, groups and criteria against a single
//! profile. Pure functions, no state.

use broadcast_core::Profile;
use serde_json::Value;
use std::cmp::Ordering;
use tracing::debug;

use crate::criteria::{
    parse_bool_token, parse_date, ConditionValue, FilterCondition, FilterCriteria, FilterGroup,
    FilterOperator, OperatorKind,
};

pub struct FilterEngine;

impl FilterEngine {
    /// Evaluate one condition. Unsupported operators and operand type
    /// mismatches evaluate to `false`; nothing is raised to the caller.
    pub fn evaluate(profile: &Profile, condition: &FilterCondition) -> bool {
        let resolved = profile.field(&condition.field);
        let actual = resolved.as_deref().filter(|v| !is_blank(v));

        match condition.operator.kind() {
            OperatorKind::Unsupported => {
                debug!(
                    field = %condition.field,
                    operator = %condition.operator.as_str(),
                    "Unsupported filter operator, condition evaluates to false"
                );
                metrics::counter!("segmentation.filter_errors", "kind" => "unsupported_operator")
                    .increment(1);
                false
            }
            OperatorKind::Presence => match condition.operator {
                FilterOperator::Exists | FilterOperator::IsNotEmpty => actual.is_some(),
                _ => actual.is_none(),
            },
            _ => match actual {
                None => {
                    condition.operator == FilterOperator::Equals
                        && condition.value == ConditionValue::Empty
                }
                Some(Value::Array(items)) => Self::evaluate_array(items, condition),
                Some(value) => Self::compare(value, condition),
            },
        }
    }

    /// AND of all conditions; an empty group is vacuously true.
    pub fn evaluate_group(profile: &Profile, group: &FilterGroup) -> bool {
        group.conditions.iter().all(|c| Self::evaluate(profile, c))
    }

    /// OR of all groups. No groups at all means no filter.
    pub fn evaluate_criteria(profile: &Profile, criteria: &FilterCriteria) -> bool {
        if criteria.groups.is_empty() {
            return true;
        }
        criteria.groups.iter().any(|g| Self::evaluate_group(profile, g))
    }

    fn evaluate_array(items: &[Value], condition: &FilterCondition) -> bool {
        match condition.operator {
            // Negations hold only when no element matches the positive form.
            FilterOperator::NotEquals | FilterOperator::NotContains => {
                let positive = FilterCondition::new(
                    condition.field.clone(),
                    if condition.operator == FilterOperator::NotEquals {
                        "equals"
                    } else {
                        "contains"
                    },
                    condition.raw_value(),
                );
                !items
                    .iter()
                    .filter(|v| !is_blank(v))
                    .any(|v| Self::compare(v, &positive))
            }
            _ => items
                .iter()
                .filter(|v| !is_blank(v))
                .any(|v| Self::compare(v, condition)),
        }
    }

    fn compare(actual: &Value, condition: &FilterCondition) -> bool {
        match condition.operator.kind() {
            OperatorKind::Text => Self::compare_text(actual, condition),
            OperatorKind::Numeric => Self::compare_numeric(actual, condition),
            OperatorKind::Date => Self::compare_date(actual, condition),
            OperatorKind::Presence | OperatorKind::Unsupported => false,
        }
    }

    fn compare_text(actual: &Value, condition: &FilterCondition) -> bool {
        let is_equality = matches!(
            condition.operator,
            FilterOperator::Equals | FilterOperator::NotEquals
        );

        // Status is always a case-insensitive text comparison.
        if is_equality
            && !condition.is_status_field()
            && (actual.is_boolean() || condition.is_boolean_named())
        {
            if let (Some(a), Some(e)) = (normalize_bool(actual), condition.value.as_bool()) {
                return match condition.operator {
                    FilterOperator::Equals => a == e,
                    _ => a != e,
                };
            }
        }

        let haystack = value_text(actual).trim().to_lowercase();
        let needle = condition.needle.as_str();
        match condition.operator {
            FilterOperator::Equals => haystack == needle,
            FilterOperator::NotEquals => haystack != needle,
            FilterOperator::Contains => haystack.contains(needle),
            FilterOperator::NotContains => !haystack.contains(needle),
            FilterOperator::StartsWith => haystack.starts_with(needle),
            FilterOperator::EndsWith => haystack.ends_with(needle),
            _ => false,
        }
    }

    fn compare_numeric(actual: &Value, condition: &FilterCondition) -> bool {
        let ConditionValue::Number(expected) = condition.value else {
            debug!(field = %condition.field, value = %condition.raw_value(), "Non-numeric operand");
            metrics::counter!("segmentation.filter_errors", "kind" => "type_mismatch").increment(1);
            return false;
        };
        let Some(actual) = as_number(actual) else {
            return false;
        };
        let Some(ordering) = actual.partial_cmp(&expected) else {
            return false;
        };
        match condition.operator {
            FilterOperator::GreaterThan => ordering == Ordering::Greater,
            FilterOperator::GreaterThanOrEqual => ordering != Ordering::Less,
            FilterOperator::LessThan => ordering == Ordering::Less,
            FilterOperator::LessThanOrEqual => ordering != Ordering::Greater,
            _ => false,
        }
    }

    fn compare_date(actual: &Value, condition: &FilterCondition) -> bool {
        let ConditionValue::Date(expected) = condition.value else {
            debug!(field = %condition.field, value = %condition.raw_value(), "Unparseable date operand");
            metrics::counter!("segmentation.filter_errors", "kind" => "type_mismatch").increment(1);
            return false;
        };
        let actual = match actual {
            Value::String(s) => parse_date(s.trim()),
            Value::Number(n) => n
                .as_i64()
                .and_then(chrono::DateTime::from_timestamp_millis),
            _ => None,
        };
        let Some(actual) = actual else {
            return false;
        };
        match condition.operator {
            FilterOperator::Before => actual.timestamp_millis() < expected.timestamp_millis(),
            FilterOperator::After => actual.timestamp_millis() > expected.timestamp_millis(),
            FilterOperator::On => actual.date_naive() == expected.date_naive(),
            _ => false,
        }
    }
}

/// Absent-equivalent values: null, blank strings, empty collections.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn normalize_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => parse_bool_token(s),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
