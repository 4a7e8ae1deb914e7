// crates/taskloom-core/src/runtime/comparator.rs
// ============================================================================
// Module: Task Loom Condition Comparator
// Description: Tri-state evaluation of a stage's skip condition against a
//              prior stage's structured output.
// Purpose: Decide whether a stage should be skipped.
// Dependencies: crate::core::{template, structured}
// ============================================================================

//! ## Overview
//! A condition compares a field of a prior stage's [`StructuredOutput`]
//! against a literal. Evaluation is tri-state rather than boolean: a missing
//! source stage or an absent field is `Unknown`, not `false`, so callers can
//! choose to fail closed (treat `Unknown` as "do not skip").

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::ConditionOperator;
use crate::core::ConditionSpec;
use crate::core::StructuredOutput;

// ============================================================================
// SECTION: Tri-State
// ============================================================================

/// The three-valued result of evaluating a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    /// The condition held.
    True,
    /// The condition did not hold.
    False,
    /// The condition could not be evaluated (missing source stage or field).
    Unknown,
}

impl TriState {
    /// Folds `Unknown` into `False`, for callers that want "skip only on a
    /// confirmed match" semantics.
    #[must_use]
    pub const fn unknown_as_false(self) -> bool {
        matches!(self, Self::True)
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates `condition` against `source_output`, the structured output of
/// the condition's `source_stage`, if it is available.
#[must_use]
pub fn evaluate(condition: &ConditionSpec, source_output: Option<&StructuredOutput>) -> TriState {
    let Some(output) = source_output else {
        return TriState::Unknown;
    };
    let Some(field) = output.field(&condition.field) else {
        return match condition.operator {
            ConditionOperator::Exists => TriState::False,
            _ => TriState::Unknown,
        };
    };

    match condition.operator {
        ConditionOperator::Exists => TriState::True,
        ConditionOperator::Contains => contains(field, condition.value.as_deref()),
        ConditionOperator::Equals => compare(field, condition.value.as_deref(), |a, b| a == b),
        ConditionOperator::NotEquals => compare(field, condition.value.as_deref(), |a, b| a != b),
        ConditionOperator::GreaterThan => numeric_compare(field, condition.value.as_deref(), |a, b| a > b),
        ConditionOperator::LessThan => numeric_compare(field, condition.value.as_deref(), |a, b| a < b),
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn compare(field: &Value, expected: Option<&str>, op: impl Fn(&str, &str) -> bool) -> TriState {
    let Some(expected) = expected else {
        return TriState::Unknown;
    };
    let Some(actual) = value_as_text(field) else {
        return TriState::Unknown;
    };
    if op(actual.as_str(), expected) {
        TriState::True
    } else {
        TriState::False
    }
}

fn contains(field: &Value, expected: Option<&str>) -> TriState {
    let Some(expected) = expected else {
        return TriState::Unknown;
    };
    match field {
        Value::String(text) => {
            if text.contains(expected) {
                TriState::True
            } else {
                TriState::False
            }
        }
        Value::Array(items) => {
            let found = items.iter().filter_map(value_as_text).any(|item| item == expected);
            if found { TriState::True } else { TriState::False }
        }
        _ => TriState::Unknown,
    }
}

fn numeric_compare(field: &Value, expected: Option<&str>, op: impl Fn(f64, f64) -> bool) -> TriState {
    let Some(expected) = expected.and_then(|text| text.parse::<f64>().ok()) else {
        return TriState::Unknown;
    };
    let Some(actual) = field.as_f64() else {
        return TriState::Unknown;
    };
    if op(actual, expected) {
        TriState::True
    } else {
        TriState::False
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::ArtifactRef;
    use crate::core::OutputStatus;
    use crate::core::StageKind;

    fn output(fields: Vec<(&str, Value)>) -> StructuredOutput {
        let mut map = BTreeMap::new();
        for (key, value) in fields {
            map.insert(key.to_string(), value);
        }
        StructuredOutput {
            kind: StageKind::Code,
            summary: "done".to_string(),
            status: OutputStatus::Pass,
            confidence: Some(0.9),
            artifacts: Vec::<ArtifactRef>::new(),
            fields: map,
        }
    }

    fn condition(field: &str, operator: ConditionOperator, value: Option<&str>) -> ConditionSpec {
        ConditionSpec {
            source_stage: "prior".to_string(),
            field: field.to_string(),
            operator,
            value: value.map(ToString::to_string),
        }
    }

    #[test]
    fn missing_source_stage_is_unknown() {
        let cond = condition("tests_passed", ConditionOperator::Exists, None);
        assert_eq!(evaluate(&cond, None), TriState::Unknown);
    }

    #[test]
    fn missing_field_is_unknown_unless_operator_is_exists() {
        let out = output(vec![]);
        let cond = condition("tests_passed", ConditionOperator::Equals, Some("true"));
        assert_eq!(evaluate(&cond, Some(&out)), TriState::Unknown);

        let exists_cond = condition("tests_passed", ConditionOperator::Exists, None);
        assert_eq!(evaluate(&exists_cond, Some(&out)), TriState::False);
    }

    #[test]
    fn equals_and_not_equals_compare_as_text() {
        let out = output(vec![("tests_passed", Value::Bool(true))]);
        let equals = condition("tests_passed", ConditionOperator::Equals, Some("true"));
        assert_eq!(evaluate(&equals, Some(&out)), TriState::True);

        let not_equals = condition("tests_passed", ConditionOperator::NotEquals, Some("true"));
        assert_eq!(evaluate(&not_equals, Some(&out)), TriState::False);
    }

    #[test]
    fn contains_checks_substring_and_array_membership() {
        let text_out = output(vec![("summary", Value::String("fixed the bug".to_string()))]);
        let cond = condition("summary", ConditionOperator::Contains, Some("bug"));
        assert_eq!(evaluate(&cond, Some(&text_out)), TriState::True);

        let array_out =
            output(vec![("tags", Value::Array(vec![Value::String("urgent".to_string())]))]);
        let cond = condition("tags", ConditionOperator::Contains, Some("urgent"));
        assert_eq!(evaluate(&cond, Some(&array_out)), TriState::True);
    }

    #[test]
    fn numeric_comparisons_parse_both_sides() {
        let out = output(vec![("coverage", Value::from(0.92_f64))]);
        let greater = condition("coverage", ConditionOperator::GreaterThan, Some("0.8"));
        assert_eq!(evaluate(&greater, Some(&out)), TriState::True);

        let less = condition("coverage", ConditionOperator::LessThan, Some("0.8"));
        assert_eq!(evaluate(&less, Some(&out)), TriState::False);
    }

    #[test]
    fn unknown_as_false_folds_only_unknown_and_false() {
        assert!(TriState::True.unknown_as_false());
        assert!(!TriState::False.unknown_as_false());
        assert!(!TriState::Unknown.unknown_as_false());
    }
}
