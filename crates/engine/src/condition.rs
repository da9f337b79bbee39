//! Guard condition evaluation.
//!
//! Conditions are partitioned by logical group. Every AND condition must
//! hold; if any OR conditions exist, at least one of them must hold. Empty
//! groups pass vacuously. Pure and deterministic.

use std::cmp::Ordering;

use blueprint_interchange::{Condition, LogicalGroup, Operator};
use serde_json::Value;

use crate::value::FieldValue;

/// Evaluate a transition's guard against a record-data snapshot.
pub fn evaluate(conditions: &[Condition], record_data: &Value) -> bool {
    let (and, or) = partition(conditions);
    let and_ok = and.iter().all(|c| check(c, record_data));
    let or_ok = or.is_empty() || or.iter().any(|c| check(c, record_data));
    and_ok && or_ok
}

/// Human-readable descriptions of the conditions that keep the guard from
/// passing. Empty iff [`evaluate`] returns `true`.
///
/// Every failing AND condition is listed; OR conditions are listed only
/// when none of them holds.
pub fn failed_conditions(conditions: &[Condition], record_data: &Value) -> Vec<String> {
    let (and, or) = partition(conditions);
    let mut failed: Vec<String> = and
        .iter()
        .filter(|c| !check(c, record_data))
        .map(|c| describe(c))
        .collect();
    if !or.is_empty() && !or.iter().any(|c| check(c, record_data)) {
        failed.extend(or.iter().map(|c| describe(c)));
    }
    failed
}

/// `"<field> <operator> <value>"`, or `"<field> <operator>"` for unary
/// operators.
pub fn describe(condition: &Condition) -> String {
    match (&condition.value, condition.operator.is_unary()) {
        (Some(value), false) => format!(
            "{} {} {}",
            condition.field,
            condition.operator,
            display_value(value)
        ),
        _ => format!("{} {}", condition.field, condition.operator),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn partition(conditions: &[Condition]) -> (Vec<&Condition>, Vec<&Condition>) {
    let mut ordered: Vec<&Condition> = conditions.iter().collect();
    ordered.sort_by_key(|c| c.display_order);
    ordered
        .into_iter()
        .partition(|c| c.logical_group == LogicalGroup::And)
}

/// Evaluate one condition against the record data.
pub fn check(condition: &Condition, record_data: &Value) -> bool {
    let actual = record_data
        .get(&condition.field)
        .map(FieldValue::infer)
        .unwrap_or(FieldValue::Empty);
    let missing = record_data.get(&condition.field).is_none();
    let expected = condition
        .value
        .as_ref()
        .map(FieldValue::infer)
        .unwrap_or(FieldValue::Empty);

    match condition.operator {
        Operator::IsEmpty => actual.is_empty(),
        Operator::IsNotEmpty => !actual.is_empty(),
        _ if missing => negated(condition.operator),
        Operator::Equals => equals(&actual, &expected),
        Operator::NotEquals => !equals(&actual, &expected),
        Operator::Contains => contains(&actual, &expected),
        Operator::NotContains => !contains(&actual, &expected),
        Operator::GreaterThan => ordered(&actual, &expected, |o| o == Ordering::Greater),
        Operator::LessThan => ordered(&actual, &expected, |o| o == Ordering::Less),
        Operator::GreaterOrEqual => ordered(&actual, &expected, |o| o != Ordering::Less),
        Operator::LessOrEqual => ordered(&actual, &expected, |o| o != Ordering::Greater),
        Operator::InList => in_list(&actual, &expected),
        Operator::NotInList => !in_list(&actual, &expected),
    }
}

/// A missing field satisfies only the negative operators.
fn negated(op: Operator) -> bool {
    matches!(
        op,
        Operator::NotEquals | Operator::NotContains | Operator::NotInList
    )
}

fn equals(actual: &FieldValue, expected: &FieldValue) -> bool {
    match actual {
        FieldValue::List(items) => items.iter().any(|i| i.loosely_equals(expected)),
        _ => actual.loosely_equals(expected),
    }
}

fn contains(actual: &FieldValue, expected: &FieldValue) -> bool {
    match actual {
        FieldValue::List(items) => items.iter().any(|i| i.loosely_equals(expected)),
        FieldValue::Empty => false,
        _ => actual
            .as_text()
            .to_lowercase()
            .contains(&expected.as_text().to_lowercase()),
    }
}

fn ordered(actual: &FieldValue, expected: &FieldValue, accept: impl Fn(Ordering) -> bool) -> bool {
    actual.compare(expected).map(accept).unwrap_or(false)
}

/// Membership in the condition's list. A list-valued field matches when
/// any of its items is a member; a comma-separated string counts as a list.
fn in_list(actual: &FieldValue, expected: &FieldValue) -> bool {
    let members: Vec<FieldValue> = match expected {
        FieldValue::List(items) => items.clone(),
        FieldValue::Text(s) => s
            .split(',')
            .map(|part| FieldValue::infer(&Value::String(part.trim().to_string())))
            .collect(),
        FieldValue::Empty => Vec::new(),
        other => vec![other.clone()],
    };
    let is_member = |v: &FieldValue| members.iter().any(|m| v.loosely_equals(m));
    match actual {
        FieldValue::List(items) => items.iter().any(is_member),
        FieldValue::Empty => false,
        single => is_member(single),
    }
}
