//! Predicate evaluation for Condition nodes.
//!
//! `evaluate` is a pure function of the predicate and the instance's variable
//! bag. Every leaf is evaluated (no short-circuiting), so a predicate that
//! references a missing variable fails regardless of how the other leaves
//! come out.

use std::cmp::Ordering;

use hrflow_types::predicate::{Comparison, Operator, Predicate};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors raised while evaluating a predicate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("operator '{operator}' cannot compare field '{field}' ({left}) with {right}")]
    TypeMismatch {
        field: String,
        operator: Operator,
        left: &'static str,
        right: &'static str,
    },
}

/// Evaluate a predicate against instance variables.
pub fn evaluate(predicate: &Predicate, variables: &Map<String, Value>) -> Result<bool, EvaluationError> {
    match predicate {
        Predicate::And { and } => {
            let results = and
                .iter()
                .map(|p| evaluate(p, variables))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(results.into_iter().all(|b| b))
        }
        Predicate::Or { or } => {
            let results = or
                .iter()
                .map(|p| evaluate(p, variables))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(results.into_iter().any(|b| b))
        }
        Predicate::Not { not } => Ok(!evaluate(not, variables)?),
        Predicate::Compare(cmp) => compare(cmp, variables),
    }
}

/// Resolve a field name against the variable bag.
///
/// An exact top-level key wins (engine-written keys such as
/// `approval.manager` contain dots); otherwise the name is split on `.` and
/// each segment descends into a nested object.
pub fn lookup<'v>(field: &str, variables: &'v Map<String, Value>) -> Option<&'v Value> {
    if let Some(v) = variables.get(field) {
        return Some(v);
    }
    let mut segments = field.split('.');
    let mut current = variables.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn compare(cmp: &Comparison, variables: &Map<String, Value>) -> Result<bool, EvaluationError> {
    let left = lookup(&cmp.field, variables)
        .ok_or_else(|| EvaluationError::UnknownField(cmp.field.clone()))?;
    let right = &cmp.value;
    let mismatch = || EvaluationError::TypeMismatch {
        field: cmp.field.clone(),
        operator: cmp.operator,
        left: type_name(left),
        right: type_name(right),
    };

    match cmp.operator {
        Operator::Eq => Ok(loose_eq(left, right)),
        Operator::Ne => Ok(!loose_eq(left, right)),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let ordering = order(left, right).ok_or_else(mismatch)?;
            Ok(match cmp.operator {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Gte => ordering != Ordering::Less,
                Operator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        Operator::In => {
            let items = right.as_array().ok_or_else(mismatch)?;
            Ok(items.iter().any(|item| loose_eq(left, item)))
        }
    }
}

/// Equality where numbers compare by value (`5 == 5.0`).
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_cmp(x, y) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Ordering for numbers (numeric) and strings (lexicographic). Anything else
/// is not orderable.
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_cmp(x, y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn number_cmp(x: &Number, y: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return Some(a.cmp(&b));
    }
    x.as_f64()?.partial_cmp(&y.as_f64()?)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn leaf(field: &str, op: Operator, value: Value) -> Predicate {
        Predicate::compare(field, op, value)
    }

    #[test]
    fn test_days_routing() {
        let p = leaf("days", Operator::Gt, json!(3));
        assert!(evaluate(&p, &vars(json!({"days": 5}))).unwrap());
        assert!(!evaluate(&p, &vars(json!({"days": 2}))).unwrap());
        assert_eq!(
            evaluate(&p, &vars(json!({}))),
            Err(EvaluationError::UnknownField("days".into()))
        );
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let v = vars(json!({"n": 5, "f": 2.5, "big": u64::MAX}));
        assert!(evaluate(&leaf("n", Operator::Eq, json!(5.0)), &v).unwrap());
        assert!(evaluate(&leaf("f", Operator::Lt, json!(3)), &v).unwrap());
        assert!(evaluate(&leaf("f", Operator::Gte, json!(2.5)), &v).unwrap());
        assert!(evaluate(&leaf("big", Operator::Gt, json!(1)), &v).unwrap());
        assert!(evaluate(&leaf("n", Operator::Ne, json!("5")), &v).unwrap());
    }

    #[test]
    fn test_strings_compare_lexicographically() {
        let v = vars(json!({"level": "P6"}));
        assert!(evaluate(&leaf("level", Operator::Gt, json!("P5")), &v).unwrap());
        assert!(evaluate(&leaf("level", Operator::Lte, json!("P6")), &v).unwrap());
        assert!(evaluate(&leaf("level", Operator::In, json!(["P6", "P7"])), &v).unwrap());
        assert!(!evaluate(&leaf("level", Operator::In, json!([])), &v).unwrap());
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let v = vars(json!({"remote": true, "level": "P6"}));
        assert!(matches!(
            evaluate(&leaf("remote", Operator::Gt, json!(1)), &v),
            Err(EvaluationError::TypeMismatch { left: "bool", .. })
        ));
        assert!(matches!(
            evaluate(&leaf("level", Operator::In, json!("P6")), &v),
            Err(EvaluationError::TypeMismatch { right: "string", .. })
        ));
        assert!(matches!(
            evaluate(&leaf("level", Operator::Lt, json!(7)), &v),
            Err(EvaluationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_dotted_paths_and_literal_dotted_keys() {
        let v = vars(json!({
            "employee": {"grade": {"band": 4}},
            "approval.manager": "approved"
        }));
        assert!(evaluate(&leaf("employee.grade.band", Operator::Eq, json!(4)), &v).unwrap());
        assert!(evaluate(&leaf("approval.manager", Operator::Eq, json!("approved")), &v).unwrap());
        assert_eq!(
            evaluate(&leaf("employee.grade.missing", Operator::Eq, json!(1)), &v),
            Err(EvaluationError::UnknownField("employee.grade.missing".into()))
        );
    }

    #[test]
    fn test_combinators_evaluate_every_leaf() {
        let v = vars(json!({"days": 5, "remote": false}));
        let any = Predicate::Or {
            or: vec![
                leaf("days", Operator::Gt, json!(3)),
                leaf("ghost", Operator::Eq, json!(1)),
            ],
        };
        // The first branch is true, but the unknown field still fails.
        assert!(matches!(evaluate(&any, &v), Err(EvaluationError::UnknownField(_))));

        let all = Predicate::And {
            and: vec![
                leaf("days", Operator::Gte, json!(5)),
                Predicate::Not {
                    not: Box::new(leaf("remote", Operator::Eq, json!(true))),
                },
            ],
        };
        assert!(evaluate(&all, &v).unwrap());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let v = vars(json!({"days": 4, "dept": "legal"}));
        let p = Predicate::And {
            and: vec![
                leaf("days", Operator::Gt, json!(3)),
                leaf("dept", Operator::In, json!(["legal", "finance"])),
            ],
        };
        let first = evaluate(&p, &v);
        for _ in 0..10 {
            assert_eq!(evaluate(&p, &v), first);
        }
    }
}
