//! Predicate trees evaluated by Condition nodes.
//!
//! Leaves compare one instance variable against a literal; inner nodes
//! combine leaves with `and` / `or` / `not`. The serialized form is compact:
//!
//! ```yaml
//! predicate:
//!   and:
//!     - { field: days, operator: gt, value: 3 }
//!     - not: { field: department, operator: in, value: [finance, legal] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A boolean expression over an instance's variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    /// True when every child is true.
    And { and: Vec<Predicate> },
    /// True when at least one child is true.
    Or { or: Vec<Predicate> },
    /// Negation of the child.
    Not { not: Box<Predicate> },
    /// Leaf comparison.
    Compare(Comparison),
}

impl Predicate {
    /// Shorthand for a leaf comparison.
    pub fn compare(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Predicate::Compare(Comparison {
            field: field.into(),
            operator,
            value,
        })
    }

    /// Every variable name referenced by this tree, in visit order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::And { and: children } | Predicate::Or { or: children } => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Predicate::Not { not } => not.collect_fields(out),
            Predicate::Compare(cmp) => out.push(cmp.field.as_str()),
        }
    }
}

/// Leaf of a predicate tree: `field <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Variable name. Dotted paths (`employee.level`) descend into objects.
    pub field: String,
    pub operator: Operator,
    /// Literal right-hand side. For `in` this must be an array.
    pub value: Value,
}

/// Comparison operators supported by the condition evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_leaf_from_yaml() {
        let yaml = "{ field: days, operator: gt, value: 3 }";
        let p: Predicate = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(p, Predicate::compare("days", Operator::Gt, json!(3)));
    }

    #[test]
    fn parse_nested_tree() {
        let yaml = r#"
and:
  - { field: days, operator: gte, value: 3 }
  - or:
      - { field: level, operator: in, value: [P6, P7] }
      - not: { field: remote, operator: eq, value: true }
"#;
        let p: Predicate = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(p.fields(), vec!["days", "level", "remote"]);
        match p {
            Predicate::And { and } => {
                assert_eq!(and.len(), 2);
                assert!(matches!(and[1], Predicate::Or { .. }));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn unknown_operator_is_rejected_at_parse_time() {
        let json = r#"{"field":"days","operator":"like","value":"x"}"#;
        assert!(serde_json::from_str::<Predicate>(json).is_err());
    }

    #[test]
    fn operator_display_matches_serde_name() {
        for op in [
            Operator::Eq,
            Operator::Ne,
            Operator::Gt,
            Operator::Gte,
            Operator::Lt,
            Operator::Lte,
            Operator::In,
        ] {
            let serialized = serde_json::to_value(op).unwrap();
            assert_eq!(serialized, json!(op.to_string()));
        }
    }
}
