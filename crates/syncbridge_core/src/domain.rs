//! Remote search domains.
//!
//! A domain is a conjunction of `(field, operator, value)` conditions, the
//! shape business-object APIs accept for `search` calls. Modules return one
//! from their dedup predicate to find an existing remote record by natural key.

use crate::types::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Exact equality.
    #[serde(rename = "=")]
    Eq,
    /// Inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Case-insensitive equality.
    #[serde(rename = "=ilike")]
    EqIgnoreCase,
    /// Case-insensitive substring match.
    #[serde(rename = "ilike")]
    ILike,
    /// Membership in a list.
    #[serde(rename = "in")]
    In,
}

impl Operator {
    /// Wire symbol of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::EqIgnoreCase => "=ilike",
            Operator::ILike => "ilike",
            Operator::In => "in",
        }
    }
}

/// One `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Remote field name.
    pub field: String,
    /// Comparison.
    pub operator: Operator,
    /// Right-hand side.
    pub value: Value,
}

impl Condition {
    /// Evaluates the condition against a record.
    ///
    /// A missing field compares as `null`.
    pub fn matches(&self, record: &Fields) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Eq => actual == &self.value,
            Operator::Ne => actual != &self.value,
            Operator::EqIgnoreCase => match (actual.as_str(), self.value.as_str()) {
                (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
                _ => actual == &self.value,
            },
            Operator::ILike => match (actual.as_str(), self.value.as_str()) {
                (Some(a), Some(b)) => a.to_lowercase().contains(&b.to_lowercase()),
                _ => false,
            },
            Operator::In => self
                .value
                .as_array()
                .map_or(false, |candidates| candidates.contains(actual)),
        }
    }
}

/// A conjunction of conditions. The empty domain matches every record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain {
    conditions: Vec<Condition>,
}

impl Domain {
    /// Creates an empty domain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition.
    pub fn with(mut self, field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Adds an equality condition.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Operator::Eq, value)
    }

    /// Adds a case-insensitive equality condition.
    pub fn eq_ignore_case(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Operator::EqIgnoreCase, value)
    }

    /// The conditions, in insertion order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns true if there are no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates every condition against a record.
    pub fn matches(&self, record: &Fields) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }

    /// Renders the domain as a list of `[field, operator, value]` triples.
    pub fn to_triples(&self) -> Value {
        Value::Array(
            self.conditions
                .iter()
                .map(|c| {
                    Value::Array(vec![
                        Value::String(c.field.clone()),
                        Value::String(c.operator.symbol().to_string()),
                        c.value.clone(),
                    ])
                })
                .collect(),
        )
    }
}
