//! Row filters for root queries and relation modifiers

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GraphError, GraphResult};
use crate::schema::EntityDef;

/// Comparison operators supported in filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// SQL `LIKE` with `%`/`_` wildcards
    Like,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }

    fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "~" => Some(Self::Like),
            _ => None,
        }
    }
}

/// A single `column op value` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

/// Conjunction of conditions on one entity's columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

static CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(>=|<=|!=|=|<|>|~)\s*(.*?)\s*$")
        .expect("condition pattern is valid")
});

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn with(mut self, column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(column, CompareOp::Eq, value)
    }

    pub fn ge(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(column, CompareOp::Ge, value)
    }

    /// Combine two filters (logical AND)
    pub fn and(mut self, other: &Filter) -> Self {
        self.conditions.extend(other.conditions.iter().cloned());
        self
    }

    /// Parse `column<op>value` (e.g. `age>=41`, `name~Ka%`)
    ///
    /// The value is read as JSON when possible and as a bare string otherwise.
    pub fn parse_condition(text: &str) -> GraphResult<Condition> {
        let captures = CONDITION.captures(text).ok_or_else(|| {
            GraphError::validation(format!(
                "malformed filter '{}', expected <column><op><value>",
                text
            ))
        })?;

        let op = CompareOp::parse(&captures[2])
            .ok_or_else(|| GraphError::validation(format!("unknown operator in '{}'", text)))?;
        let raw = &captures[3];
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        Ok(Condition {
            column: captures[1].to_string(),
            op,
            value,
        })
    }

    /// Parse several conditions into one filter
    pub fn parse_all<'a>(conditions: impl IntoIterator<Item = &'a str>) -> GraphResult<Self> {
        let conditions = conditions
            .into_iter()
            .map(Self::parse_condition)
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Self { conditions })
    }

    /// Check columns against `entity` and coerce values to their column types
    pub fn resolve(&self, entity: &EntityDef) -> GraphResult<Filter> {
        let mut conditions = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let column_type = entity.column_type(&condition.column).ok_or_else(|| {
                GraphError::validation(format!(
                    "filter column '{}' is not an attribute of '{}'",
                    condition.column, entity.name
                ))
            })?;

            let value = if condition.op == CompareOp::Like {
                match &condition.value {
                    Value::String(_) => condition.value.clone(),
                    other => {
                        return Err(GraphError::validation(format!(
                            "pattern for '{}' must be a string, found {}",
                            condition.column, other
                        )));
                    }
                }
            } else {
                column_type.coerce(&condition.value).ok_or_else(|| {
                    GraphError::validation(format!(
                        "filter value {} does not fit column '{}.{}' ({:?})",
                        condition.value, entity.name, condition.column, column_type
                    ))
                })?
            };

            if value.is_null() && !matches!(condition.op, CompareOp::Eq | CompareOp::Ne) {
                return Err(GraphError::validation(format!(
                    "null can only be compared with = or != (column '{}')",
                    condition.column
                )));
            }

            conditions.push(Condition {
                column: condition.column.clone(),
                op: condition.op,
                value,
            });
        }
        Ok(Filter { conditions })
    }
}

/// Named filters referenced from relation expressions (`children(adults)`)
#[derive(Debug, Clone, Default)]
pub struct Modifiers {
    filters: HashMap<String, Filter>,
}

impl Modifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, filter: Filter) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    /// Combine the named modifiers into a single filter
    pub fn combine(&self, names: &[String]) -> GraphResult<Filter> {
        names.iter().try_fold(Filter::new(), |acc, name| {
            self.get(name)
                .map(|filter| acc.and(filter))
                .ok_or_else(|| GraphError::validation(format!("unknown modifier '{}'", name)))
        })
    }
}
