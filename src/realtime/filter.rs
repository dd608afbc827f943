//! # Filters
//!
//! Wire filters (`column=op.value`, evaluated by the backend before an
//! event is pushed) and post-receipt filter predicates (evaluated locally
//! before dispatch).

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangeEvent;

/// Filter operator for wire filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }
}

impl FromStr for FilterOp {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "neq" => Ok(FilterOp::Neq),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "in" => Ok(FilterOp::In),
            other => Err(RealtimeError::InvalidFilter(format!("unknown operator '{}'", other))),
        }
    }
}

fn filter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=([a-z]+)\.(.*)$").expect("filter pattern compiles")
    })
}

/// A server-side row filter, e.g. `recipient=eq.u1`. Serialized in that form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WireFilter {
    /// Column to filter on
    pub column: String,
    /// Operator
    pub op: FilterOp,
    /// Raw right-hand side, as written on the wire
    pub value: String,
}

impl WireFilter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column=eq.value`
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    /// Parse the `column=op.value` wire form
    pub fn parse(s: &str) -> RealtimeResult<Self> {
        let caps = filter_pattern()
            .captures(s.trim())
            .ok_or_else(|| RealtimeError::InvalidFilter(s.to_string()))?;

        let op: FilterOp = caps[2].parse()?;
        let value = caps[3].to_string();

        if op == FilterOp::In && !(value.starts_with('(') && value.ends_with(')')) {
            return Err(RealtimeError::InvalidFilter(format!(
                "'in' expects a parenthesized list: {}",
                s
            )));
        }

        Ok(Self::new(&caps[1], op, value))
    }

    fn in_list(&self) -> Vec<&str> {
        self.value
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Evaluate against a record, the way the backend would
    pub fn matches(&self, record: &Value) -> bool {
        let Some(field) = record.get(&self.column) else {
            return false;
        };

        let text = match field {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        };

        let ordered = |cmp: fn(f64, f64) -> bool| match (field.as_f64(), self.value.parse::<f64>()) {
            (Some(a), Ok(b)) => cmp(a, b),
            _ => false,
        };

        match self.op {
            FilterOp::Eq => text == self.value,
            FilterOp::Neq => text != self.value,
            FilterOp::Gt => ordered(|a, b| a > b),
            FilterOp::Gte => ordered(|a, b| a >= b),
            FilterOp::Lt => ordered(|a, b| a < b),
            FilterOp::Lte => ordered(|a, b| a <= b),
            FilterOp::In => self.in_list().contains(&text.as_str()),
        }
    }
}

impl fmt::Display for WireFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}

impl From<WireFilter> for String {
    fn from(filter: WireFilter) -> Self {
        filter.to_string()
    }
}

impl TryFrom<String> for WireFilter {
    type Error = RealtimeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl FromStr for WireFilter {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Post-receipt predicate applied before fan-out
#[derive(Clone)]
pub struct FilterPredicate {
    name: &'static str,
    test: Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>,
}

impl FilterPredicate {
    pub fn new(name: &'static str, test: impl Fn(&ChangeEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name,
            test: Arc::new(test),
        }
    }

    /// Passes every event
    pub fn accept_all() -> Self {
        Self::new("accept_all", |_| true)
    }

    /// Drops records whose `is_private` flag is set or missing. A DELETE
    /// carries only the old row, so that side is checked for deletes.
    ///
    /// A backend that sends just the primary key in a DELETE's old row
    /// therefore never delivers the delete of a shared note; the table
    /// needs full replica identity for deletes to come through.
    pub fn exclude_private() -> Self {
        Self::new("exclude_private", |event| {
            event
                .record()
                .get("is_private")
                .and_then(Value::as_bool)
                .map(|private| !private)
                .unwrap_or(false)
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn test(&self, event: &ChangeEvent) -> bool {
        (self.test)(event)
    }
}

impl Default for FilterPredicate {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl fmt::Debug for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterPredicate").field(&self.name).finish()
    }
}
