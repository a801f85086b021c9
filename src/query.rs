//! Query construction and evaluation
//!
//! `QueryBuilder` validates everything up front, so a `QuerySpec` that exists
//! is well-formed: known operators, non-empty field names, array operands for
//! `in`, and a positive limit. Stores evaluate specs with `QuerySpec::evaluate`
//! or translate them to their own query language.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::{Document, Value};
use crate::error::{BridgeError, Result};

/// Limit used when a query doesn't set one
pub const DEFAULT_LIMIT: usize = 100;

/// Filter comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
            Operator::Contains => "contains",
        }
    }
}

impl FromStr for Operator {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "in" => Ok(Operator::In),
            "contains" | "array-contains" => Ok(Operator::Contains),
            other => Err(BridgeError::Configuration(format!(
                "unknown filter operator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `field <op> value` predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    field: String,
    op: Operator,
    value: Value,
}

impl QueryFilter {
    /// Build a validated filter
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Result<Self> {
        let field = field.into();
        let value = value.into();

        if field.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "filter field name must not be empty".to_string(),
            ));
        }
        if op == Operator::In && value.as_array().is_none() {
            return Err(BridgeError::Configuration(format!(
                "filter on '{}': 'in' needs an array operand, got {}",
                field, value
            )));
        }

        Ok(Self { field, op, value })
    }

    /// Build a filter from an operator given as text
    pub fn from_parts(field: impl Into<String>, op: &str, value: impl Into<Value>) -> Result<Self> {
        Self::new(field, op.parse()?, value)
    }

    /// Parse `field<op>value`, e.g. `domain==apis`, `score >= 0.7`,
    /// `tier in [1, 2]`, `tags contains ml`
    pub fn parse(expr: &str) -> Result<Self> {
        const SYMBOLIC: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];
        const WORDS: [&str; 2] = [" contains ", " in "];

        let found = SYMBOLIC
            .iter()
            .filter_map(|op| expr.find(op).map(|pos| (pos, *op)))
            .min_by_key(|(pos, _)| *pos)
            .or_else(|| {
                WORDS
                    .iter()
                    .find_map(|op| expr.find(op).map(|pos| (pos, *op)))
            });

        let (pos, op_text) = found.ok_or_else(|| {
            BridgeError::Configuration(format!("no operator found in filter '{}'", expr))
        })?;

        let field = expr[..pos].trim();
        let raw_value = expr[pos + op_text.len()..].trim();
        let op: Operator = op_text.parse()?;

        let value = if op == Operator::In {
            let inner = raw_value
                .strip_prefix('[')
                .and_then(|v| v.strip_suffix(']'))
                .unwrap_or(raw_value);
            Value::Array(
                inner
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(Value::parse_literal)
                    .collect(),
            )
        } else {
            Value::parse_literal(raw_value)
        };

        Self::new(field, op, value)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether `doc` satisfies this predicate
    ///
    /// A document lacking the field never matches, whatever the operator.
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = match lookup(doc, &self.field) {
            Some(v) => v,
            None => return false,
        };

        match self.op {
            Operator::Eq => actual.loosely_equals(&self.value),
            Operator::Ne => !actual.loosely_equals(&self.value),
            Operator::Lt => actual.compare(&self.value) == Some(Ordering::Less),
            Operator::Le => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => actual.compare(&self.value) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::In => self
                .value
                .as_array()
                .map(|items| items.iter().any(|item| actual.loosely_equals(item)))
                .unwrap_or(false),
            Operator::Contains => match actual {
                Value::Array(items) => items.iter().any(|item| item.loosely_equals(&self.value)),
                Value::String(s) => self.value.as_str().map(|n| s.contains(n)).unwrap_or(false),
                _ => false,
            },
        }
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

/// Resolve a possibly dotted field path (`owner.team`) against a document
fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(path) {
        return Some(v);
    }

    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Map(map) => map.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Ordering key for a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A validated query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    collection: String,
    filters: Vec<QueryFilter>,
    limit: usize,
    order_by: Option<OrderBy>,
}

impl QuerySpec {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[QueryFilter] {
        &self.filters
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    /// True if `doc` satisfies every filter
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filter, order and limit documents given in the store's natural order
    pub fn evaluate<I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = Document>,
    {
        let matching = docs.into_iter().filter(|doc| self.matches(doc));

        let order = match &self.order_by {
            Some(order) => order,
            None => return matching.take(self.limit).collect(),
        };

        let mut ordered: Vec<Document> = matching
            .filter(|doc| lookup(doc, &order.field).is_some())
            .collect();

        // Stable sort over the total value order, so mixed types stay sorted
        ordered.sort_by(|a, b| {
            let ord = match (lookup(a, &order.field), lookup(b, &order.field)) {
                (Some(a), Some(b)) => a.total_order(b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            };
            match order.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });

        ordered.truncate(self.limit);
        ordered
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)?;
        for (i, filter) in self.filters.iter().enumerate() {
            let sep = if i == 0 { " where " } else { " and " };
            write!(f, "{}{}", sep, filter)?;
        }
        if let Some(order) = &self.order_by {
            write!(f, " order by {} {:?}", order.field, order.direction)?;
        }
        write!(f, " limit {}", self.limit)
    }
}

/// Builder for QuerySpec
///
/// Errors are held until `build()` so calls chain without `?` at each step.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    collection: String,
    filters: Vec<QueryFilter>,
    limit: usize,
    order_by: Option<OrderBy>,
    error: Option<String>,
}

impl QueryBuilder {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            limit: DEFAULT_LIMIT,
            order_by: None,
            error: None,
        }
    }

    /// Add a filter with a textual operator (`"=="`, `"in"`, ...)
    pub fn filter(mut self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        match QueryFilter::from_parts(field, op, value) {
            Ok(filter) => self.filters.push(filter),
            Err(e) => self.remember(e),
        }
        self
    }

    /// Add an already-built filter
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters<I>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = QueryFilter>,
    {
        self.filters.extend(filters);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        if limit == 0 {
            self.remember(BridgeError::Configuration(
                "query limit must be at least 1".to_string(),
            ));
        }
        self.limit = limit;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        let field = field.into();
        if field.trim().is_empty() {
            self.remember(BridgeError::Configuration(
                "order_by field name must not be empty".to_string(),
            ));
        }
        self.order_by = Some(OrderBy { field, direction });
        self
    }

    fn remember(&mut self, e: BridgeError) {
        if self.error.is_none() {
            self.error = Some(match e {
                BridgeError::Configuration(msg) => msg,
                other => other.to_string(),
            });
        }
    }

    /// Validate and produce the spec
    pub fn build(self) -> Result<QuerySpec> {
        if let Some(msg) = self.error {
            return Err(BridgeError::Configuration(msg));
        }
        if self.collection.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "query collection must not be empty".to_string(),
            ));
        }

        Ok(QuerySpec {
            collection: self.collection,
            filters: self.filters,
            limit: self.limit,
            order_by: self.order_by,
        })
    }
}

/// Query results: a finite, ordered, single-pass snapshot
///
/// The documents were copied out of the store when the query ran, so later
/// writes don't change them. Consumed by iteration; not restartable.
#[derive(Debug)]
pub struct Documents {
    inner: std::vec::IntoIter<Document>,
}

impl Documents {
    pub fn from_snapshot(docs: Vec<Document>) -> Self {
        Self {
            inner: docs.into_iter(),
        }
    }
}

impl Iterator for Documents {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Documents {}
