//! In-memory query collaborator.
//!
//! Rows are JSON objects; relations are nested objects (to-one) or arrays
//! (to-many) already embedded in each row. Useful for tests, fixtures and
//! the `apix project` command.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{
    Condition, FilterOperator, FilterValue, Page, Query, RecordSource, SortDirection, page_offset,
};
use crate::error::Result;

/// Default page size of a memory source.
const DEFAULT_PER_PAGE: u32 = 15;

/// A fixed set of JSON rows.
#[derive(Debug, Clone)]
pub struct MemorySource {
    rows: Arc<Vec<Value>>,
    per_page: u32,
}

impl MemorySource {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows: Arc::new(rows),
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RecordSource for MemorySource {
    fn query(&self) -> Box<dyn Query> {
        Box::new(MemoryQuery::new(Arc::clone(&self.rows)))
    }

    fn per_page(&self) -> u32 {
        self.per_page
    }
}

/// Query over JSON rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    rows: Arc<Vec<Value>>,
    columns: Vec<String>,
    relations: Vec<(String, MemoryQuery)>,
    counts: Vec<String>,
    conditions: Vec<Condition>,
    orders: Vec<(String, SortDirection)>,
}

impl MemoryQuery {
    pub fn new(rows: Arc<Vec<Value>>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Rows matching every condition, in order-clause order.
    fn matching<'a>(&self, rows: impl Iterator<Item = &'a Value>) -> Vec<&'a Value> {
        let mut matched: Vec<&Value> = rows
            .filter(|row| self.conditions.iter().all(|c| evaluate(row, c)))
            .collect();

        if !self.orders.is_empty() {
            // sort_by is stable: ties keep source order
            matched.sort_by(|a, b| {
                self.orders.iter().fold(Ordering::Equal, |acc, (column, direction)| {
                    acc.then_with(|| {
                        let ordering = compare_json(field(a, column), field(b, column));
                        match direction {
                            SortDirection::Asc => ordering,
                            SortDirection::Desc => ordering.reverse(),
                        }
                    })
                })
            });
        }
        matched
    }

    /// Restrict a row to the selection, eager loads and counts.
    fn shape(&self, row: &Value) -> Value {
        let Value::Object(source) = row else {
            return row.clone();
        };

        let mut out = if self.columns.is_empty() || self.columns.iter().any(|c| c == "*") {
            source.clone()
        } else {
            let mut selected = Map::new();
            for column in &self.columns {
                let name = column_name(column);
                if let Some(value) = source.get(name) {
                    selected.insert(name.to_string(), value.clone());
                }
            }
            selected
        };

        for (name, child) in &self.relations {
            let loaded = match source.get(name) {
                Some(Value::Array(items)) => Value::Array(
                    child
                        .matching(items.iter())
                        .into_iter()
                        .map(|item| child.shape(item))
                        .collect(),
                ),
                Some(item @ Value::Object(_)) => {
                    if child.conditions.iter().all(|c| evaluate(item, c)) {
                        child.shape(item)
                    } else {
                        Value::Null
                    }
                }
                _ => Value::Null,
            };
            out.insert(name.clone(), loaded);
        }

        for name in &self.counts {
            let count = match source.get(name) {
                Some(Value::Array(items)) => items.len(),
                Some(Value::Object(_)) => 1,
                _ => 0,
            };
            out.insert(format!("{name}_count"), Value::from(count));
        }

        Value::Object(out)
    }
}

#[async_trait]
impl Query for MemoryQuery {
    fn select(&mut self, columns: &[String]) {
        for column in columns {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
    }

    fn with_relation(&mut self, relation: &str, build: &mut dyn FnMut(&mut dyn Query)) {
        let mut child = MemoryQuery::default();
        build(&mut child);
        match self.relations.iter_mut().find(|(name, _)| name == relation) {
            Some((_, existing)) => *existing = child,
            None => self.relations.push((relation.to_string(), child)),
        }
    }

    fn with_count(&mut self, relations: &[String]) {
        for relation in relations {
            if !self.counts.contains(relation) {
                self.counts.push(relation.clone());
            }
        }
    }

    fn filter(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    fn order_by(&mut self, column: &str, direction: SortDirection) {
        self.orders.push((column.to_string(), direction));
    }

    async fn paginate(&mut self, page: u32, per_page: u32) -> Result<Page> {
        let matched = self.matching(self.rows.iter());
        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(usize::try_from(page_offset(page, per_page)).unwrap_or(usize::MAX))
            .take(per_page as usize)
            .map(|row| self.shape(row))
            .collect();
        Ok(Page::full(items, total, page, per_page))
    }

    async fn simple_paginate(&mut self, page: u32, per_page: u32) -> Result<Page> {
        let items = self
            .matching(self.rows.iter())
            .into_iter()
            .skip(usize::try_from(page_offset(page, per_page)).unwrap_or(usize::MAX))
            .take(per_page as usize + 1)
            .map(|row| self.shape(row))
            .collect();
        Ok(Page::simple(items, page, per_page))
    }
}

/// Field name without a table qualifier.
fn column_name(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

fn field<'a>(row: &'a Value, column: &str) -> &'a Value {
    row.get(column_name(column)).unwrap_or(&Value::Null)
}

fn evaluate(row: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::Compare {
            column,
            operator,
            value,
        } => compare(field(row, column), *operator, value),
        Condition::Any(conditions) => conditions.iter().any(|c| evaluate(row, c)),
        Condition::All(conditions) => conditions.iter().all(|c| evaluate(row, c)),
    }
}

/// SQL-like comparison: NULL fields only match the null checks.
fn compare(field: &Value, operator: FilterOperator, value: &FilterValue) -> bool {
    match operator {
        FilterOperator::IsNull => return field.is_null(),
        FilterOperator::IsNotNull => return !field.is_null(),
        _ if field.is_null() => return false,
        _ => {}
    }

    match operator {
        FilterOperator::Equals => scalar_cmp(field, value) == Some(Ordering::Equal),
        FilterOperator::NotEquals => {
            matches!(scalar_cmp(field, value), Some(o) if o != Ordering::Equal)
        }
        FilterOperator::Contains => text_match(field, value, |f, v| f.contains(v)),
        FilterOperator::StartsWith => text_match(field, value, |f, v| f.starts_with(v)),
        FilterOperator::EndsWith => text_match(field, value, |f, v| f.ends_with(v)),
        FilterOperator::GreaterThan => scalar_cmp(field, value) == Some(Ordering::Greater),
        FilterOperator::LessThan => scalar_cmp(field, value) == Some(Ordering::Less),
        FilterOperator::GreaterOrEqual => {
            matches!(scalar_cmp(field, value), Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOperator::LessOrEqual => {
            matches!(scalar_cmp(field, value), Some(Ordering::Less | Ordering::Equal))
        }
        FilterOperator::In => value
            .items()
            .into_iter()
            .any(|v| scalar_cmp(field, v) == Some(Ordering::Equal)),
        FilterOperator::NotIn => !value
            .items()
            .into_iter()
            .any(|v| scalar_cmp(field, v) == Some(Ordering::Equal)),
        FilterOperator::IsNull | FilterOperator::IsNotNull => false,
    }
}

fn text_match(field: &Value, value: &FilterValue, test: impl Fn(&str, &str) -> bool) -> bool {
    let Some(needle) = value.as_string() else {
        return false;
    };
    match field {
        Value::String(s) => test(s, &needle),
        Value::Number(n) => test(&n.to_string(), &needle),
        Value::Bool(b) => test(&b.to_string(), &needle),
        _ => false,
    }
}

fn scalar_cmp(field: &Value, value: &FilterValue) -> Option<Ordering> {
    match (field, value) {
        (Value::Number(n), v) => n.as_f64()?.partial_cmp(&v.as_f64()?),
        (Value::String(s), FilterValue::Integer(_) | FilterValue::Float(_)) => {
            s.parse::<f64>().ok()?.partial_cmp(&value.as_f64()?)
        }
        (Value::String(_), FilterValue::List(_)) => None,
        (Value::String(s), v) => Some(s.as_str().cmp(v.as_string()?.as_str())),
        (Value::Bool(b), FilterValue::Boolean(v)) => Some(b.cmp(v)),
        (Value::Bool(b), FilterValue::String(v)) => Some(b.to_string().as_str().cmp(v.as_str())),
        _ => None,
    }
}

/// Total order for sorting: null < bool < number < string < other.
fn compare_json(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
