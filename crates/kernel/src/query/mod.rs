//! Query contract driven by the filter engine.
//!
//! The filter engine never builds SQL itself. It mutates a [`Query`]
//! (selection, eager loads, conditions, ordering) and finally asks it for a
//! [`Page`]. Two collaborators ship with the kernel:
//! - [`memory`]: evaluates queries over JSON rows
//! - [`sql`]: renders queries with SeaQuery and runs them through sqlx

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Mutable query state for one filter call.
///
/// Every method except the two pagination methods only records intent;
/// nothing runs until the query is paginated.
#[async_trait]
pub trait Query: Send {
    /// Add columns to the selection. An empty selection means all columns.
    fn select(&mut self, columns: &[String]);

    /// Eager-load a relation; `build` configures the related query.
    fn with_relation(&mut self, relation: &str, build: &mut dyn FnMut(&mut dyn Query));

    /// Add a `<relation>_count` column for each relation.
    fn with_count(&mut self, relations: &[String]);

    /// Add a condition. Conditions are AND-ed.
    fn filter(&mut self, condition: Condition);

    /// Append an order clause. Clauses apply in call order.
    fn order_by(&mut self, column: &str, direction: SortDirection);

    /// Run the query with full page metadata (including the total).
    async fn paginate(&mut self, page: u32, per_page: u32) -> Result<Page>;

    /// Run the query without counting: only next/previous availability.
    async fn simple_paginate(&mut self, page: u32, per_page: u32) -> Result<Page>;
}

/// Where fresh queries come from.
pub trait RecordSource: Send + Sync {
    fn query(&self) -> Box<dyn Query>;

    /// Page size used when a request does not ask for one.
    fn per_page(&self) -> u32;
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// Exactly `"asc"` is ascending; anything else is descending.
    pub fn parse(direction: &str) -> Self {
        if direction == "asc" {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Exact match.
    Equals,
    /// Not equal.
    NotEquals,
    /// Substring match (LIKE %value%).
    Contains,
    /// Prefix match (LIKE value%).
    StartsWith,
    /// Suffix match (LIKE %value).
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// Value in list.
    In,
    /// Value not in list.
    NotIn,
    /// Field is NULL.
    IsNull,
    /// Field is not NULL.
    IsNotNull,
}

/// Condition operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    /// List of values (for In/NotIn operators).
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Convert a request value. `null` and objects have no operand form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(FilterValue::String(s.clone())),
            Value::Bool(b) => Some(FilterValue::Boolean(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(FilterValue::Integer)
                .or_else(|| n.as_f64().map(FilterValue::Float)),
            Value::Array(items) => Some(FilterValue::List(
                items.iter().filter_map(FilterValue::from_json).collect(),
            )),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// String representation, for scalars.
    pub fn as_string(&self) -> Option<String> {
        match self {
            FilterValue::String(s) => Some(s.clone()),
            FilterValue::Integer(i) => Some(i.to_string()),
            FilterValue::Float(f) => Some(f.to_string()),
            FilterValue::Boolean(b) => Some(b.to_string()),
            FilterValue::Uuid(u) => Some(u.to_string()),
            FilterValue::List(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Integer(i) => Some(*i as f64),
            FilterValue::Float(f) => Some(*f),
            FilterValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Items of a list; a scalar is a one-item list.
    pub fn items(&self) -> Vec<&FilterValue> {
        match self {
            FilterValue::List(items) => items.iter().collect(),
            scalar => vec![scalar],
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Uuid(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// A query condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Compare {
        column: String,
        operator: FilterOperator,
        value: FilterValue,
    },
    /// Disjunction. An empty list matches nothing.
    Any(Vec<Condition>),
    /// Conjunction. An empty list matches everything.
    All(Vec<Condition>),
}

impl Condition {
    pub fn compare(
        column: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Condition::Compare {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(column, FilterOperator::Equals, value)
    }

    pub fn contains(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(column, FilterOperator::Contains, value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::compare(column, FilterOperator::IsNull, FilterValue::Boolean(true))
    }
}

/// How a page was produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// Total count known.
    Full,
    /// Only next/previous availability known.
    #[default]
    Simple,
}

/// Pagination metadata for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub mode: PaginationMode,
    /// Current page number (1-indexed).
    pub current_page: u32,
    pub per_page: u32,
    /// Total matching records; `None` in simple mode.
    pub total: Option<u64>,
    /// Whether a next page exists.
    pub has_more: bool,
    /// Number of records on this page.
    pub item_count: usize,
}

impl PageMeta {
    /// Last page number; `None` without a total.
    pub fn last_page(&self) -> Option<u32> {
        let total = self.total?;
        if self.per_page == 0 {
            return Some(1);
        }
        let pages = total.div_ceil(u64::from(self.per_page)).max(1);
        Some(u32::try_from(pages).unwrap_or(u32::MAX))
    }

    /// 1-based position of the first record on this page.
    pub fn from(&self) -> Option<u64> {
        if self.item_count == 0 {
            return None;
        }
        Some(self.offset() + 1)
    }

    /// 1-based position of the last record on this page.
    pub fn to(&self) -> Option<u64> {
        if self.item_count == 0 {
            return None;
        }
        Some(self.offset() + self.item_count as u64)
    }

    pub fn has_previous(&self) -> bool {
        self.current_page > 1
    }

    fn offset(&self) -> u64 {
        page_offset(self.current_page, self.per_page)
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Value>,
    pub meta: PageMeta,
}

impl Page {
    /// A fully counted page.
    pub fn full(items: Vec<Value>, total: u64, page: u32, per_page: u32) -> Self {
        let consumed = page_offset(page, per_page) + items.len() as u64;
        let meta = PageMeta {
            mode: PaginationMode::Full,
            current_page: page,
            per_page,
            total: Some(total),
            has_more: consumed < total,
            item_count: items.len(),
        };
        Self { items, meta }
    }

    /// A page fetched with one look-ahead row: at most `per_page + 1` items,
    /// the extra one only signalling that a next page exists.
    pub fn simple(mut items: Vec<Value>, page: u32, per_page: u32) -> Self {
        let limit = per_page as usize;
        let has_more = items.len() > limit;
        items.truncate(limit);
        let meta = PageMeta {
            mode: PaginationMode::Simple,
            current_page: page,
            per_page,
            total: None,
            has_more,
            item_count: items.len(),
        };
        Self { items, meta }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Row offset for a 1-indexed page.
pub(crate) fn page_offset(page: u32, per_page: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(per_page)
}
