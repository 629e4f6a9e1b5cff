//! SQL query collaborator using SeaQuery and sqlx.
//!
//! Generates PostgreSQL from the recorded query state:
//! - column selection (table-qualified or bare)
//! - condition trees with LIKE wildcard escaping
//! - correlated COUNT subqueries for `with_count`
//! - eager loads as batched `IN (...)` child queries distributed into
//!   parent rows, up to [`MAX_RELATION_DEPTH`] levels

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use sea_query::{
    Alias, Asterisk, Cond, Expr, ExprTrait, Order, PostgresQueryBuilder, Query as SeaQuery,
    SelectStatement, SimpleExpr,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    Condition, FilterOperator, FilterValue, Page, Query, RecordSource, SortDirection, page_offset,
};
use crate::error::{Error, Result};

/// Maximum nesting depth for eager loads.
pub const MAX_RELATION_DEPTH: u8 = 3;

const DEFAULT_PER_PAGE: u32 = 15;

/// How a relation joins its parent table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Related table.
    pub table: String,

    /// Column on the parent row.
    pub local_field: String,

    /// Column on the related rows matching `local_field`.
    pub foreign_field: String,

    /// Embed one row (or null) instead of an array.
    #[serde(default)]
    pub singular: bool,
}

impl Relation {
    /// Related rows point at the parent: `table.foreign_field = parent.local_field`.
    pub fn has_many(table: &str, local_field: &str, foreign_field: &str) -> Self {
        Self {
            table: table.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            singular: false,
        }
    }

    /// Like [`Relation::has_many`], embedding a single row.
    pub fn has_one(table: &str, local_field: &str, foreign_field: &str) -> Self {
        Self {
            singular: true,
            ..Self::has_many(table, local_field, foreign_field)
        }
    }
}

/// Relations by table, then by relation name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    tables: HashMap<String, HashMap<String, Relation>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relation(mut self, table: &str, name: &str, relation: Relation) -> Self {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(name.to_string(), relation);
        self
    }

    pub fn get(&self, table: &str, name: &str) -> Option<&Relation> {
        self.tables.get(table)?.get(name)
    }
}

/// A database table as a record source.
#[derive(Debug, Clone)]
pub struct SqlSource {
    pool: PgPool,
    table: String,
    schema: Arc<Schema>,
    per_page: u32,
}

impl SqlSource {
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
            schema: Arc::new(Schema::default()),
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }
}

impl RecordSource for SqlSource {
    fn query(&self) -> Box<dyn Query> {
        Box::new(
            SqlQuery::new(&self.table, Arc::clone(&self.schema)).with_pool(self.pool.clone()),
        )
    }

    fn per_page(&self) -> u32 {
        self.per_page
    }
}

/// Query against one table.
///
/// A query without a pool can still render SQL; running it fails.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    table: String,
    schema: Arc<Schema>,
    pool: Option<PgPool>,
    columns: Vec<String>,
    relations: Vec<(String, SqlQuery)>,
    counts: Vec<String>,
    conditions: Vec<Condition>,
    orders: Vec<(String, SortDirection)>,
}

impl SqlQuery {
    pub fn new(table: &str, schema: Arc<Schema>) -> Self {
        Self {
            table: table.to_string(),
            schema,
            pool: None,
            columns: Vec::new(),
            relations: Vec::new(),
            counts: Vec::new(),
            conditions: Vec::new(),
            orders: Vec::new(),
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build the main SELECT query with pagination.
    pub fn build(&self, page: u32, per_page: u32) -> String {
        self.window(page_offset(page, per_page), u64::from(per_page))
            .to_string(PostgresQueryBuilder)
    }

    /// Build the SELECT for simple pagination: one row past the page tells
    /// whether a next page exists.
    fn build_look_ahead(&self, page: u32, per_page: u32) -> String {
        self.window(page_offset(page, per_page), u64::from(per_page) + 1)
            .to_string(PostgresQueryBuilder)
    }

    /// Build a COUNT query for total results.
    pub fn build_count(&self) -> String {
        let mut query = SeaQuery::select();
        query.expr(Expr::col(Asterisk).count());
        query.from(Alias::new(&self.table));
        self.add_conditions(&mut query);
        query.to_string(PostgresQueryBuilder)
    }

    /// SELECT with conditions and ordering, without LIMIT/OFFSET.
    fn statement(&self) -> SelectStatement {
        let mut query = SeaQuery::select();
        self.add_select_fields(&mut query);
        query.from(Alias::new(&self.table));
        self.add_conditions(&mut query);
        self.add_sorts(&mut query);
        query
    }

    fn window(&self, offset: u64, limit: u64) -> SelectStatement {
        let mut query = self.statement();
        query.limit(limit);
        query.offset(offset);
        query
    }

    /// Add SELECT fields, relation keys and count subqueries.
    fn add_select_fields(&self, query: &mut SelectStatement) {
        if self.columns.is_empty() || self.columns.iter().any(|c| c == "*") {
            query.column((Alias::new(&self.table), Asterisk));
        } else {
            let mut selected: Vec<&str> = self.columns.iter().map(String::as_str).collect();
            // Distributing eager loads needs the parent key
            for (name, _) in &self.relations {
                if let Some(relation) = self.schema.get(&self.table, name)
                    && !selected.contains(&relation.local_field.as_str())
                {
                    selected.push(&relation.local_field);
                }
            }

            for column in selected {
                match self.column_ref(column) {
                    Some(column) => {
                        query.column(column);
                    }
                    None => {
                        tracing::warn!(table = %self.table, column, "invalid column name, not selected");
                    }
                }
            }
        }

        for name in &self.counts {
            let Some(relation) = self.schema.get(&self.table, name) else {
                continue;
            };
            let mut count = SeaQuery::select();
            count
                .expr(Expr::col(Asterisk).count())
                .from(Alias::new(&relation.table))
                .and_where(
                    Expr::col((Alias::new(&relation.table), Alias::new(&relation.foreign_field)))
                        .equals((Alias::new(&self.table), Alias::new(&relation.local_field))),
                );
            query.expr_as(
                Expr::cust(format!("({})", count.to_string(PostgresQueryBuilder))),
                Alias::new(format!("{name}_count")),
            );
        }
    }

    fn add_conditions(&self, query: &mut SelectStatement) {
        for condition in &self.conditions {
            if let Some(expr) = self.condition_expr(condition) {
                query.and_where(expr);
            }
        }
    }

    /// Build a condition tree. `None` means "no restriction".
    fn condition_expr(&self, condition: &Condition) -> Option<SimpleExpr> {
        match condition {
            Condition::Compare {
                column,
                operator,
                value,
            } => {
                let Some(field) = self.column_ref(column) else {
                    tracing::warn!(table = %self.table, column = %column, "invalid column name; restricting results");
                    // Restrict rather than widen query results
                    return Some(Expr::cust("FALSE"));
                };
                compare_expr(Expr::col(field).into(), *operator, value)
            }
            Condition::Any(conditions) => {
                let mut cond = Cond::any();
                let mut empty = true;
                for condition in conditions {
                    if let Some(expr) = self.condition_expr(condition) {
                        cond = cond.add(expr);
                        empty = false;
                    }
                }
                if empty {
                    Some(Expr::cust("FALSE"))
                } else {
                    Some(cond.into())
                }
            }
            Condition::All(conditions) => {
                let mut cond = Cond::all();
                let mut empty = true;
                for condition in conditions {
                    if let Some(expr) = self.condition_expr(condition) {
                        cond = cond.add(expr);
                        empty = false;
                    }
                }
                if empty { None } else { Some(cond.into()) }
            }
        }
    }

    /// Add ORDER BY clauses.
    fn add_sorts(&self, query: &mut SelectStatement) {
        for (column, direction) in &self.orders {
            let order = match direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            match self.column_ref(column) {
                Some(column) => {
                    query.order_by(column, order);
                }
                None => {
                    tracing::warn!(table = %self.table, column = %column, "invalid sort column, skipped");
                }
            }
        }
    }

    /// `(table, column)` for a bare or table-qualified column name.
    fn column_ref(&self, column: &str) -> Option<(Alias, Alias)> {
        if !is_valid_field_name(column) {
            return None;
        }
        match column.rsplit_once('.') {
            Some((table, name)) if !table.contains('.') => {
                Some((Alias::new(table), Alias::new(name)))
            }
            Some(_) => None,
            None => Some((Alias::new(&self.table), Alias::new(column))),
        }
    }

    fn require_column(&mut self, column: &str) {
        if !self.columns.is_empty() && !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(|| {
            Error::Configuration(format!("query on '{}' has no connection pool", self.table))
        })
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        // Use a transaction so SET LOCAL applies and resets on commit/rollback.
        let mut tx = self
            .pool()?
            .begin()
            .await
            .context("failed to begin transaction")?;

        sqlx::query("SET LOCAL statement_timeout = '10s'")
            .execute(&mut *tx)
            .await
            .context("failed to set statement timeout")?;

        Ok(tx)
    }

    /// Run rendered SQL and return each row as a JSON object.
    async fn fetch(&self, tx: &mut Transaction<'static, Postgres>, sql: String) -> Result<Vec<Value>> {
        tracing::debug!(table = %self.table, sql = %sql, "executing query");
        let rows: Vec<Value> = sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
            .fetch_all(&mut **tx)
            .await
            .with_context(|| format!("failed to query '{}'", self.table))?;
        Ok(rows)
    }

    /// Run batched child queries and embed their rows into `rows`.
    fn load_relations<'a>(
        &'a self,
        tx: &'a mut Transaction<'static, Postgres>,
        rows: &'a mut [Value],
        depth: u8,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.relations.is_empty() {
                return Ok(());
            }
            if depth >= MAX_RELATION_DEPTH {
                tracing::warn!(
                    depth,
                    "relation depth limit ({}) reached, skipping nested relations",
                    MAX_RELATION_DEPTH
                );
                return Ok(());
            }

            for (name, child) in &self.relations {
                let Some(relation) = self.schema.get(&self.table, name) else {
                    continue;
                };

                // Collect and deduplicate parent key values
                let mut seen = HashSet::new();
                let keys: Vec<FilterValue> = rows
                    .iter()
                    .filter_map(|row| row.get(&relation.local_field))
                    .filter(|key| key_string(key).is_some_and(|k| seen.insert(k)))
                    .filter_map(key_operand)
                    .collect();

                let children = if keys.is_empty() {
                    Vec::new()
                } else {
                    let mut child = child.clone();
                    child.require_column(&relation.foreign_field);
                    child.conditions.push(Condition::compare(
                        relation.foreign_field.clone(),
                        FilterOperator::In,
                        FilterValue::List(keys),
                    ));

                    let sql = child.statement().to_string(PostgresQueryBuilder);
                    let mut items = child.fetch(tx, sql).await?;
                    child.load_relations(tx, &mut items, depth + 1).await?;
                    items
                };

                distribute(rows, name, relation, &children);
            }

            Ok(())
        })
    }
}

#[async_trait]
impl Query for SqlQuery {
    fn select(&mut self, columns: &[String]) {
        for column in columns {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
    }

    fn with_relation(&mut self, relation: &str, build: &mut dyn FnMut(&mut dyn Query)) {
        let Some(definition) = self.schema.get(&self.table, relation) else {
            tracing::warn!(table = %self.table, relation, "unknown relation, not eager-loaded");
            return;
        };

        let mut child = SqlQuery::new(&definition.table, Arc::clone(&self.schema));
        build(&mut child);

        match self.relations.iter_mut().find(|(name, _)| name == relation) {
            Some((_, existing)) => *existing = child,
            None => self.relations.push((relation.to_string(), child)),
        }
    }

    fn with_count(&mut self, relations: &[String]) {
        for relation in relations {
            if self.schema.get(&self.table, relation).is_none() {
                tracing::warn!(table = %self.table, relation = %relation, "unknown relation, not counted");
                continue;
            }
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
        let mut tx = self.begin().await?;

        let count_sql = self.build_count();
        let total: i64 = sqlx::query_scalar(&count_sql)
            .fetch_one(&mut *tx)
            .await
            .context("failed to execute count query")?;

        let sql = self.build(page, per_page);
        let mut rows = self.fetch(&mut tx, sql).await?;
        self.load_relations(&mut tx, &mut rows, 0).await?;

        tx.commit()
            .await
            .context("failed to commit query transaction")?;

        Ok(Page::full(rows, u64::try_from(total).unwrap_or(0), page, per_page))
    }

    async fn simple_paginate(&mut self, page: u32, per_page: u32) -> Result<Page> {
        let mut tx = self.begin().await?;

        let sql = self.build_look_ahead(page, per_page);
        let mut rows = self.fetch(&mut tx, sql).await?;
        self.load_relations(&mut tx, &mut rows, 0).await?;

        tx.commit()
            .await
            .context("failed to commit query transaction")?;

        Ok(Page::simple(rows, page, per_page))
    }
}

fn compare_expr(field: SimpleExpr, operator: FilterOperator, value: &FilterValue) -> Option<SimpleExpr> {
    match operator {
        FilterOperator::Equals => Some(field.eq(sql_value(value)?)),
        FilterOperator::NotEquals => Some(field.ne(sql_value(value)?)),
        FilterOperator::Contains => {
            let value = value.as_string()?;
            Some(field.like(format!("%{}%", escape_like_wildcards(&value))))
        }
        FilterOperator::StartsWith => {
            let value = value.as_string()?;
            Some(field.like(format!("{}%", escape_like_wildcards(&value))))
        }
        FilterOperator::EndsWith => {
            let value = value.as_string()?;
            Some(field.like(format!("%{}", escape_like_wildcards(&value))))
        }
        FilterOperator::GreaterThan => Some(field.gt(sql_value(value)?)),
        FilterOperator::LessThan => Some(field.lt(sql_value(value)?)),
        FilterOperator::GreaterOrEqual => Some(field.gte(sql_value(value)?)),
        FilterOperator::LessOrEqual => Some(field.lte(sql_value(value)?)),
        FilterOperator::In => {
            let values: Vec<sea_query::Value> =
                value.items().into_iter().filter_map(sql_value).collect();
            if values.is_empty() {
                return Some(Expr::cust("FALSE"));
            }
            Some(field.is_in(values))
        }
        FilterOperator::NotIn => {
            let values: Vec<sea_query::Value> =
                value.items().into_iter().filter_map(sql_value).collect();
            if values.is_empty() {
                return None;
            }
            Some(field.is_not_in(values))
        }
        FilterOperator::IsNull => Some(field.is_null()),
        FilterOperator::IsNotNull => Some(field.is_not_null()),
    }
}

fn sql_value(value: &FilterValue) -> Option<sea_query::Value> {
    match value {
        FilterValue::String(s) => Some(s.clone().into()),
        FilterValue::Integer(i) => Some((*i).into()),
        FilterValue::Float(f) => Some((*f).into()),
        FilterValue::Boolean(b) => Some((*b).into()),
        FilterValue::Uuid(u) => Some((*u).into()),
        FilterValue::List(_) => None,
    }
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Validate a column name for use in queries.
///
/// Allows alphanumeric, underscores, and one dot for a table qualifier.
/// Must be non-empty and start with a letter or underscore.
fn is_valid_field_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// String form of a key value for matching. `None` for null values to
/// prevent false matches.
fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn key_operand(value: &Value) -> Option<FilterValue> {
    match value {
        Value::String(s) => Some(
            Uuid::parse_str(s)
                .map(FilterValue::Uuid)
                .unwrap_or_else(|_| FilterValue::String(s.clone())),
        ),
        other => FilterValue::from_json(other),
    }
}

/// Embed matching child rows into each parent row under `name`.
fn distribute(rows: &mut [Value], name: &str, relation: &Relation, children: &[Value]) {
    for row in rows.iter_mut() {
        let parent_key = row.get(&relation.local_field).and_then(key_string);

        let matching: Vec<&Value> = children
            .iter()
            .filter(|child| {
                let child_key = child.get(&relation.foreign_field).and_then(key_string);
                parent_key.is_some() && child_key == parent_key
            })
            .collect();

        if let Some(obj) = row.as_object_mut() {
            let embedded = if relation.singular {
                matching.first().map(|v| (*v).clone()).unwrap_or(Value::Null)
            } else {
                Value::Array(matching.into_iter().cloned().collect())
            };
            obj.insert(name.to_string(), embedded);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .relation("users", "posts", Relation::has_many("posts", "id", "user_id"))
                .relation("users", "profile", Relation::has_one("profiles", "id", "user_id"))
                .relation("posts", "comments", Relation::has_many("comments", "id", "post_id")),
        )
    }

    fn users() -> SqlQuery {
        SqlQuery::new("users", schema())
    }

    #[test]
    fn simple_query_build() {
        let mut query = users();
        query.filter(Condition::equals("status", 1_i64));
        query.order_by("created_at", SortDirection::Desc);
        let sql = query.build(1, 10);

        assert!(sql.contains("FROM \"users\""), "{sql}");
        assert!(sql.contains("\"users\".*"), "{sql}");
        assert!(sql.contains("\"users\".\"status\" = 1"), "{sql}");
        assert!(sql.contains("ORDER BY \"users\".\"created_at\" DESC"), "{sql}");
        assert!(sql.contains("LIMIT 10"), "{sql}");
    }

    #[test]
    fn count_query_build() {
        let mut query = users();
        query.filter(Condition::equals("status", 1_i64));
        query.order_by("name", SortDirection::Asc);
        let sql = query.build_count();

        assert!(sql.contains("COUNT(*)"), "{sql}");
        assert!(sql.contains("FROM \"users\""), "{sql}");
        assert!(sql.contains("\"status\""), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");
        assert!(!sql.contains("ORDER BY"), "{sql}");
    }

    #[test]
    fn look_ahead_fetches_one_extra_row() {
        let query = users();
        let sql = query.build_look_ahead(3, 10);
        assert!(sql.contains("LIMIT 11"), "{sql}");
        assert!(sql.contains("OFFSET 20"), "{sql}");
    }

    #[test]
    fn query_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}
        let mut query = users();
        assert_send(&query.paginate(1, 10));
        assert_send(&query.simple_paginate(1, 10));
    }

    #[test]
    fn pagination_offset() {
        let query = users();
        assert!(query.build(1, 10).contains("OFFSET 0"));
        assert!(query.build(2, 10).contains("OFFSET 10"));
        assert!(query.build(0, 10).contains("OFFSET 0"));
    }

    #[test]
    fn selected_columns_are_qualified() {
        let mut query = users();
        query.select(&["id".to_string(), "users.name".to_string()]);
        let sql = query.build(1, 10);

        assert!(sql.contains("\"users\".\"id\""), "{sql}");
        assert!(sql.contains("\"users\".\"name\""), "{sql}");
        assert!(!sql.contains("\"users\".*"), "{sql}");
    }

    #[test]
    fn star_selects_all_columns() {
        let mut query = users();
        query.select(&["*".to_string()]);
        query.select(&["name".to_string()]);
        let sql = query.build(1, 10);
        assert!(sql.contains("\"users\".*"), "{sql}");
        assert!(!sql.contains("\"users\".\"name\""), "{sql}");
    }

    #[test]
    fn invalid_columns_are_not_selected() {
        let mut query = users();
        query.select(&["id".to_string(), "id; DROP TABLE users".to_string()]);
        query.order_by("1=1", SortDirection::Asc);
        let sql = query.build(1, 10);

        assert!(!sql.contains("DROP"), "{sql}");
        assert!(!sql.contains("ORDER BY"), "{sql}");
    }

    #[test]
    fn invalid_condition_column_restricts() {
        let mut query = users();
        query.filter(Condition::equals("name' OR 1=1 --", "x"));
        let sql = query.build(1, 10);
        assert!(sql.contains("FALSE"), "{sql}");
    }

    #[test]
    fn search_condition_nests_or_inside_and() {
        let term = |t: &str| {
            Condition::Any(vec![Condition::contains("name", t), Condition::contains("email", t)])
        };
        let mut query = users();
        query.filter(Condition::All(vec![term("alice"), term("bob")]));
        let sql = query.build(1, 10);

        assert!(sql.contains("\"users\".\"name\" LIKE '%alice%'"), "{sql}");
        assert!(sql.contains("\"users\".\"email\" LIKE '%bob%'"), "{sql}");
        assert!(sql.contains(" OR "), "{sql}");
        assert!(sql.contains(" AND "), "{sql}");
    }

    #[test]
    fn like_wildcards_escaped() {
        let mut query = users();
        query.filter(Condition::contains("title", "100%_done"));
        let sql = query.build(1, 10);

        // SeaQuery renders with E prefix and double-backslash escaping
        assert!(
            sql.contains("100\\\\%\\\\_done") || sql.contains("100\\%\\_done"),
            "LIKE wildcards should be escaped: {sql}"
        );
        assert!(!sql.contains("%100%_done%"), "{sql}");
    }

    #[test]
    fn escape_like_wildcards_function() {
        assert_eq!(escape_like_wildcards("hello"), "hello");
        assert_eq!(escape_like_wildcards("100%"), "100\\%");
        assert_eq!(escape_like_wildcards("a_b"), "a\\_b");
        assert_eq!(escape_like_wildcards("a\\b"), "a\\\\b");
    }

    #[test]
    fn in_operator() {
        let mut query = users();
        query.filter(Condition::compare("id", FilterOperator::In, vec![1_i64, 2, 3]));
        let sql = query.build(1, 10);
        assert!(sql.contains("\"users\".\"id\" IN (1, 2, 3)"), "{sql}");

        let mut query = users();
        query.filter(Condition::compare("id", FilterOperator::In, FilterValue::List(Vec::new())));
        assert!(query.build(1, 10).contains("FALSE"));
    }

    #[test]
    fn empty_any_matches_nothing_and_empty_all_everything() {
        let mut query = users();
        query.filter(Condition::All(Vec::new()));
        assert!(!query.build(1, 10).contains("WHERE"));

        query.filter(Condition::Any(Vec::new()));
        assert!(query.build(1, 10).contains("FALSE"));
    }

    #[test]
    fn with_count_adds_correlated_subquery() {
        let mut query = users();
        query.select(&["id".to_string()]);
        query.with_count(&["posts".to_string(), "unknown".to_string()]);
        let sql = query.build(1, 10);

        assert!(sql.contains("AS \"posts_count\""), "{sql}");
        assert!(sql.contains("\"posts\".\"user_id\" = \"users\".\"id\""), "{sql}");
        assert!(!sql.contains("unknown"), "{sql}");
    }

    #[test]
    fn eager_load_selects_parent_key() {
        let mut query = users();
        query.select(&["name".to_string()]);
        query.with_relation("posts", &mut |posts| {
            posts.select(&["title".to_string()]);
        });
        let sql = query.build(1, 10);

        assert!(sql.contains("\"users\".\"name\""), "{sql}");
        assert!(sql.contains("\"users\".\"id\""), "{sql}");
        assert_eq!(query.relations.len(), 1);

        let (_, posts) = &query.relations[0];
        let mut child = posts.clone();
        child.require_column("user_id");
        let child_sql = child.build(1, 10);
        assert!(child_sql.contains("FROM \"posts\""), "{child_sql}");
        assert!(child_sql.contains("\"posts\".\"user_id\""), "{child_sql}");
    }

    #[test]
    fn unknown_relation_is_skipped() {
        let mut query = users();
        let mut called = false;
        query.with_relation("nope", &mut |_| called = true);
        assert!(!called);
        assert!(query.relations.is_empty());
    }

    #[test]
    fn nested_relations_use_child_table_schema() {
        let mut query = users();
        query.with_relation("posts", &mut |posts| {
            posts.with_relation("comments", &mut |comments| {
                comments.select(&["body".to_string()]);
            });
        });
        let (_, posts) = &query.relations[0];
        assert_eq!(posts.table, "posts");
        let (_, comments) = &posts.relations[0];
        assert_eq!(comments.table, "comments");
    }

    #[test]
    fn distribute_embeds_children() {
        let mut rows = vec![json!({"id": 1}), json!({"id": 2}), json!({"id": null})];
        let children = vec![
            json!({"user_id": 1, "title": "a"}),
            json!({"user_id": 1, "title": "b"}),
            json!({"user_id": 3, "title": "c"}),
        ];
        distribute(&mut rows, "posts", &Relation::has_many("posts", "id", "user_id"), &children);
        assert_eq!(rows[0]["posts"].as_array().unwrap().len(), 2);
        assert_eq!(rows[1]["posts"], json!([]));
        assert_eq!(rows[2]["posts"], json!([]));

        let mut rows = vec![json!({"id": 1}), json!({"id": 2})];
        distribute(&mut rows, "profile", &Relation::has_one("profiles", "id", "user_id"), &children);
        assert_eq!(rows[0]["profile"]["title"], "a");
        assert_eq!(rows[1]["profile"], Value::Null);
    }

    #[test]
    fn key_operands_keep_types() {
        assert_eq!(key_operand(&json!(5)), Some(FilterValue::Integer(5)));
        assert_eq!(key_operand(&json!("x")), Some(FilterValue::from("x")));
        assert_eq!(
            key_operand(&json!("00000000-0000-0000-0000-000000000000")),
            Some(FilterValue::Uuid(Uuid::nil()))
        );
    }

    #[test]
    fn is_valid_field_name_rules() {
        assert!(is_valid_field_name("name"));
        assert!(is_valid_field_name("users.name"));
        assert!(is_valid_field_name("_private"));
        assert!(!is_valid_field_name(""));
        assert!(!is_valid_field_name("1abc"));
        assert!(!is_valid_field_name("a-b"));
        assert!(!is_valid_field_name("a b"));
    }

    #[tokio::test]
    async fn running_without_pool_is_configuration_error() {
        let err = users().paginate(1, 10).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn schema_from_json() {
        let schema: Schema = serde_json::from_value(json!({
            "users": {"posts": {"table": "posts", "local_field": "id", "foreign_field": "user_id"}}
        }))
        .unwrap();
        assert_eq!(schema.get("users", "posts"), Some(&Relation::has_many("posts", "id", "user_id")));
        assert_eq!(schema.get("posts", "users"), None);
    }
}
