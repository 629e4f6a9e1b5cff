//! Sort resolution.
//!
//! A sort token is `"<column>[,<direction>]"`. Only exactly `asc` sorts
//! ascending; a missing or any other direction sorts descending. Columns
//! outside the allow-list are replaced by the default sort; alias columns
//! rewrite to a target token, at most [`MAX_ALIAS_HOPS`] times.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::{Query, SortDirection};

/// Alias expansions allowed per token. An alias whose target is another
/// alias beyond this cap falls back to the default sort.
pub const MAX_ALIAS_HOPS: usize = 1;

/// One resolved ORDER BY clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub column: String,
    pub direction: SortDirection,
}

impl SortClause {
    fn new(column: &str, direction: Option<&str>) -> Self {
        Self {
            column: column.to_string(),
            direction: SortDirection::parse(direction.unwrap_or("desc")),
        }
    }
}

/// Sortable columns, aliases and the default sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Allowed columns.
    #[serde(default = "default_columns")]
    pub columns: Vec<String>,

    /// Public column name → target token (`"real_column[,direction]"`).
    #[serde(default)]
    pub aliases: HashMap<String, String>,

    /// Tokens applied when no sort is requested or a requested column is
    /// not allowed.
    #[serde(default = "default_sort")]
    pub default: Vec<String>,
}

fn default_columns() -> Vec<String> {
    vec!["created_at".to_string(), "updated_at".to_string(), "id".to_string()]
}

fn default_sort() -> Vec<String> {
    vec!["id,desc".to_string(), "created_at".to_string()]
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            columns: default_columns(),
            aliases: HashMap::new(),
            default: default_sort(),
        }
    }
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow an extra column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
        self
    }

    /// Expose `public` as a sort key rewriting to `target`.
    pub fn alias(mut self, public: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(public.into(), target.into());
        self
    }

    /// Replace the default sort.
    pub fn default_sort<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve tokens into ORDER BY clauses, in token order. The default
    /// sort is inserted at most once per call.
    pub fn resolve<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<SortClause> {
        let mut clauses = Vec::new();
        let mut defaulted = false;
        for token in tokens {
            let (column, direction) = split_token(token.as_ref());
            self.resolve_parts(column, direction, 0, &mut clauses, &mut defaulted);
        }
        clauses
    }

    /// The default sort, as clauses.
    pub fn default_clauses(&self) -> Vec<SortClause> {
        self.default
            .iter()
            .map(|token| {
                let (column, direction) = split_token(token);
                SortClause::new(column, direction)
            })
            .collect()
    }

    /// The `sort` operation: a token or a list of tokens.
    pub fn apply(&self, query: &mut dyn Query, value: &Value) {
        let tokens = sort_tokens(value);
        apply_clauses(query, &self.resolve(&tokens));
    }

    /// Order by the default sort.
    pub fn apply_default(&self, query: &mut dyn Query) {
        apply_clauses(query, &self.default_clauses());
    }

    fn resolve_parts(
        &self,
        column: &str,
        direction: Option<&str>,
        hops: usize,
        clauses: &mut Vec<SortClause>,
        defaulted: &mut bool,
    ) {
        if let Some(target) = self.aliases.get(column) {
            if hops >= MAX_ALIAS_HOPS {
                tracing::warn!(column, hops, "sort alias chain exceeds hop limit, using default sort");
                self.fall_back(clauses, defaulted);
                return;
            }
            let (target_column, target_direction) = split_token(target);
            // An explicit direction on the alias key wins over the target's
            let direction = direction.or(target_direction);
            self.resolve_parts(target_column, direction, hops + 1, clauses, defaulted);
            return;
        }

        // Targets reached through an alias are trusted
        if hops == 0 && !self.columns.iter().any(|c| c == column) {
            tracing::debug!(column, "sort column not allowed, using default sort");
            self.fall_back(clauses, defaulted);
            return;
        }

        clauses.push(SortClause::new(column, direction));
    }

    fn fall_back(&self, clauses: &mut Vec<SortClause>, defaulted: &mut bool) {
        if *defaulted {
            return;
        }
        *defaulted = true;
        clauses.extend(self.default_clauses());
    }
}

fn apply_clauses(query: &mut dyn Query, clauses: &[SortClause]) {
    for clause in clauses {
        query.order_by(&clause.column, clause.direction);
    }
}

/// `"name,asc"` → `("name", Some("asc"))`; an empty direction is missing.
fn split_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once(',') {
        Some((column, direction)) => {
            let direction = direction.trim();
            (
                column.trim(),
                (!direction.is_empty()).then_some(direction),
            )
        }
        None => (token.trim(), None),
    }
}

fn sort_tokens(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_token).collect(),
        other => scalar_token(other).into_iter().collect(),
    }
}

fn scalar_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
