#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Identities, a query that records every call it receives, and the user
//! transformer and filter definitions most tests share.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use apix_kernel::filter::{FilterDefinition, FilterDefinitionBuilder, SortSpec};
use apix_kernel::projection::{
    FormatRegistry, FormatterChain, ProjectionSpec, Transformer, TransformerBuilder,
    TransformerDefinition,
};
use apix_kernel::query::{Condition, FilterOperator, Page, Query, SortDirection};
use apix_kernel::{Identity, Result};

/// Privileged caller.
pub struct Admin;

impl Identity for Admin {
    fn is_admin(&self) -> bool {
        true
    }

    fn id(&self) -> Option<Value> {
        Some(json!(1))
    }
}

/// Authenticated caller without admin rights.
pub struct Member;

impl Identity for Member {
    fn is_admin(&self) -> bool {
        false
    }
}

/// Query that records calls in a shared log, so the log can be inspected
/// after the engine has consumed the query.
#[derive(Clone, Default)]
pub struct RecordingQuery {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Query for RecordingQuery {
    fn select(&mut self, columns: &[String]) {
        self.push(format!("select {}", columns.join(",")));
    }

    fn with_relation(&mut self, relation: &str, build: &mut dyn FnMut(&mut dyn Query)) {
        let mut related = RecordingQuery::new();
        build(&mut related);
        self.push(format!("with {relation} [{}]", related.calls().join("; ")));
    }

    fn with_count(&mut self, relations: &[String]) {
        self.push(format!("count {}", relations.join(",")));
    }

    fn filter(&mut self, condition: Condition) {
        self.push(format!("where {}", describe(&condition)));
    }

    fn order_by(&mut self, column: &str, direction: SortDirection) {
        self.push(format!("order {column} {}", direction.as_str()));
    }

    async fn paginate(&mut self, page: u32, per_page: u32) -> Result<Page> {
        self.push(format!("paginate {page} {per_page}"));
        Ok(Page::full(Vec::new(), 0, page, per_page))
    }

    async fn simple_paginate(&mut self, page: u32, per_page: u32) -> Result<Page> {
        self.push(format!("simple_paginate {page} {per_page}"));
        Ok(Page::simple(Vec::new(), page, per_page))
    }
}

/// Compact condition text: `name ~ alice`, `(a | b)`, `(a & b)`.
pub fn describe(condition: &Condition) -> String {
    match condition {
        Condition::Compare {
            column,
            operator,
            value,
        } => {
            let op = match operator {
                FilterOperator::Equals => "=",
                FilterOperator::NotEquals => "!=",
                FilterOperator::Contains => "~",
                FilterOperator::IsNull => "is null",
                FilterOperator::IsNotNull => "is not null",
                _ => "?",
            };
            match operator {
                FilterOperator::IsNull | FilterOperator::IsNotNull => format!("{column} {op}"),
                _ => format!("{column} {op} {}", value.as_string().unwrap_or_default()),
            }
        }
        Condition::Any(parts) => format!(
            "({})",
            parts.iter().map(describe).collect::<Vec<_>>().join(" | ")
        ),
        Condition::All(parts) => format!(
            "({})",
            parts.iter().map(describe).collect::<Vec<_>>().join(" & ")
        ),
    }
}

/// Views for the sample users.
pub fn user_views() -> FormatRegistry {
    FormatRegistry::new()
        .view(
            "*",
            ProjectionSpec::new()
                .fields(["id", "name", "email", ":role"])
                .nested("address", ProjectionSpec::new().fields(["city", "zip"])),
        )
        .view(
            "show",
            ProjectionSpec::new()
                .field("@display_name")
                .nested("posts", ProjectionSpec::new().fields(["id", "title"])),
        )
        .view("_compact", ProjectionSpec::new().fields(["id", "name"]))
}

/// Transformer for the sample users.
pub fn user_transformer() -> Transformer<Value> {
    let definition = TransformerDefinition {
        wrapper: "users".to_string(),
        formats: user_views(),
        ..TransformerDefinition::default()
    };
    TransformerBuilder::<Value>::from_definition(definition)
        .rename("email", "email_address")
        .rename_path("address.zip", "postcode")
        .format_path("address.city", FormatterChain::from("uppercase"))
        .custom_attribute("display_name", "displayName")
        .operations(|ops| {
            ops.provider("displayName", |user: &Value| {
                let name = user["name"].as_str().unwrap_or_default();
                let role = user["role"].as_str().unwrap_or_default();
                Ok(json!(format!("{name} ({role})")))
            });
        })
        .build()
        .unwrap()
}

/// Counts how often an operation ran.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Filter definition for the sample users, left open for extra settings.
///
/// - `role`: equality filter
/// - `purge_flag`: admin only, counted
/// - `set_query`: registered but never reachable, counted
/// - `without_admins`: excludes admins, for auto-apply tests
pub fn user_filter(purges: &Counter, hijacks: &Counter) -> FilterDefinitionBuilder {
    let purges = purges.clone();
    let hijacks = hijacks.clone();
    FilterDefinition::builder()
        .searchable(["name", "email"])
        .sort(
            SortSpec::new()
                .column("name")
                .column("role")
                .alias("newest", "created_at,desc")
                .alias("oldest", "created_at,asc")
                .alias("alphabetical", "name,asc"),
        )
        .operation("role", |query, value, _| {
            let role = value
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("role must be a string"))?;
            query.filter(Condition::equals("role", role));
            Ok(())
        })
        .operation("purge_flag", move |query, _, _| {
            purges.hit();
            query.filter(Condition::is_null("purged_at"));
            Ok(())
        })
        .admin_only("purge_flag")
        .operation("set_query", move |_, _, _| {
            hijacks.hit();
            Ok(())
        })
        .operation("without_admins", |query, _, _| {
            query.filter(Condition::compare("role", FilterOperator::NotEquals, "admin"));
            Ok(())
        })
}
