#![allow(clippy::unwrap_used, clippy::expect_used)]
//! SQL collaborator integration tests.
//!
//! Requests go through the filter engine into a [`SqlQuery`] and the
//! rendered PostgreSQL is checked. Nothing here needs a database.

mod common;

use std::sync::Arc;

use serde_json::json;

use apix_kernel::filter::{FilterDefinition, FilterDefinitionBuilder, FilterEngine, FilterRequest};
use apix_kernel::projection::{FormatRegistry, ProjectionSpec};
use apix_kernel::query::sql::{Relation, Schema, SqlQuery};
use apix_kernel::query::{Condition, PaginationMode};
use apix_kernel::Config;

use common::{Counter, user_filter};

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new()
            .relation("users", "posts", Relation::has_many("posts", "id", "user_id"))
            .relation("users", "profile", Relation::has_one("profiles", "id", "user_id")),
    )
}

fn users() -> SqlQuery {
    SqlQuery::new("users", schema())
}

fn engine(builder: FilterDefinitionBuilder) -> FilterEngine {
    FilterEngine::new(Arc::new(builder.build().unwrap()), Config::default())
}

fn user_engine() -> FilterEngine {
    engine(user_filter(&Counter::default(), &Counter::default()))
}

/// Render the page query and the count query for a request.
fn render(engine: &FilterEngine, request: FilterRequest) -> (String, String) {
    let mut query = users();
    let plan = engine.apply(&mut query, &request, 15).unwrap();
    (query.build(plan.page, plan.per_page), query.build_count())
}

#[test]
fn search_sort_and_page_render_together() {
    let request = FilterRequest::new(json!({
        "search": "alice bob",
        "sort": "name,asc",
        "page": 3,
        "per_page": 20,
    }));
    let (sql, count) = render(&user_engine(), request);

    assert!(sql.contains("\"users\".\"name\" LIKE '%alice%'"), "{sql}");
    assert!(sql.contains("\"users\".\"email\" LIKE '%bob%'"), "{sql}");
    assert!(sql.contains(" OR "), "{sql}");
    assert!(sql.contains(" AND "), "{sql}");
    assert!(sql.contains("ORDER BY \"users\".\"name\" ASC"), "{sql}");
    assert!(sql.contains("LIMIT 20 OFFSET 40"), "{sql}");

    assert!(count.contains("COUNT(*)"), "{count}");
    assert!(count.contains("LIKE '%alice%'"), "{count}");
    assert!(!count.contains("ORDER BY"), "{count}");
    assert!(!count.contains("LIMIT"), "{count}");
}

#[test]
fn search_terms_escape_like_wildcards() {
    let (sql, _) = render(&user_engine(), FilterRequest::new(json!({"search": "100%_done"})));
    assert!(
        sql.contains("100\\\\%\\\\_done") || sql.contains("100\\%\\_done"),
        "LIKE wildcards should be escaped: {sql}"
    );
    assert!(!sql.contains("%100%_done%"), "{sql}");
}

#[test]
fn default_sort_orders_by_id_then_created_at() {
    let (sql, _) = render(&user_engine(), FilterRequest::new(json!({})));
    assert!(
        sql.contains("ORDER BY \"users\".\"id\" DESC, \"users\".\"created_at\" DESC"),
        "{sql}"
    );
    assert!(sql.contains("\"users\".*"), "{sql}");
    assert!(sql.contains("LIMIT 15 OFFSET 0"), "{sql}");
}

#[test]
fn disallowed_sort_columns_fall_back_to_default() {
    for sort in ["password", "name;DROP TABLE users", "email,asc"] {
        let (sql, _) = render(&user_engine(), FilterRequest::new(json!({"sort": sort})));
        assert!(!sql.contains("DROP"), "{sql}");
        assert!(
            sql.contains("ORDER BY \"users\".\"id\" DESC, \"users\".\"created_at\" DESC"),
            "sort {sort}: {sql}"
        );
    }
}

#[test]
fn sort_aliases_render_target_columns() {
    let (sql, _) = render(&user_engine(), FilterRequest::new(json!({"sort": ["oldest", "role"]})));
    assert!(
        sql.contains("ORDER BY \"users\".\"created_at\" ASC, \"users\".\"role\" DESC"),
        "{sql}"
    );
}

#[test]
fn business_filters_and_conditions_hook_render_where_clauses() {
    let definition = user_filter(&Counter::default(), &Counter::default()).conditions(|query, _| {
        query.filter(Condition::is_null("deleted_at"));
        Ok(())
    });
    let (sql, count) = render(&engine(definition), FilterRequest::new(json!({"role": "editor"})));

    for statement in [&sql, &count] {
        assert!(statement.contains("\"users\".\"deleted_at\" IS NULL"), "{statement}");
        assert!(statement.contains("\"users\".\"role\" = 'editor'"), "{statement}");
    }
}

#[test]
fn per_page_is_clamped() {
    let engine = user_engine();

    let mut query = users();
    let plan = engine
        .apply(&mut query, &FilterRequest::new(json!({"per_page": 1000})), 15)
        .unwrap();
    assert_eq!(plan.per_page, 100);
    assert_eq!(plan.mode, PaginationMode::Simple);
    assert!(query.build(plan.page, plan.per_page).contains("LIMIT 100"));

    let plan = engine
        .apply(&mut users(), &FilterRequest::new(json!({"per_page": 0, "with_pages": true})), 15)
        .unwrap();
    assert_eq!(plan.per_page, 1);
    assert_eq!(plan.mode, PaginationMode::Full);
}

// -------------------------------------------------------------------------
// Relations
// -------------------------------------------------------------------------

fn formats() -> Arc<FormatRegistry> {
    Arc::new(
        FormatRegistry::new()
            .view(
                "*",
                ProjectionSpec::new()
                    .fields(["name", ":role", "@display_name"])
                    .nested("posts", ProjectionSpec::new().fields(["id", "title"])),
            )
            .view("_ids", ProjectionSpec::new().field("id")),
    )
}

#[test]
fn view_drives_selected_columns() {
    let definition = FilterDefinition::builder().formats(formats());
    let (sql, _) = render(&engine(definition), FilterRequest::new(json!({})));

    assert!(sql.contains("\"users\".\"name\""), "{sql}");
    assert!(sql.contains("\"users\".\"role\""), "{sql}");
    assert!(sql.contains("\"users\".\"display_name\""), "{sql}");
    // Parent key of the eager-loaded posts
    assert!(sql.contains("\"users\".\"id\""), "{sql}");
    assert!(!sql.contains("\"users\".*"), "{sql}");
    assert!(!sql.contains("\"users\".\"posts\""), "{sql}");
}

#[test]
fn requested_view_and_explicit_select_combine() {
    let definition = FilterDefinition::builder().formats(formats());
    let request = FilterRequest::new(json!({})).view("ids").select(["email"]);
    let (sql, _) = render(&engine(definition), request);

    assert!(sql.contains("\"users\".\"id\""), "{sql}");
    assert!(sql.contains("\"users\".\"email\""), "{sql}");
    assert!(!sql.contains("\"users\".\"name\""), "{sql}");
}

#[test]
fn auto_applied_with_count_adds_subquery() {
    let definition = FilterDefinition::builder().auto_apply("withCount", json!(["posts", "tags"]));
    let (sql, _) = render(&engine(definition), FilterRequest::new(json!({})));

    assert!(sql.contains("AS \"posts_count\""), "{sql}");
    assert!(sql.contains("\"posts\".\"user_id\" = \"users\".\"id\""), "{sql}");
    assert!(!sql.contains("tags"), "{sql}");
}

#[test]
fn caller_cannot_request_relations() {
    let request = FilterRequest::new(json!({"with_count": "posts", "with": ["posts"]}));
    let (sql, _) = render(&user_engine(), request);
    assert!(!sql.contains("posts"), "{sql}");
}

#[test]
fn schema_loads_from_yaml() {
    let yaml = r#"
users:
  posts:
    table: posts
    local_field: id
    foreign_field: user_id
  profile:
    table: profiles
    local_field: id
    foreign_field: user_id
    singular: true
"#;
    let schema: Schema = serde_yml::from_str(yaml).unwrap();
    assert_eq!(schema, *self::schema());
}
