//! Apix test utilities.
//!
//! JSON record fixtures and assertion helpers shared by the kernel's
//! integration tests.

use serde_json::{Value, json};

/// Five users with addresses, posts and a mix of null fields.
///
/// Ids are 1..=5 and `created_at` increases with the id.
pub fn sample_users() -> Vec<Value> {
    vec![
        json!({
            "id": 1,
            "name": "Alice Anders",
            "email": "alice@example.com",
            "role": "admin",
            "nickname": null,
            "password": "hash-1",
            "created_at": "2024-01-01T10:00:00Z",
            "address": {"city": "Oslo", "zip": "0150"},
            "posts": [
                {"id": 11, "user_id": 1, "title": "Hello", "published": true, "created_at": "2024-02-01T09:00:00Z"},
                {"id": 12, "user_id": 1, "title": "Draft", "published": false, "created_at": "2024-02-03T09:00:00Z"},
            ],
        }),
        json!({
            "id": 2,
            "name": "Bob Brown",
            "email": "bob@example.com",
            "role": "editor",
            "nickname": "bobby",
            "password": "hash-2",
            "created_at": "2024-01-02T10:00:00Z",
            "address": {"city": "Bergen", "zip": "5003"},
            "posts": [
                {"id": 21, "user_id": 2, "title": "Alice in Bergen", "published": true, "created_at": "2024-02-02T09:00:00Z"},
            ],
        }),
        json!({
            "id": 3,
            "name": "Carol Alice Chen",
            "email": "carol@example.org",
            "role": "viewer",
            "nickname": null,
            "password": "hash-3",
            "created_at": "2024-01-03T10:00:00Z",
            "address": null,
            "posts": [],
        }),
        json!({
            "id": 4,
            "name": "Dan Bobson",
            "email": "dan@example.org",
            "role": "viewer",
            "nickname": "dino",
            "password": "hash-4",
            "created_at": "2024-01-04T10:00:00Z",
            "address": {"city": "Oslo", "zip": "0151"},
            "posts": [],
        }),
        json!({
            "id": 5,
            "name": "Eve Evans",
            "email": "eve@example.com",
            "role": "editor",
            "nickname": null,
            "password": "hash-5",
            "created_at": "2024-01-05T10:00:00Z",
            "address": {"city": "Trondheim", "zip": "7010"},
            "posts": [
                {"id": 51, "user_id": 5, "title": "Bob and Alice", "published": true, "created_at": "2024-02-05T09:00:00Z"},
            ],
        }),
    ]
}

/// The posts of [`sample_users`] as flat rows.
pub fn sample_posts() -> Vec<Value> {
    sample_users()
        .into_iter()
        .flat_map(|user| match user.get("posts") {
            Some(Value::Array(posts)) => posts.clone(),
            _ => Vec::new(),
        })
        .collect()
}

/// Ids of a list of records, in order. Records without a numeric id are
/// skipped.
pub fn ids(records: &[Value]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|record| record.get("id").and_then(Value::as_i64))
        .collect()
}

/// Assertion helpers for JSON output.
pub mod assert {
    use serde_json::Value;

    /// Assert that an object's keys are exactly `expected`, in order.
    pub fn keys_in_order(value: &Value, expected: &[&str]) {
        let actual: Vec<&str> = value
            .as_object()
            .map(|object| object.keys().map(String::as_str).collect())
            .unwrap_or_default();
        assert_eq!(actual, expected, "unexpected keys in {value}");
    }

    /// Assert that an object has no `key`.
    pub fn missing_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_none(),
            "expected no '{key}' in {value}"
        );
    }
}
