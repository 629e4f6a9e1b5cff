//! Filter definitions: the operations a filter exposes and the policy
//! deciding which of them a caller may trigger.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::search::apply_search;
use super::sort::SortSpec;
use super::to_camel_case;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::projection::FormatRegistry;
use crate::query::Query;

/// A named filter operation: mutates the query for one request value.
pub type FilterOperation =
    Arc<dyn Fn(&mut dyn Query, &Value, &FilterContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Business-rule conditions applied on every call unless skipped.
pub type ConditionsHook =
    Arc<dyn Fn(&mut dyn Query, &FilterContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Read-only view of the current call, handed to operations.
#[derive(Clone, Copy)]
pub struct FilterContext<'a> {
    data: &'a Map<String, Value>,
    user: Option<&'a dyn Identity>,
    extras: &'a Map<String, Value>,
}

impl<'a> FilterContext<'a> {
    pub fn new(
        data: &'a Map<String, Value>,
        user: Option<&'a dyn Identity>,
        extras: &'a Map<String, Value>,
    ) -> Self {
        Self { data, user, extras }
    }

    pub fn user(&self) -> Option<&'a dyn Identity> {
        self.user
    }

    /// False for anonymous callers.
    pub fn is_admin(&self) -> bool {
        self.user.is_some_and(|user| user.is_admin())
    }

    pub fn data(&self) -> &'a Map<String, Value> {
        self.data
    }

    pub fn data_value(&self, key: &str) -> Option<&'a Value> {
        self.data.get(key)
    }

    /// Whether the request carries `key` with exactly `value`.
    pub fn data_has_value(&self, key: &str, value: &Value) -> bool {
        self.data.get(key) == Some(value)
    }

    /// Whether the request carries every one of `keys`.
    pub fn data_has_keys(&self, keys: &[&str]) -> bool {
        keys.iter().all(|key| self.data.contains_key(*key))
    }

    pub fn extra(&self, key: &str) -> Option<&'a Value> {
        self.extras.get(key)
    }
}

impl fmt::Debug for FilterContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterContext")
            .field("data", &self.data)
            .field("is_admin", &self.is_admin())
            .field("extras", &self.extras)
            .finish()
    }
}

/// Everything a filter knows before any request arrives. Built once and
/// shared; calls never mutate it.
pub struct FilterDefinition {
    operations: HashMap<String, FilterOperation>,
    guarded: HashSet<String>,
    admin_only: HashSet<String>,
    auto_apply: Vec<(String, Value)>,
    conditions: Option<ConditionsHook>,
    sort: SortSpec,
    searchable: Vec<String>,
    formats: Option<Arc<FormatRegistry>>,
}

impl fmt::Debug for FilterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations: Vec<&String> = self.operations.keys().collect();
        operations.sort();
        f.debug_struct("FilterDefinition")
            .field("operations", &operations)
            .field("guarded", &self.guarded)
            .field("admin_only", &self.admin_only)
            .field("auto_apply", &self.auto_apply)
            .field("conditions", &self.conditions.is_some())
            .field("sort", &self.sort)
            .field("searchable", &self.searchable)
            .finish()
    }
}

impl FilterDefinition {
    pub fn builder() -> FilterDefinitionBuilder {
        FilterDefinitionBuilder::default()
    }

    pub fn operation(&self, name: &str) -> Option<&FilterOperation> {
        self.operations.get(name)
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn is_guarded(&self, name: &str) -> bool {
        self.guarded.contains(name)
    }

    pub fn is_admin_only(&self, name: &str) -> bool {
        self.admin_only.contains(name)
    }

    pub fn auto_apply(&self) -> &[(String, Value)] {
        &self.auto_apply
    }

    pub fn conditions(&self) -> Option<&ConditionsHook> {
        self.conditions.as_ref()
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn searchable(&self) -> &[String] {
        &self.searchable
    }

    /// Views used to derive selections and eager loads.
    pub fn formats(&self) -> Option<&FormatRegistry> {
        self.formats.as_deref()
    }
}

/// Builder for [`FilterDefinition`]. Operation names are normalised to
/// lower camel case, the form request keys are matched in.
#[derive(Default)]
pub struct FilterDefinitionBuilder {
    operations: HashMap<String, FilterOperation>,
    guarded: HashSet<String>,
    admin_only: HashSet<String>,
    auto_apply: Vec<(String, Value)>,
    conditions: Option<ConditionsHook>,
    sort: SortSpec,
    searchable: Vec<String>,
    formats: Option<Arc<FormatRegistry>>,
}

impl FilterDefinitionBuilder {
    /// Register an operation, replacing a built-in of the same name.
    pub fn operation<F>(mut self, name: &str, operation: F) -> Self
    where
        F: Fn(&mut dyn Query, &Value, &FilterContext<'_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.operations.insert(to_camel_case(name), boxed(operation));
        self
    }

    /// Never dispatch `name` from request data.
    pub fn guard(mut self, name: &str) -> Self {
        self.guarded.insert(to_camel_case(name));
        self
    }

    /// Dispatch `name` from request data only for admins.
    pub fn admin_only(mut self, name: &str) -> Self {
        self.admin_only.insert(to_camel_case(name));
        self
    }

    /// Run `name` with `value` on every call, after caller filters.
    pub fn auto_apply(mut self, name: &str, value: Value) -> Self {
        self.auto_apply.push((to_camel_case(name), value));
        self
    }

    /// Conditions applied on every call before caller filters.
    pub fn conditions<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut dyn Query, &FilterContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.conditions = Some(Arc::new(hook));
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    /// Columns the `search` operation looks in.
    pub fn searchable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn formats(mut self, formats: Arc<FormatRegistry>) -> Self {
        self.formats = Some(formats);
        self
    }

    /// Add the built-in operations and check auto-applied names exist.
    pub fn build(self) -> Result<FilterDefinition> {
        let mut operations = builtin_operations(&self.sort, &self.searchable);
        operations.extend(self.operations);

        let missing: Vec<&str> = self
            .auto_apply
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| !operations.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "auto-applied operations are not registered: {}",
                missing.join(", ")
            )));
        }

        Ok(FilterDefinition {
            operations,
            guarded: self.guarded,
            admin_only: self.admin_only,
            auto_apply: self.auto_apply,
            conditions: self.conditions,
            sort: self.sort,
            searchable: self.searchable,
            formats: self.formats,
        })
    }
}

fn boxed<F>(operation: F) -> FilterOperation
where
    F: Fn(&mut dyn Query, &Value, &FilterContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(operation)
}

/// `search`, `sort`, `with` and `withCount`.
fn builtin_operations(sort: &SortSpec, searchable: &[String]) -> HashMap<String, FilterOperation> {
    let mut operations = HashMap::new();

    let columns = searchable.to_vec();
    operations.insert(
        "search".to_string(),
        boxed(move |query, value, _| {
            apply_search(query, value, &columns);
            Ok(())
        }),
    );

    let sort = sort.clone();
    operations.insert(
        "sort".to_string(),
        boxed(move |query, value, _| {
            sort.apply(query, value);
            Ok(())
        }),
    );

    operations.insert(
        "with".to_string(),
        boxed(|query, value, _| {
            for relation in relation_names(value) {
                query.with_relation(&relation, &mut |_| {});
            }
            Ok(())
        }),
    );

    operations.insert(
        "withCount".to_string(),
        boxed(|query, value, _| {
            query.with_count(&relation_names(value));
            Ok(())
        }),
    );

    operations
}

/// A relation name or a list of them.
fn relation_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(name) => vec![name.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::Principal;
    use serde_json::json;

    #[test]
    fn builtins_are_registered() {
        let definition = FilterDefinition::builder().build().unwrap();
        for name in ["search", "sort", "with", "withCount"] {
            assert!(definition.has_operation(name), "{name}");
        }
    }

    #[test]
    fn names_are_normalised() {
        let definition = FilterDefinition::builder()
            .operation("purge_flag", |_, _, _| Ok(()))
            .admin_only("purge-flag")
            .guard("internal_only")
            .build()
            .unwrap();
        assert!(definition.has_operation("purgeFlag"));
        assert!(definition.is_admin_only("purgeFlag"));
        assert!(definition.is_guarded("internalOnly"));
    }

    #[test]
    fn auto_apply_must_name_an_operation() {
        let err = FilterDefinition::builder()
            .auto_apply("only_published", json!(true))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("onlyPublished")));

        let ok = FilterDefinition::builder()
            .operation("only_published", |_, _, _| Ok(()))
            .auto_apply("only_published", json!(true))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn context_helpers() {
        let data = json!({"status": "open", "page": 2});
        let extras = json!({"tenant": "acme"});
        let admin = Principal::admin(1);
        let ctx = FilterContext::new(
            data.as_object().unwrap(),
            Some(&admin as &dyn Identity),
            extras.as_object().unwrap(),
        );

        assert!(ctx.is_admin());
        assert_eq!(ctx.data_value("status"), Some(&json!("open")));
        assert!(ctx.data_has_value("page", &json!(2)));
        assert!(!ctx.data_has_value("page", &json!(3)));
        assert!(!ctx.data_has_value("missing", &Value::Null));
        assert!(ctx.data_has_keys(&["status", "page"]));
        assert!(!ctx.data_has_keys(&["status", "sort"]));
        assert_eq!(ctx.extra("tenant"), Some(&json!("acme")));

        let anonymous = FilterContext::new(data.as_object().unwrap(), None, extras.as_object().unwrap());
        assert!(!anonymous.is_admin());
        assert!(anonymous.user().is_none());
    }

    #[test]
    fn relation_name_shapes() {
        assert_eq!(relation_names(&json!("posts")), vec!["posts"]);
        assert_eq!(relation_names(&json!(["posts", 1, "tags"])), vec!["posts", "tags"]);
        assert!(relation_names(&json!(null)).is_empty());
    }
}
