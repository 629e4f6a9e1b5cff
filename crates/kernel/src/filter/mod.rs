//! Filter engine: turns caller input into query mutations.
//!
//! A [`FilterDefinition`] names the operations a filter exposes; a
//! [`FilterEngine`] dispatches one [`FilterRequest`] against it, applying
//! guards, default sorting, auto-applied operations and pagination.

pub mod definition;
pub mod engine;
pub mod search;
pub mod sort;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::identity::Identity;
use crate::query::Query;

pub use definition::{ConditionsHook, FilterContext, FilterDefinition, FilterDefinitionBuilder, FilterOperation};
pub use engine::{FilterEngine, PagePlan};
pub use search::search_condition;
pub use sort::{SortClause, SortSpec};

/// Names of the engine's own plumbing. Request keys resolving to one of
/// these are never dispatched, whatever the definition registers.
pub const BASE_GUARDED: &[&str] = &[
    "filter",
    "setQuery",
    "setModel",
    "setUser",
    "setData",
    "setExtras",
    "setSelect",
    "setConditions",
    "disableConditions",
    "applySort",
    "with",
    "withCount",
    "addSelectAndEagerLoad",
    "addSelectBasedOnTransformer",
    "dataHasValue",
    "getDataValue",
    "dataHasKeys",
    "getExtraProperty",
    "getPaginationMethod",
    "getPage",
    "getPerPage",
];

pub fn is_base_guarded(name: &str) -> bool {
    BASE_GUARDED.contains(&name)
}

/// `per_page`, `per-page` and `per page` all become `perPage`.
pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for word in key
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|word| !word.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if out.is_empty() {
                out.extend(first.to_lowercase());
            } else {
                out.extend(first.to_uppercase());
            }
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Per-call switches that do not come from request data.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// View used for auto select; falls back to `action`.
    pub view: Option<String>,
    /// Current action name, the implicit view.
    pub action: Option<String>,
    /// Columns added to the selection after everything else.
    pub select: Vec<String>,
    /// Forces full (`true`) or simple (`false`) pagination.
    pub with_pages: Option<bool>,
    /// Skip the definition's conditions hook.
    pub skip_conditions: bool,
}

/// One filter call.
#[derive(Default)]
pub struct FilterRequest {
    pub data: Map<String, Value>,
    pub user: Option<Arc<dyn Identity>>,
    /// Query to start from instead of a fresh one from the source.
    pub query: Option<Box<dyn Query>>,
    pub extras: Map<String, Value>,
    pub options: FilterOptions,
}

impl fmt::Debug for FilterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRequest")
            .field("data", &self.data)
            .field("user", &self.user.as_ref().map(|user| user.is_admin()))
            .field("query", &self.query.is_some())
            .field("extras", &self.extras)
            .field("options", &self.options)
            .finish()
    }
}

impl FilterRequest {
    /// Request data from a JSON object; other values give empty data.
    pub fn new(data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn user(mut self, user: Arc<dyn Identity>) -> Self {
        self.user = Some(user);
        self
    }

    pub fn query(mut self, query: Box<dyn Query>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.options.view = Some(view.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.options.action = Some(action.into());
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.select.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_pages(mut self, with_pages: bool) -> Self {
        self.options.with_pages = Some(with_pages);
        self
    }

    pub fn skip_conditions(mut self) -> Self {
        self.options.skip_conditions = true;
        self
    }
}

/// Loose boolean: JSON booleans, `1`/`0` and the usual strings.
pub(crate) fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Loose positive integer from a number or numeric string.
pub(crate) fn value_as_u32(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    u32::try_from(n.max(0)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_case_conversion() {
        assert_eq!(to_camel_case("per_page"), "perPage");
        assert_eq!(to_camel_case("per-page"), "perPage");
        assert_eq!(to_camel_case("per page"), "perPage");
        assert_eq!(to_camel_case("set_query"), "setQuery");
        assert_eq!(to_camel_case("setQuery"), "setQuery");
        assert_eq!(to_camel_case("SetQuery"), "setQuery");
        assert_eq!(to_camel_case("_leading__double_"), "leadingDouble");
        assert_eq!(to_camel_case("sort"), "sort");
        assert_eq!(to_camel_case(""), "");
    }

    #[test]
    fn guarded_names_survive_conversion() {
        assert!(is_base_guarded(&to_camel_case("set_query")));
        assert!(is_base_guarded(&to_camel_case("with_count")));
        assert!(!is_base_guarded(&to_camel_case("sort")));
        assert!(!is_base_guarded(&to_camel_case("search")));
    }

    #[test]
    fn loose_scalars() {
        assert_eq!(value_as_bool(&json!(true)), Some(true));
        assert_eq!(value_as_bool(&json!("1")), Some(true));
        assert_eq!(value_as_bool(&json!("false")), Some(false));
        assert_eq!(value_as_bool(&json!(0)), Some(false));
        assert_eq!(value_as_bool(&json!("maybe")), None);

        assert_eq!(value_as_u32(&json!(5)), Some(5));
        assert_eq!(value_as_u32(&json!("12")), Some(12));
        assert_eq!(value_as_u32(&json!(-3)), Some(0));
        assert_eq!(value_as_u32(&json!(2.9)), Some(2));
        assert_eq!(value_as_u32(&json!("abc")), None);
        assert_eq!(value_as_u32(&json!(null)), None);
    }

    #[test]
    fn request_from_non_object_is_empty() {
        assert!(FilterRequest::new(json!([1, 2])).data.is_empty());
        let request = FilterRequest::new(json!({"sort": "id"})).with_pages(true).select(["id"]);
        assert_eq!(request.data.get("sort"), Some(&json!("id")));
        assert_eq!(request.options.with_pages, Some(true));
        assert_eq!(request.options.select, vec!["id"]);
    }
}
