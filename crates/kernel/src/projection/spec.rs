//! Projection specifications: ordered trees of leaf attributes and nested
//! relations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Sigils;
use crate::error::{Error, Result};

/// One entry of a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecNode {
    /// A source field token, possibly sigil-marked or table-qualified.
    Leaf(String),
    /// A relation to recurse into with its own projection.
    Nested { name: String, spec: ProjectionSpec },
}

impl SpecNode {
    /// Key used when merging views: the raw token for leaves, the relation
    /// name for nested entries.
    pub fn key(&self) -> &str {
        match self {
            SpecNode::Leaf(token) => token,
            SpecNode::Nested { name, .. } => name,
        }
    }
}

/// Ordered field selection tree. Output keys follow entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ProjectionSpec {
    nodes: Vec<SpecNode>,
}

impl ProjectionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf attribute.
    pub fn field(mut self, token: impl Into<String>) -> Self {
        self.nodes.push(SpecNode::Leaf(token.into()));
        self
    }

    /// Append several leaf attributes.
    pub fn fields<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes
            .extend(tokens.into_iter().map(|t| SpecNode::Leaf(t.into())));
        self
    }

    /// Append a nested relation.
    pub fn nested(mut self, name: impl Into<String>, spec: ProjectionSpec) -> Self {
        self.nodes.push(SpecNode::Nested {
            name: name.into(),
            spec,
        });
        self
    }

    pub fn nodes(&self) -> &[SpecNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Look up an entry by merge key.
    pub fn get(&self, key: &str) -> Option<&SpecNode> {
        self.nodes.iter().find(|node| node.key() == key)
    }

    /// Overlay `other` onto this spec.
    ///
    /// Entries of `other` replace same-keyed entries in place; entries with
    /// new keys are appended in `other`'s order.
    pub fn merge(&self, other: &ProjectionSpec) -> ProjectionSpec {
        let mut nodes = self.nodes.clone();
        for node in &other.nodes {
            match nodes.iter_mut().find(|existing| existing.key() == node.key()) {
                Some(existing) => *existing = node.clone(),
                None => nodes.push(node.clone()),
            }
        }
        ProjectionSpec { nodes }
    }
}

/// A leaf token split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// The token as written in the projection.
    pub token: &'a str,
    /// Token without sigils; keeps any table qualifier (used for selects).
    pub column: &'a str,
    /// Real field name: the segment after the last `.`.
    pub name: &'a str,
    pub hidden: bool,
    pub custom: bool,
}

impl Sigils {
    /// Split a leaf token into sigil flags, selectable column and field name.
    pub fn parse<'a>(&self, token: &'a str) -> Attribute<'a> {
        let mut rest = token;
        let mut hidden = false;
        let mut custom = false;

        // Sigils may be combined in either order; an empty sigil never matches
        loop {
            if !hidden
                && !self.hidden.is_empty()
                && let Some(stripped) = rest.strip_prefix(self.hidden.as_str())
            {
                hidden = true;
                rest = stripped;
                continue;
            }
            if !custom
                && !self.custom.is_empty()
                && let Some(stripped) = rest.strip_prefix(self.custom.as_str())
            {
                custom = true;
                rest = stripped;
                continue;
            }
            break;
        }

        let name = rest.rsplit('.').next().unwrap_or(rest);

        Attribute {
            token,
            column: rest,
            name,
            hidden,
            custom,
        }
    }
}

impl TryFrom<Value> for ProjectionSpec {
    type Error = Error;

    /// Parse `["id", "name", {"address": ["city", "zip"]}]`.
    fn try_from(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(Error::Configuration(
                "a projection must be a list of fields".to_string(),
            ));
        };

        let mut spec = ProjectionSpec::new();
        for item in items {
            match item {
                Value::String(token) => spec.nodes.push(SpecNode::Leaf(token)),
                Value::Object(relations) => {
                    for (name, nested) in relations {
                        let nested = ProjectionSpec::try_from(nested).map_err(|e| {
                            Error::Configuration(format!("in relation '{name}': {e}"))
                        })?;
                        spec.nodes.push(SpecNode::Nested { name, spec: nested });
                    }
                }
                other => {
                    return Err(Error::Configuration(format!(
                        "unsupported projection entry: {other}"
                    )));
                }
            }
        }
        Ok(spec)
    }
}

impl From<ProjectionSpec> for Value {
    fn from(spec: ProjectionSpec) -> Self {
        Value::Array(
            spec.nodes
                .into_iter()
                .map(|node| match node {
                    SpecNode::Leaf(token) => Value::String(token),
                    SpecNode::Nested { name, spec } => {
                        let mut map = serde_json::Map::new();
                        map.insert(name, Value::from(spec));
                        Value::Object(map)
                    }
                })
                .collect(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_plain_token() {
        let sigils = Sigils::default();
        let attr = sigils.parse("name");
        assert_eq!(attr.column, "name");
        assert_eq!(attr.name, "name");
        assert!(!attr.hidden);
        assert!(!attr.custom);
    }

    #[test]
    fn parse_strips_sigils_and_qualifier() {
        let sigils = Sigils::default();

        let hidden = sigils.parse(":users.author_id");
        assert!(hidden.hidden);
        assert_eq!(hidden.column, "users.author_id");
        assert_eq!(hidden.name, "author_id");

        let custom = sigils.parse("@full_name");
        assert!(custom.custom);
        assert_eq!(custom.column, "full_name");

        let both = sigils.parse("@:secret");
        assert!(both.custom && both.hidden);
        assert_eq!(both.name, "secret");
    }

    #[test]
    fn parse_with_custom_sigils() {
        let sigils = Sigils {
            hidden: "!".to_string(),
            custom: "$".to_string(),
            exclusive_view: "~".to_string(),
        };
        let attr = sigils.parse("$total");
        assert!(attr.custom);
        assert_eq!(attr.name, "total");
        assert!(!sigils.parse(":id").hidden);
    }

    #[test]
    fn empty_sigils_match_nothing() {
        let sigils = Sigils {
            hidden: String::new(),
            custom: String::new(),
            exclusive_view: "_".to_string(),
        };
        let attr = sigils.parse("name");
        assert!(!attr.hidden);
        assert!(!attr.custom);
        assert_eq!(attr.column, "name");
    }

    #[test]
    fn merge_replaces_in_place_and_appends() {
        let wildcard = ProjectionSpec::new()
            .field("id")
            .nested("author", ProjectionSpec::new().field("id"))
            .field("created_at");
        let named = ProjectionSpec::new()
            .field("title")
            .nested("author", ProjectionSpec::new().field("id").field("name"));

        let merged = wildcard.merge(&named);
        let keys: Vec<&str> = merged.nodes().iter().map(SpecNode::key).collect();
        assert_eq!(keys, vec!["id", "author", "created_at", "title"]);
        assert_eq!(merged.get("author"), named.get("author"));
    }

    #[test]
    fn deserialize_nested_lists() {
        let spec: ProjectionSpec =
            serde_json::from_value(json!(["id", "name", {"address": ["city", "zip"]}])).unwrap();
        assert_eq!(
            spec,
            ProjectionSpec::new()
                .fields(["id", "name"])
                .nested("address", ProjectionSpec::new().fields(["city", "zip"]))
        );
    }

    #[test]
    fn deserialize_from_yaml_keeps_order() {
        let yaml = "- id\n- comments:\n    - body\n  author:\n    - name\n- title\n";
        let spec: ProjectionSpec = serde_yml::from_str(yaml).unwrap();
        let keys: Vec<&str> = spec.nodes().iter().map(SpecNode::key).collect();
        assert_eq!(keys, vec!["id", "comments", "author", "title"]);
    }

    #[test]
    fn deserialize_rejects_scalars() {
        let parsed: std::result::Result<ProjectionSpec, _> =
            serde_json::from_value(json!(["id", 3]));
        assert!(parsed.is_err());

        let parsed: std::result::Result<ProjectionSpec, _> = serde_json::from_value(json!("id"));
        assert!(parsed.is_err());
    }

    #[test]
    fn serialize_round_trips_shape() {
        let spec = ProjectionSpec::new()
            .field("id")
            .nested("tags", ProjectionSpec::new().field("name"));
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!(["id", {"tags": ["name"]}]));
    }
}
