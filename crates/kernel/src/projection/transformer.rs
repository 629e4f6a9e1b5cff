//! Projection engine.
//!
//! A [`Transformer`] walks a [`ProjectionSpec`] against a record (or a
//! sequence of records) and builds the output tree, applying renames,
//! guards, custom attributes, formatter chains and defaults on the way.
//! Transformers are built once and shared; projecting never mutates them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::operations::{FormatterChain, Operations};
use super::registry::FormatRegistry;
use super::spec::{Attribute, ProjectionSpec, SpecNode};
use crate::config::{Config, Sigils};
use crate::error::{Error, Result};
use crate::path_table::{PathTable, dotted_path};
use crate::query::Page;
use crate::record::{Record, Related};

/// Declarative part of a transformer, loadable from YAML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerDefinition {
    /// Envelope key the projected data is placed under (default: `data`).
    #[serde(default = "default_wrapper")]
    pub wrapper: String,

    /// Views by name.
    #[serde(default)]
    pub formats: FormatRegistry,

    /// Output key renames.
    #[serde(default)]
    pub renames: PathTable<String>,

    /// Formatter chains.
    #[serde(default)]
    pub formatters: PathTable<FormatterChain>,

    /// Attribute name → provider operation, used for custom-marked leaves.
    #[serde(default)]
    pub custom_attributes: HashMap<String, String>,

    /// Defaults for null values: a literal, or the name of a provider.
    #[serde(default)]
    pub defaults: PathTable<Value>,

    /// Attribute → guard predicate; a true predicate omits the key.
    #[serde(default)]
    pub guards: PathTable<String>,
}

fn default_wrapper() -> String {
    "data".to_string()
}

impl Default for TransformerDefinition {
    fn default() -> Self {
        Self {
            wrapper: default_wrapper(),
            formats: FormatRegistry::default(),
            renames: PathTable::default(),
            formatters: PathTable::default(),
            custom_attributes: HashMap::new(),
            defaults: PathTable::default(),
            guards: PathTable::default(),
        }
    }
}

impl TransformerDefinition {
    /// Parse a YAML definition.
    pub fn from_yaml(source: &str) -> Result<Self> {
        serde_yml::from_str(source)
            .map_err(|e| Error::Configuration(format!("invalid transformer definition: {e}")))
    }

    /// Parse a JSON definition.
    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source)
            .map_err(|e| Error::Configuration(format!("invalid transformer definition: {e}")))
    }
}

/// Builds and validates a [`Transformer`].
pub struct TransformerBuilder<R> {
    definition: TransformerDefinition,
    operations: Operations<R>,
    sigils: Sigils,
}

impl<R: Record> Default for TransformerBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> TransformerBuilder<R> {
    /// Start from an empty definition with the built-in formatters.
    pub fn new() -> Self {
        Self::from_definition(TransformerDefinition::default())
    }

    pub fn from_definition(definition: TransformerDefinition) -> Self {
        Self {
            definition,
            operations: Operations::new(),
            sigils: Sigils::default(),
        }
    }

    pub fn wrapper(mut self, wrapper: impl Into<String>) -> Self {
        self.definition.wrapper = wrapper.into();
        self
    }

    pub fn view(mut self, name: impl Into<String>, spec: ProjectionSpec) -> Self {
        self.definition.formats = self.definition.formats.view(name, spec);
        self
    }

    /// Rename `attribute` at every depth.
    pub fn rename(mut self, attribute: &str, to: &str) -> Self {
        self.definition.renames.insert_wildcard(attribute, to.to_string());
        self
    }

    /// Rename only at the exact dotted `path`.
    pub fn rename_path(mut self, path: &str, to: &str) -> Self {
        self.definition.renames.insert_path(path, to.to_string());
        self
    }

    pub fn format(mut self, attribute: &str, chain: FormatterChain) -> Self {
        self.definition.formatters.insert_wildcard(attribute, chain);
        self
    }

    pub fn format_path(mut self, path: &str, chain: FormatterChain) -> Self {
        self.definition.formatters.insert_path(path, chain);
        self
    }

    pub fn custom_attribute(mut self, attribute: &str, provider: &str) -> Self {
        self.definition
            .custom_attributes
            .insert(attribute.to_string(), provider.to_string());
        self
    }

    pub fn default_value(mut self, attribute: &str, value: Value) -> Self {
        self.definition.defaults.insert_wildcard(attribute, value);
        self
    }

    pub fn default_path(mut self, path: &str, value: Value) -> Self {
        self.definition.defaults.insert_path(path, value);
        self
    }

    pub fn guard(mut self, attribute: &str, predicate: &str) -> Self {
        self.definition
            .guards
            .insert_wildcard(attribute, predicate.to_string());
        self
    }

    pub fn guard_path(mut self, path: &str, predicate: &str) -> Self {
        self.definition
            .guards
            .insert_path(path, predicate.to_string());
        self
    }

    /// Register operations on the builder's registry.
    pub fn operations(mut self, register: impl FnOnce(&mut Operations<R>)) -> Self {
        register(&mut self.operations);
        self
    }

    /// Replace the operation registry.
    pub fn with_operations(mut self, operations: Operations<R>) -> Self {
        self.operations = operations;
        self
    }

    /// Sigils used to read leaf tokens. Must match the sigils of any
    /// [`FilterEngine`](crate::filter::FilterEngine) serving the same views,
    /// or auto-select and projection disagree; prefer [`Self::config`].
    pub fn sigils(mut self, sigils: Sigils) -> Self {
        self.sigils = sigils;
        self
    }

    /// Take the sigils from the shared [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.sigils(config.sigils.clone())
    }

    /// Check every referenced operation exists and build the transformer.
    pub fn build(self) -> Result<Transformer<R>> {
        let mut missing = Vec::new();

        for chain in self.definition.formatters.values() {
            for call in chain.calls() {
                if !self.operations.has_formatter(&call.name) {
                    missing.push(format!("formatter '{}'", call.name));
                }
            }
        }
        for predicate in self.definition.guards.values() {
            if !self.operations.has_predicate(predicate) {
                missing.push(format!("guard '{predicate}'"));
            }
        }
        for (attribute, provider) in &self.definition.custom_attributes {
            if !self.operations.has_provider(provider) {
                missing.push(format!("provider '{provider}' (custom attribute '{attribute}')"));
            }
        }

        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(Error::Configuration(format!(
                "unregistered operations: {}",
                missing.join(", ")
            )));
        }

        Ok(Transformer {
            definition: self.definition,
            operations: self.operations,
            sigils: self.sigils,
        })
    }
}

/// Projection engine for one record type.
pub struct Transformer<R> {
    definition: TransformerDefinition,
    operations: Operations<R>,
    sigils: Sigils,
}

impl<R> std::fmt::Debug for Transformer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("definition", &self.definition)
            .field("operations", &self.operations)
            .finish()
    }
}

impl<R: Record> Transformer<R> {
    pub fn builder() -> TransformerBuilder<R> {
        TransformerBuilder::new()
    }

    /// Envelope key for projected data.
    pub fn wrapper(&self) -> &str {
        &self.definition.wrapper
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.definition.formats
    }

    pub fn sigils(&self) -> &Sigils {
        &self.sigils
    }

    /// Resolve the view for a request (see [`FormatRegistry::resolve`]).
    pub fn resolve_view(&self, requested: Option<&str>, current_action: Option<&str>) -> ProjectionSpec {
        self.definition
            .formats
            .resolve(requested, current_action, &self.sigils.exclusive_view)
    }

    /// Resolve a view and project the subject with it.
    pub fn transform<'a>(
        &self,
        subject: impl Into<Related<'a, R>>,
        view: Option<&str>,
        current_action: Option<&str>,
    ) -> Result<Value>
    where
        R: 'a,
    {
        let spec = self.resolve_view(view, current_action);
        self.project(subject.into(), &spec)
    }

    /// Project nothing (→ null), one record (→ object) or a sequence
    /// (→ array, same order).
    pub fn project(&self, subject: Related<'_, R>, spec: &ProjectionSpec) -> Result<Value> {
        let mut context = Vec::new();
        self.project_related(subject, spec, &mut context)
    }

    fn project_related(
        &self,
        subject: Related<'_, R>,
        spec: &ProjectionSpec,
        context: &mut Vec<String>,
    ) -> Result<Value> {
        match subject {
            Related::Absent => Ok(Value::Null),
            Related::One(record) => self.project_record(record, spec, context),
            Related::Many(records) => records
                .iter()
                .map(|record| self.project_record(record, spec, context))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }

    fn project_record(
        &self,
        record: &R,
        spec: &ProjectionSpec,
        context: &mut Vec<String>,
    ) -> Result<Value> {
        let mut output = Map::new();

        for node in spec.nodes() {
            match node {
                SpecNode::Nested { name, spec } => {
                    let key = self.rename(name, context);
                    context.push(name.clone());
                    let value = self.project_related(record.relation(name), spec, context);
                    context.pop();
                    output.insert(key, value?);
                }
                SpecNode::Leaf(token) => {
                    let attribute = self.sigils.parse(token);

                    if self.is_guarded(attribute.name, context, record)? || attribute.hidden {
                        continue;
                    }

                    let value = self.read_value(&attribute, record)?;
                    let value = self.apply_formatters(attribute.name, value, context)?;
                    let value = self.apply_default(attribute.name, value, context, record)?;

                    output.insert(self.rename(attribute.name, context), value);
                }
            }
        }

        Ok(Value::Object(output))
    }

    /// Output key: wildcard rename, else exact-path rename, else unchanged.
    fn rename(&self, attribute: &str, context: &[String]) -> String {
        self.definition
            .renames
            .resolve(attribute, context)
            .cloned()
            .unwrap_or_else(|| attribute.to_string())
    }

    fn is_guarded(&self, attribute: &str, context: &[String], record: &R) -> Result<bool> {
        match self.definition.guards.resolve(attribute, context) {
            Some(predicate) => self.operations.guard(predicate, record),
            None => Ok(false),
        }
    }

    fn read_value(&self, attribute: &Attribute<'_>, record: &R) -> Result<Value> {
        if attribute.custom
            && let Some(provider) = self.definition.custom_attributes.get(attribute.name)
        {
            return self.operations.provide(provider, record);
        }
        Ok(record.field(attribute.name).unwrap_or(Value::Null))
    }

    /// Wildcard chain first, then the exact-path chain.
    fn apply_formatters(&self, attribute: &str, value: Value, context: &[String]) -> Result<Value> {
        let formatters = &self.definition.formatters;
        if formatters.is_empty() {
            return Ok(value);
        }

        let mut value = value;
        if let Some(chain) = formatters.wildcard(attribute) {
            value = self.operations.format(chain, value)?;
        }
        if let Some(chain) = formatters.path(&dotted_path(context, attribute)) {
            value = self.operations.format(chain, value)?;
        }
        Ok(value)
    }

    fn apply_default(
        &self,
        attribute: &str,
        value: Value,
        context: &[String],
        record: &R,
    ) -> Result<Value> {
        if !value.is_null() {
            return Ok(value);
        }
        match self.definition.defaults.resolve(attribute, context) {
            Some(Value::String(name)) if self.operations.has_provider(name) => {
                self.operations.provide(name, record)
            }
            Some(default) => Ok(default.clone()),
            None => Ok(value),
        }
    }
}

impl Transformer<Value> {
    /// Project the items of a query page.
    pub fn transform_page(
        &self,
        page: &Page,
        view: Option<&str>,
        current_action: Option<&str>,
    ) -> Result<Value> {
        self.transform(&page.items, view, current_action)
    }
}
