//! Operation registry for transformers.
//!
//! Transformers refer to operations by name: custom-attribute providers,
//! value formatters and guard predicates. Every name is resolved against
//! this registry, built once when the transformer is defined.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Computes a field value from a record.
pub type Provider<R> = Arc<dyn Fn(&R) -> anyhow::Result<Value> + Send + Sync>;

/// Rewrites a value, with extra literal arguments declared next to its name.
pub type Formatter = Arc<dyn Fn(Value, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// Decides whether a field is omitted for a record.
pub type Predicate<R> = Arc<dyn Fn(&R) -> anyhow::Result<bool> + Send + Sync>;

/// Named operations available to one transformer.
pub struct Operations<R> {
    providers: HashMap<String, Provider<R>>,
    formatters: HashMap<String, Formatter>,
    predicates: HashMap<String, Predicate<R>>,
}

impl<R> Clone for Operations<R> {
    fn clone(&self) -> Self {
        Self {
            providers: self.providers.clone(),
            formatters: self.formatters.clone(),
            predicates: self.predicates.clone(),
        }
    }
}

impl<R> fmt::Debug for Operations<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut formatters: Vec<&String> = self.formatters.keys().collect();
        formatters.sort();
        f.debug_struct("Operations")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("formatters", &formatters)
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<R> Default for Operations<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Operations<R> {
    /// Create a registry with the built-in formatters pre-registered.
    pub fn new() -> Self {
        let mut operations = Self::empty();
        operations.formatter("trim", |value, _| Ok(map_str(value, |s| s.trim().to_string())));
        operations.formatter("lowercase", |value, _| Ok(map_str(value, |s| s.to_lowercase())));
        operations.formatter("uppercase", |value, _| Ok(map_str(value, |s| s.to_uppercase())));
        operations.formatter("escape_html", |value, _| Ok(map_str(value, escape_html)));
        operations.formatter("truncate", truncate);
        operations.formatter("round", round);
        operations.formatter("date", format_date);
        operations.formatter("boolean", |value, _| Ok(to_boolean(value)));
        operations.formatter("string", |value, _| Ok(to_string(value)));
        operations
    }

    /// Create a registry without built-in formatters.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            formatters: HashMap::new(),
            predicates: HashMap::new(),
        }
    }

    /// Register a custom-attribute provider (also usable as a default-value
    /// operation).
    pub fn provider<F>(&mut self, name: &str, provider: F) -> &mut Self
    where
        F: Fn(&R) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.providers.insert(name.to_string(), Arc::new(provider));
        self
    }

    /// Register a formatter.
    pub fn formatter<F>(&mut self, name: &str, formatter: F) -> &mut Self
    where
        F: Fn(Value, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.formatters.insert(name.to_string(), Arc::new(formatter));
        self
    }

    /// Register a guard predicate.
    pub fn predicate<F>(&mut self, name: &str, predicate: F) -> &mut Self
    where
        F: Fn(&R) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.predicates.insert(name.to_string(), Arc::new(predicate));
        self
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn has_formatter(&self, name: &str) -> bool {
        self.formatters.contains_key(name)
    }

    pub fn has_predicate(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    /// Invoke a provider.
    pub fn provide(&self, name: &str, record: &R) -> Result<Value> {
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("provider '{name}' is not registered")))?;
        provider(record).map_err(|e| Error::operation(name, e))
    }

    /// Run a formatter chain over a value, left to right.
    pub fn format(&self, chain: &FormatterChain, value: Value) -> Result<Value> {
        chain.calls().iter().try_fold(value, |value, call| {
            let formatter = self.formatters.get(&call.name).ok_or_else(|| {
                Error::Configuration(format!("formatter '{}' is not registered", call.name))
            })?;
            formatter(value, &call.args).map_err(|e| Error::operation(&call.name, e))
        })
    }

    /// Evaluate a guard predicate.
    pub fn guard(&self, name: &str, record: &R) -> Result<bool> {
        let predicate = self
            .predicates
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("guard '{name}' is not registered")))?;
        predicate(record).map_err(|e| Error::operation(name, e))
    }
}

/// One formatter invocation: operation name plus literal arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatterCall {
    pub name: String,
    pub args: Vec<Value>,
}

impl FormatterCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Ordered formatter chain.
///
/// Deserializes from a single name (`"trim"`), a list of names and
/// `{name: [args]}` maps (`["trim", {"truncate": [20]}]`), or a single map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct FormatterChain {
    calls: Vec<FormatterCall>,
}

impl FormatterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call without arguments.
    pub fn then(mut self, name: impl Into<String>) -> Self {
        self.calls.push(FormatterCall::new(name));
        self
    }

    /// Append a call with arguments.
    pub fn then_with(mut self, name: impl Into<String>, args: Vec<Value>) -> Self {
        self.calls.push(FormatterCall::with_args(name, args));
        self
    }

    pub fn calls(&self) -> &[FormatterCall] {
        &self.calls
    }

    fn push_map(&mut self, map: serde_json::Map<String, Value>) -> Result<()> {
        for (name, args) in map {
            let args = match args {
                Value::Array(args) => args,
                Value::Null => Vec::new(),
                single => vec![single],
            };
            self.calls.push(FormatterCall::with_args(name, args));
        }
        Ok(())
    }
}

impl From<&str> for FormatterChain {
    fn from(name: &str) -> Self {
        FormatterChain::new().then(name)
    }
}

impl TryFrom<Value> for FormatterChain {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let mut chain = FormatterChain::new();
        match value {
            Value::String(name) => chain.calls.push(FormatterCall::new(name)),
            Value::Object(map) => chain.push_map(map)?,
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(name) => chain.calls.push(FormatterCall::new(name)),
                        Value::Object(map) => chain.push_map(map)?,
                        other => {
                            return Err(Error::Configuration(format!(
                                "invalid formatter entry: {other}"
                            )));
                        }
                    }
                }
            }
            other => {
                return Err(Error::Configuration(format!(
                    "invalid formatter chain: {other}"
                )));
            }
        }
        Ok(chain)
    }
}

impl From<FormatterChain> for Value {
    fn from(chain: FormatterChain) -> Self {
        Value::Array(
            chain
                .calls
                .into_iter()
                .map(|call| {
                    if call.args.is_empty() {
                        Value::String(call.name)
                    } else {
                        let mut map = serde_json::Map::new();
                        map.insert(call.name, Value::Array(call.args));
                        Value::Object(map)
                    }
                })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Built-in formatters. Null passes through all of them unchanged.
// ---------------------------------------------------------------------------

fn map_str(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// `truncate(length[, suffix])`
fn truncate(value: Value, args: &[Value]) -> anyhow::Result<Value> {
    let Value::String(s) = value else {
        return Ok(value);
    };
    let length = args
        .first()
        .and_then(Value::as_u64)
        .context("truncate requires a length argument")? as usize;
    let suffix = args.get(1).and_then(Value::as_str).unwrap_or("...");

    if s.chars().count() <= length {
        return Ok(Value::String(s));
    }
    let mut truncated: String = s.chars().take(length).collect();
    truncated.push_str(suffix);
    Ok(Value::String(truncated))
}

/// Digits beyond this are below `f64` resolution.
const MAX_ROUND_PRECISION: i64 = 15;

/// `round([precision])`
fn round(value: Value, args: &[Value]) -> anyhow::Result<Value> {
    let number = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(number) = number else {
        return Ok(value);
    };
    let precision = args.first().and_then(Value::as_i64).unwrap_or(0);
    if precision <= 0 {
        return Ok(Value::from(number.round() as i64));
    }
    let precision = i32::try_from(precision.min(MAX_ROUND_PRECISION)).unwrap_or(0);
    let factor = 10f64.powi(precision);
    let rounded = (number * factor).round() / factor;
    Ok(serde_json::Number::from_f64(rounded).map_or(Value::Null, Value::Number))
}

/// `date([format])`: accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, or unix seconds.
fn format_date(value: Value, args: &[Value]) -> anyhow::Result<Value> {
    let format = args.first().and_then(Value::as_str).unwrap_or("%Y-%m-%d");

    let parsed: DateTime<Utc> = match &value {
        Value::Null => return Ok(Value::Null),
        Value::Number(n) => {
            let secs = n.as_i64().context("date expects integer unix seconds")?;
            DateTime::from_timestamp(secs, 0).context("timestamp out of range")?
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                dt.with_timezone(&Utc)
            } else if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                naive.and_utc()
            } else {
                bail!("unrecognised date '{s}'");
            }
        }
        other => bail!("cannot format {other} as a date"),
    };

    let mut formatted = String::new();
    if write!(formatted, "{}", parsed.format(format)).is_err() {
        bail!("invalid date format '{format}'");
    }
    Ok(Value::String(formatted))
}

fn to_boolean(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(b),
        Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => Value::Bool(!matches!(
            s.trim().to_lowercase().as_str(),
            "" | "0" | "false" | "no" | "off"
        )),
        Value::Array(items) => Value::Bool(!items.is_empty()),
        Value::Object(map) => Value::Bool(!map.is_empty()),
    }
}

fn to_string(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}
