//! Record contract consumed by the projection engine.

use serde_json::Value;

/// A stored record as the projection engine sees it: named fields and named
/// relations. Records are never mutated by the engine.
pub trait Record {
    /// Read a field; `None` when the record has no such field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Read a relation.
    fn relation(&self, name: &str) -> Related<'_, Self>
    where
        Self: Sized;
}

/// Something to project: nothing, one record, or an ordered sequence.
#[derive(Debug)]
pub enum Related<'a, R> {
    Absent,
    One(&'a R),
    Many(&'a [R]),
}

impl<R> Clone for Related<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Related<'_, R> {}

impl<'a, R> From<&'a [R]> for Related<'a, R> {
    fn from(records: &'a [R]) -> Self {
        Related::Many(records)
    }
}

impl<'a, R> From<&'a Vec<R>> for Related<'a, R> {
    fn from(records: &'a Vec<R>) -> Self {
        Related::Many(records.as_slice())
    }
}

impl<'a, R> From<Option<&'a R>> for Related<'a, R> {
    fn from(record: Option<&'a R>) -> Self {
        record.map_or(Related::Absent, Related::One)
    }
}

/// JSON rows are records: object keys are fields, nested objects and arrays
/// are relations. A `null` or missing key is an absent relation.
impl Record for Value {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn relation(&self, name: &str) -> Related<'_, Self> {
        match self.get(name) {
            Some(Value::Array(items)) => Related::Many(items.as_slice()),
            Some(Value::Null) | None => Related::Absent,
            Some(other) => Related::One(other),
        }
    }
}

impl<'a> From<&'a Value> for Related<'a, Value> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Null => Related::Absent,
            Value::Array(items) => Related::Many(items.as_slice()),
            other => Related::One(other),
        }
    }
}
