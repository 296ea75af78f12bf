//! Field-level deltas between two versions of a serializable record.
//!
//! Change events only carry the fields that actually differ. A command whose
//! delta is empty is rejected with the same error everywhere.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DomainError, DomainResult};

/// Message attached to every "nothing to change" rejection.
pub const NO_CHANGES: &str = "no changes found";

/// Changed fields keyed by their serialized (camelCase) name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldChanges(Map<String, Value>);

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Adds an identifying key (e.g. `idpConfigId`) after the delta was
    /// checked for emptiness.
    pub fn with_key(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Computes the fields of `new` that differ from `old`.
///
/// Fields that disappear from `new` are reported as `null`.
pub fn changes<T: Serialize>(old: &T, new: &T) -> DomainResult<FieldChanges> {
    let old = as_object(serde_json::to_value(old)?)?;
    let new = as_object(serde_json::to_value(new)?)?;

    let mut delta = Map::new();
    for (field, value) in &new {
        if old.get(field) != Some(value) {
            delta.insert(field.clone(), value.clone());
        }
    }
    for field in old.keys() {
        if !new.contains_key(field) {
            delta.insert(field.clone(), Value::Null);
        }
    }
    Ok(FieldChanges(delta))
}

/// [`changes`], rejecting an empty delta with `PreconditionFailed`.
pub fn require_changes<T: Serialize>(old: &T, new: &T) -> DomainResult<FieldChanges> {
    let delta = changes(old, new)?;
    if delta.is_empty() {
        return Err(DomainError::precondition_failed(NO_CHANGES));
    }
    Ok(delta)
}

/// Overlays a delta produced by [`changes`] onto `current`.
///
/// Keys unknown to `T` (identifying keys added with [`FieldChanges::with_key`])
/// are ignored.
pub fn apply_changes<T: Serialize + DeserializeOwned>(current: &T, delta: &Value) -> DomainResult<T> {
    let Value::Object(delta) = delta else {
        return Err(DomainError::internal("field delta is not a record"));
    };
    let mut merged = as_object(serde_json::to_value(current)?)?;
    for (field, value) in delta {
        merged.insert(field.clone(), value.clone());
    }
    Ok(serde_json::from_value(Value::Object(merged))?)
}

fn as_object(value: Value) -> DomainResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DomainError::internal(format!(
            "field delta needs a record, got {other}"
        ))),
    }
}
