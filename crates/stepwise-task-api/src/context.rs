//! Per-run shared state.
//!
//! String keys map to JSON values with last-write-wins semantics. Keys are
//! never removed during a run.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use stepwise_utils::{ContextError, TaskError};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: Map<String, Value>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value under `key`, `Value::Null` when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &Value {
        self.values.get(key).unwrap_or(&NULL)
    }

    /// Typed read. Absent or null keys yield `T::default()`.
    pub fn get_as<T>(&self, key: &str) -> Result<T, ContextError>
    where
        T: DeserializeOwned + Default,
    {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => T::deserialize(value).map_err(|e| ContextError::TypeMismatch {
                key: key.to_string(),
                expected: std::any::type_name::<T>(),
                message: e.to_string(),
            }),
        }
    }

    /// String value under `key`; empty when absent or not a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> &str {
        self.get(key).as_str().unwrap_or_default()
    }

    /// Like [`get`](Self::get) but fails with `MissingContext` when the key is
    /// absent or null.
    pub fn require(&self, key: &str) -> Result<&Value, TaskError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Err(TaskError::MissingContext {
                key: key.to_string(),
            }),
            Some(value) => Ok(value),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<(), ContextError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| ContextError::Serialization {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.values.insert(key, value);
        Ok(())
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl Extend<(String, Value)> for Context {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.values.extend(iter);
    }
}
