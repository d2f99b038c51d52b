use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded `stream-events` record.
///
/// The payload is kept untouched; only the `type` discriminator is
/// interpreted by the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Value);

impl Event {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Decode a single wire record.
    pub fn from_json(record: &str) -> serde_json::Result<Self> {
        serde_json::from_str(record).map(Self)
    }

    /// The `type` field, when present and a string.
    pub fn event_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a nested string field, e.g. `["change", "project"]`.
    pub fn str_at(&self, path: &[&str]) -> Option<&str> {
        let mut cursor = &self.0;
        for key in path {
            cursor = cursor.get(key)?;
        }
        cursor.as_str()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
