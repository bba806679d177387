use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable key/value view of one loan application.
///
/// JSON `null` is treated the same as an absent key. Dotted names such as
/// `bureau.score` fall back to a nested lookup when no literal top-level key
/// of that name exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationSnapshot(HashMap<String, Value>);

impl ApplicationSnapshot {
    /// Create a snapshot from a field map.
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self(fields)
    }

    /// Create a snapshot from a JSON object. Returns `None` for non-objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map.into_iter().collect())),
            _ => None,
        }
    }

    /// Add or replace a field.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Resolve a field. Missing and `null` values both resolve to `None`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(field) {
            return non_null(value);
        }

        let mut parts = field.split('.');
        let head = parts.next()?;
        let mut current = self.0.get(head)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        non_null(current)
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn non_null(value: &Value) -> Option<&Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

impl FromIterator<(String, Value)> for ApplicationSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_treats_null_as_missing() {
        let app = ApplicationSnapshot::default()
            .with("credit_score", 710)
            .with("employer", Value::Null);

        assert_eq!(app.get("credit_score"), Some(&json!(710)));
        assert_eq!(app.get("employer"), None);
        assert_eq!(app.get("income"), None);
    }

    #[test]
    fn test_get_dotted_path() {
        let app = ApplicationSnapshot::from_value(json!({
            "bureau": {"score": 640, "file": {"status": "thin"}},
            "a.b": 1
        }))
        .unwrap();

        assert_eq!(app.get("bureau.score"), Some(&json!(640)));
        assert_eq!(app.get("bureau.file.status"), Some(&json!("thin")));
        assert_eq!(app.get("a.b"), Some(&json!(1)));
        assert_eq!(app.get("bureau.missing"), None);
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(ApplicationSnapshot::from_value(json!([1, 2])).is_none());
        assert!(ApplicationSnapshot::from_value(json!("x")).is_none());
    }
}
