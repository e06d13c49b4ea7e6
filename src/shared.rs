//! # Shared State
//!
//! The flow-scoped mutable map nodes use to exchange data within one
//! execution. Exactly one execution owns a given map; it is seeded from the
//! trigger payload, read during `prep`, and written during `post`.
//!
//! Values are arbitrary JSON. By convention a node writes its primary output
//! at `result`, but nodes may use any keys they agree on.

use serde_json::{Map, Value};

/// Flow-scoped mutable state owned by a single execution.
///
/// Not shared across executions; the runtime passes it by reference into
/// each node phase, so no interior locking is needed.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    data: Map<String, Value>,
}

impl SharedState {
    /// Create an empty shared state.
    pub fn new() -> Self {
        Self { data: Map::new() }
    }

    /// Seed the state from a JSON object (e.g. the trigger payload).
    /// Non-object values are stored under `input`.
    pub fn seed(initial: Value) -> Self {
        let data = match initial {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        Self { data }
    }

    /// Retrieve a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Store a value under a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Remove a value, returning it if it existed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// All keys currently present.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the state is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The state as a JSON object, for the expression evaluator's `shared`
    /// binding and for persisting execution results.
    pub fn as_value(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

impl From<Map<String, Value>> for SharedState {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let mut shared = SharedState::new();
        shared.set("key1", json!("value1"));

        assert_eq!(shared.get("key1"), Some(&json!("value1")));
        assert_eq!(shared.get("missing"), None);
        assert!(shared.contains_key("key1"));
        assert_eq!(shared.len(), 1);

        assert_eq!(shared.remove("key1"), Some(json!("value1")));
        assert!(shared.is_empty());
    }

    #[test]
    fn test_seed_from_object() {
        let shared = SharedState::seed(json!({"request_id": "req-1", "count": 3}));
        assert_eq!(shared.get("request_id"), Some(&json!("req-1")));
        assert_eq!(shared.get("count"), Some(&json!(3)));
    }

    #[test]
    fn test_seed_from_scalar_wraps_in_input() {
        let shared = SharedState::seed(json!("plain"));
        assert_eq!(shared.get("input"), Some(&json!("plain")));

        let empty = SharedState::seed(Value::Null);
        assert!(empty.is_empty());
    }
}
