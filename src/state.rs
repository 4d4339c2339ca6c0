//! The persisted state for special-cased relations. The credentials for these relations arrive on
//! transient events, but they're needed by every later reconciliation, so they are kept in a store that
//! the host makes durable between events. The store is injected, never global.
use crate::resource::JsonObject;

use std::collections::BTreeMap;

pub const PG_NAMESPACE: &str = "pg";
pub const MONGODB_NAMESPACE: &str = "mongodb";

/// Snapshot of every namespace in the store
pub type StoredRelations = BTreeMap<String, JsonObject>;

/// Handle to the externally durable key/value store. The host guarantees a single event in flight,
/// so implementations need no locking.
pub trait StateStore {
    fn get(&self, namespace: &str) -> Option<JsonObject>;

    fn set(&mut self, namespace: &str, data: JsonObject);

    fn remove(&mut self, namespace: &str);

    /// Returns a copy of every namespace currently stored
    fn snapshot(&self) -> StoredRelations;

    /// Replaces the namespace with the given data, removing it entirely when the data is empty.
    /// Returns true only if the stored value actually changed.
    fn replace(&mut self, namespace: &str, data: JsonObject) -> bool {
        let previous = self.get(namespace).unwrap_or_default();
        if previous == data {
            log::debug!("Stored data for '{}' is unchanged", namespace);
            return false;
        }
        if data.is_empty() {
            log::info!("Clearing stored data for '{}'", namespace);
            self.remove(namespace);
        } else {
            log::info!("Updating stored data for '{}'", namespace);
            self.set(namespace, data);
        }
        true
    }
}

/// A `StateStore` that lives only in memory
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryStore(StoredRelations);

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn from_snapshot(snapshot: StoredRelations) -> MemoryStore {
        MemoryStore(snapshot)
    }
}

impl StateStore for MemoryStore {
    fn get(&self, namespace: &str) -> Option<JsonObject> {
        self.0.get(namespace).cloned()
    }

    fn set(&mut self, namespace: &str, data: JsonObject) {
        self.0.insert(namespace.to_owned(), data);
    }

    fn remove(&mut self, namespace: &str) {
        self.0.remove(namespace);
    }

    fn snapshot(&self) -> StoredRelations {
        self.0.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> JsonObject {
        value.as_object().cloned().expect("not an object")
    }

    #[test]
    fn replace_reports_changes_only() {
        let mut store = MemoryStore::new();
        let data = object(json!({"db_uri": "postgresql://u:p@h:5432/db"}));

        assert!(store.replace(PG_NAMESPACE, data.clone()));
        assert!(!store.replace(PG_NAMESPACE, data.clone()));
        assert_eq!(Some(data), store.get(PG_NAMESPACE));
    }

    #[test]
    fn replacing_with_empty_data_removes_namespace() {
        let mut store = MemoryStore::new();
        assert!(!store.replace(PG_NAMESPACE, JsonObject::new()));

        store.replace(PG_NAMESPACE, object(json!({"db_uri": "x"})));
        assert!(store.replace(PG_NAMESPACE, JsonObject::new()));
        assert!(store.snapshot().is_empty());
    }
}
