//! In-process schema store

use std::collections::BTreeMap;

use crate::error::{ForgeError, Result};
use crate::schema::SchemaBody;
use crate::version::SequentialId;

use super::SchemaStore;

/// Volatile store with a registry-style global id counter.
///
/// `set_available(false)` makes every call fail with `RegistryUnavailable`,
/// which is how outage handling is exercised.
#[derive(Debug)]
pub struct InMemorySchemaStore {
    subjects: BTreeMap<String, BTreeMap<SequentialId, SchemaBody>>,
    next_id: u32,
    available: bool,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self {
            subjects: BTreeMap::new(),
            next_id: 1,
            available: true,
        }
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(ForgeError::RegistryUnavailable(
                "in-memory registry is offline".to_string(),
            ))
        }
    }
}

impl Default for InMemorySchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaStore for InMemorySchemaStore {
    fn register(&mut self, subject: &str, body: &SchemaBody) -> Result<SequentialId> {
        self.ensure_available()?;
        let id = SequentialId(self.next_id);
        self.next_id += 1;
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .insert(id, body.clone());
        Ok(id)
    }

    fn fetch(&self, subject: &str, id: SequentialId) -> Result<SchemaBody> {
        self.ensure_available()?;
        let versions = self
            .subjects
            .get(subject)
            .ok_or_else(|| ForgeError::SubjectNotFound(subject.to_string()))?;
        versions
            .get(&id)
            .cloned()
            .ok_or_else(|| ForgeError::VersionNotFound {
                subject: subject.to_string(),
                version: format!("id {}", id),
            })
    }

    fn list(&self, subject: &str) -> Result<Vec<SequentialId>> {
        self.ensure_available()?;
        self.subjects
            .get(subject)
            .map(|v| v.keys().copied().collect())
            .ok_or_else(|| ForgeError::SubjectNotFound(subject.to_string()))
    }

    fn subjects(&self) -> Result<Vec<String>> {
        self.ensure_available()?;
        Ok(self.subjects.keys().cloned().collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(name: &str) -> SchemaBody {
        SchemaBody::from_value(json!({
            "type": "record",
            "name": name,
            "fields": [{ "name": "id", "type": "string" }]
        }))
        .unwrap()
    }

    #[test]
    fn test_ids_are_global_and_increasing() {
        let mut store = InMemorySchemaStore::new();
        let a = store.register("A", &body("A")).unwrap();
        let b = store.register("B", &body("B")).unwrap();
        let a2 = store.register("A", &body("A")).unwrap();
        assert!(a < b && b < a2);
        assert_eq!(store.list("A").unwrap(), vec![a, a2]);
        assert_eq!(store.subjects().unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_lookup_misses() {
        let mut store = InMemorySchemaStore::new();
        store.register("A", &body("A")).unwrap();
        assert!(matches!(
            store.fetch("Z", SequentialId(1)),
            Err(ForgeError::SubjectNotFound(_))
        ));
        assert!(matches!(
            store.fetch("A", SequentialId(99)),
            Err(ForgeError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn test_offline_store() {
        let mut store = InMemorySchemaStore::new();
        store.set_available(false);
        let err = store.register("A", &body("A")).unwrap_err();
        assert!(err.is_retryable());
    }
}
