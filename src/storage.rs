//!
//! appbase storage module
//! ----------------------
//! This module implements the on-disk entity store using a simple two-level
//! directory layout: `<root>/<entity_name>/<id>.json`. Each record is one JSON
//! document holding the generic envelope (id, entity_name, data, created_at,
//! updated_at) with the entity body kept as an opaque JSON object under `data`.
//!
//! Key responsibilities:
//! - Point lookup, filtered listing, insert, full-replace update and delete.
//! - Atomic per-record persistence (write to a temp file, then rename).
//! - Equality filters over top-level `data` fields, AND-combined.
//! - Caller-specified ordering with a leading `-` for descending.
//!
//! The public API centers around the `Store` type, which is usually wrapped in a
//! thread-safe `SharedStore` (`Arc<Mutex<Store>>`) elsewhere in the codebase.

use std::sync::Arc;
use std::{fs, path::{Path, PathBuf}};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// Typed storage-layer errors. Everything that is not a missing record or a
/// bad entity name is an I/O or encoding failure the caller maps to Internal.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no {entity_name} record with id {id}")]
    NotFound { entity_name: String, id: String },
    #[error("invalid entity name: {0}")]
    InvalidEntityName(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single stored entity: the generic envelope around an opaque JSON body.
///
/// `data` is never partially written; an update replaces it atomically and
/// bumps `updated_at`, so `updated_at >= created_at` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub entity_name: String,
    pub data: serde_json::Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    /// Fetch a string field out of the opaque body, if present.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(|v| v.as_str())
    }
}

/// Core on-disk storage handle for the entity record tree.
///
/// Store exposes the generic persistence contract (get/list/create/update/
/// delete plus bulk create) under a configured root folder. Entity names are
/// validated before any path is built so a name can never escape the root.
#[derive(Clone)]
pub struct Store {
    /// Root folder for all entity partitions.
    root: PathBuf,
}

/// Thread-safe shared handle used by the HTTP layer and services.
#[derive(Clone)]
pub struct SharedStore(pub Arc<Mutex<Store>>);

impl SharedStore {
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        Ok(Self(Arc::new(Mutex::new(Store::new(root)?))))
    }
}

/// Accept alphanumerics, underscore and hyphen; reject anything that could
/// traverse the filesystem.
fn valid_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Total ordering over JSON values for the list sort: null < bool < number <
/// string; arrays/objects compare equal among themselves (no meaningful order).
fn cmp_json(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Exact-match filter comparison. Query-string filters arrive as strings, so
/// a string filter also matches a number/bool field with the same rendering.
fn value_matches(filter: &Value, field: &Value) -> bool {
    if filter == field {
        return true;
    }
    match (filter, field) {
        (Value::String(f), Value::Number(n)) => f == &n.to_string(),
        (Value::String(f), Value::Bool(b)) => f == if *b { "true" } else { "false" },
        _ => false,
    }
}

impl Store {
    /// Create a new Store rooted at the given filesystem path.
    /// The directory is created if it does not already exist.
    pub fn new<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Return the configured root folder for this Store.
    pub fn root_path(&self) -> &PathBuf { &self.root }

    fn partition_dir(&self, entity_name: &str) -> StoreResult<PathBuf> {
        if !valid_segment(entity_name) {
            return Err(StoreError::InvalidEntityName(entity_name.to_string()));
        }
        Ok(self.root.join(entity_name))
    }

    fn record_path(&self, entity_name: &str, id: &str) -> StoreResult<PathBuf> {
        let dir = self.partition_dir(entity_name)?;
        if !valid_segment(id) {
            return Err(StoreError::NotFound { entity_name: entity_name.into(), id: id.into() });
        }
        Ok(dir.join(format!("{}.json", id)))
    }

    /// Write a record to its final path via a temp file + rename so readers
    /// never observe a partially written document.
    fn persist(&self, record: &EntityRecord) -> StoreResult<()> {
        let path = self.record_path(&record.entity_name, &record.id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Point lookup by (entity_name, id).
    pub fn get(&self, entity_name: &str, id: &str) -> StoreResult<EntityRecord> {
        let path = self.record_path(entity_name, id)?;
        if !path.exists() {
            return Err(StoreError::NotFound { entity_name: entity_name.into(), id: id.into() });
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Filtered, ordered listing of one entity partition.
    ///
    /// Filters match records whose `data` fields equal the supplied values
    /// (AND across filters). `sort` names a `data` field or one of the
    /// envelope fields `created_at` / `updated_at` / `id`; a leading `-`
    /// selects descending order. The baseline order is `created_at` then id,
    /// and the requested sort is stable on top of it. A partition that does
    /// not exist yet lists as empty.
    pub fn list(
        &self,
        entity_name: &str,
        filters: &serde_json::Map<String, Value>,
        sort: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<EntityRecord>> {
        let dir = self.partition_dir(entity_name)?;
        let mut records: Vec<EntityRecord> = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                let bytes = fs::read(&path)?;
                match serde_json::from_slice::<EntityRecord>(&bytes) {
                    Ok(rec) => records.push(rec),
                    Err(e) => {
                        // Skip unreadable documents rather than failing the whole listing
                        debug!(target: "appbase::storage", "list: skipping unreadable record at '{}': {}", path.display(), e);
                    }
                }
            }
        }

        records.retain(|rec| {
            filters.iter().all(|(k, want)| match rec.data.get(k) {
                Some(have) => value_matches(want, have),
                None => false,
            })
        });

        // Baseline (created_at, id) order, then a stable sort by the requested key on top
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(sort_key) = sort {
            let (field, desc) = match sort_key.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (sort_key, false),
            };
            let key_of = |rec: &EntityRecord| -> Value {
                match field {
                    "id" => Value::String(rec.id.clone()),
                    "created_at" => Value::String(rec.created_at.to_rfc3339()),
                    "updated_at" => Value::String(rec.updated_at.to_rfc3339()),
                    _ => rec.data.get(field).cloned().unwrap_or(Value::Null),
                }
            };
            records.sort_by(|a, b| {
                let ord = cmp_json(&key_of(a), &key_of(b));
                if desc { ord.reverse() } else { ord }
            });
        }

        if let Some(n) = limit {
            records.truncate(n);
        }
        Ok(records)
    }

    /// Find the first record whose `data[field]` equals the given string.
    /// Used for unique-field lookups (username, session token, join code).
    pub fn find_by_field(
        &self,
        entity_name: &str,
        field: &str,
        value: &str,
    ) -> StoreResult<Option<EntityRecord>> {
        let mut filters = serde_json::Map::new();
        filters.insert(field.to_string(), Value::String(value.to_string()));
        let mut found = self.list(entity_name, &filters, None, Some(1))?;
        Ok(found.pop())
    }

    /// Insert a new record with a fresh unique id and both timestamps set now.
    pub fn create(
        &self,
        entity_name: &str,
        body: serde_json::Map<String, Value>,
    ) -> StoreResult<EntityRecord> {
        let now = Utc::now();
        let record = EntityRecord {
            id: Uuid::new_v4().to_string(),
            entity_name: entity_name.to_string(),
            data: body,
            created_at: now,
            updated_at: now,
        };
        self.persist(&record)?;
        debug!(target: "appbase::storage", "create: entity='{}' id='{}'", entity_name, record.id);
        Ok(record)
    }

    /// Insert N records independently, preserving input order.
    ///
    /// Each item is committed on its own; a failure on item i does not roll
    /// back earlier items. The caller receives the successfully created
    /// records in input order.
    pub fn bulk_create(
        &self,
        entity_name: &str,
        bodies: Vec<serde_json::Map<String, Value>>,
    ) -> StoreResult<Vec<EntityRecord>> {
        // Validate the name once up front so a bad name fails the whole call
        self.partition_dir(entity_name)?;
        let mut created = Vec::with_capacity(bodies.len());
        for body in bodies {
            match self.create(entity_name, body) {
                Ok(rec) => created.push(rec),
                Err(e) => {
                    tracing::warn!(target: "appbase::storage", "bulk_create: item failed for entity '{}': {}", entity_name, e);
                }
            }
        }
        Ok(created)
    }

    /// Full-document replace of `data`. Bumps `updated_at`, preserves
    /// `created_at` and the id. A missing row is NotFound, never a no-op.
    pub fn update(
        &self,
        entity_name: &str,
        id: &str,
        body: serde_json::Map<String, Value>,
    ) -> StoreResult<EntityRecord> {
        let mut record = self.get(entity_name, id)?;
        record.data = body;
        record.updated_at = Utc::now();
        self.persist(&record)?;
        debug!(target: "appbase::storage", "update: entity='{}' id='{}'", entity_name, id);
        Ok(record)
    }

    /// Remove a record. NotFound when no row matched.
    pub fn delete(&self, entity_name: &str, id: &str) -> StoreResult<()> {
        let path = self.record_path(entity_name, id)?;
        if !path.exists() {
            return Err(StoreError::NotFound { entity_name: entity_name.into(), id: id.into() });
        }
        fs::remove_file(&path)?;
        debug!(target: "appbase::storage", "delete: entity='{}' id='{}'", entity_name, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn body(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn create_get_roundtrip() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let rec = store.create("Section", body(&[("name", json!("Intro"))])).unwrap();
        let got = store.get("Section", &rec.id).unwrap();
        assert_eq!(got.id, rec.id);
        assert_eq!(got.data_str("name"), Some("Intro"));
        assert!(got.updated_at >= got.created_at);
    }

    #[test]
    fn get_missing_is_not_found() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let err = store.get("Section", "missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn update_missing_is_not_found_not_noop() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let err = store.update("Section", "missing", body(&[("x", json!(1))])).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn update_replaces_whole_document() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let rec = store
            .create("Section", body(&[("name", json!("Intro")), ("order", json!(1))]))
            .unwrap();
        let updated = store.update("Section", &rec.id, body(&[("name", json!("Outro"))])).unwrap();
        assert_eq!(updated.data_str("name"), Some("Outro"));
        // Full replace, not a patch: the old field is gone
        assert!(updated.data.get("order").is_none());
        assert_eq!(updated.created_at, rec.created_at);
        assert!(updated.updated_at >= rec.updated_at);
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let rec = store.create("Section", body(&[])).unwrap();
        store.delete("Section", &rec.id).unwrap();
        assert!(matches!(store.get("Section", &rec.id), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.delete("Section", &rec.id), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn list_filters_are_anded_exact_matches() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        store.create("Doc", body(&[("kind", json!("a")), ("n", json!(1))])).unwrap();
        store.create("Doc", body(&[("kind", json!("a")), ("n", json!(2))])).unwrap();
        store.create("Doc", body(&[("kind", json!("b")), ("n", json!(1))])).unwrap();

        let filters = body(&[("kind", json!("a")), ("n", json!("1"))]);
        let out = store.list("Doc", &filters, None, None).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data_str("kind"), Some("a"));
    }

    #[test]
    fn list_sort_descending_with_limit() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        for n in [3, 1, 2] {
            store.create("Doc", body(&[("n", json!(n))])).unwrap();
        }
        let out = store.list("Doc", &serde_json::Map::new(), Some("-n"), Some(2)).unwrap();
        let ns: Vec<i64> = out.iter().map(|r| r.data["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![3, 2]);
    }

    #[test]
    fn list_baseline_orders_by_created_at_then_id() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let created: Vec<_> = (0..6).map(|i| store.create("Doc", body(&[("i", json!(i))])).unwrap()).collect();

        let out = store.list("Doc", &serde_json::Map::new(), None, None).unwrap();
        let got: Vec<(DateTime<Utc>, String)> =
            out.iter().map(|r| (r.created_at, r.id.clone())).collect();
        let mut expected: Vec<(DateTime<Utc>, String)> =
            created.iter().map(|r| (r.created_at, r.id.clone())).collect();
        expected.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn list_missing_partition_is_empty() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let out = store.list("Nothing", &serde_json::Map::new(), None, None).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn bulk_create_assigns_fresh_ids_in_input_order() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let bodies: Vec<_> = (0..5).map(|i| body(&[("i", json!(i))])).collect();
        let out = store.bulk_create("Doc", bodies).unwrap();
        assert_eq!(out.len(), 5);
        for (i, rec) in out.iter().enumerate() {
            assert_eq!(rec.data["i"].as_i64().unwrap(), i as i64);
        }
        let mut ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn entity_name_with_separator_is_rejected() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let err = store.create("../escape", serde_json::Map::new()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntityName(_)));
        let err = store.list("a/b", &serde_json::Map::new(), None, None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntityName(_)));
    }

    #[test]
    fn find_by_field_returns_first_match() {
        let tmp = tempdir().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        store.create("User", body(&[("username", json!("alice"))])).unwrap();
        let found = store.find_by_field("User", "username", "alice").unwrap();
        assert!(found.is_some());
        assert!(store.find_by_field("User", "username", "bob").unwrap().is_none());
    }
}
