//! Shared store handle and typed table access.
//!
//! A [`Database`] is created from a configuration and a schema and passed to
//! whoever needs it. The backing store opens lazily on first use; clones
//! share the same opened store.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::warn;

use crate::config::StoreConfig;
use crate::entity::{Entity, StickyNote};
use crate::error::Result;
use crate::schema::{sticky_notes_schema, Schema};
use crate::storage::{IndexKey, SqliteBackend};

struct Inner {
    config: StoreConfig,
    schema: Schema,
    backend: OnceCell<Mutex<SqliteBackend>>,
}

/// Handle to one named store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    pub fn new(config: StoreConfig, schema: Schema) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                schema,
                backend: OnceCell::new(),
            }),
        }
    }

    /// The sticky notes store at its current schema.
    pub fn sticky_notes(config: StoreConfig) -> Self {
        Self::new(config, sticky_notes_schema())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn is_open(&self) -> bool {
        self.inner.backend.initialized()
    }

    /// Open the backing store if it is not open yet.
    ///
    /// Repeated calls return immediately. A failed open is not remembered, so
    /// the next call tries again.
    pub async fn open(&self) -> Result<()> {
        self.backend().await.map(|_| ())
    }

    /// Schema version of the opened store.
    pub async fn version(&self) -> Result<u32> {
        Ok(self.backend().await?.version())
    }

    pub fn table<T: Entity>(&self) -> EntityTable<T> {
        EntityTable {
            db: self.clone(),
            _entity: PhantomData,
        }
    }

    pub fn notes(&self) -> EntityTable<StickyNote> {
        self.table()
    }

    pub(crate) async fn backend(&self) -> Result<MutexGuard<'_, SqliteBackend>> {
        let inner = &self.inner;
        let cell = inner
            .backend
            .get_or_try_init(|| async {
                SqliteBackend::open(&inner.config, &inner.schema)
                    .map(Mutex::new)
                    .map_err(|e| {
                        warn!("Could not open {}: {}", inner.config.describe(), e);
                        e
                    })
            })
            .await?;
        Ok(cell.lock().await)
    }
}

/// Async CRUD access to the table bound to `T`.
///
/// Each call runs to completion while holding the store lock, so a dropped
/// future never leaves a half-applied write behind.
pub struct EntityTable<T> {
    db: Database,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityTable<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntityTable<T> {
    pub fn name(&self) -> &'static str {
        T::TABLE
    }

    /// Insert or overwrite by primary key. Returns the key.
    pub async fn put(&self, record: &T) -> Result<String> {
        let value = encode(record)?;
        self.db.backend().await?.put(T::TABLE, &value)
    }

    /// Insert a record whose key is not taken yet.
    pub async fn add(&self, record: &T) -> Result<String> {
        let value = encode(record)?;
        self.db.backend().await?.add(T::TABLE, &value)
    }

    /// `None` when no record has `key`.
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let found = self.db.backend().await?.get(T::TABLE, key)?;
        found
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Modify the record with `key` in place. Returns `false` when absent.
    pub async fn update<F>(&self, key: &str, modify: F) -> Result<bool>
    where
        F: FnOnce(&mut T),
    {
        self.db.backend().await?.update(T::TABLE, key, |value| {
            let mut record: T = serde_json::from_value(value.take())?;
            modify(&mut record);
            *value = encode(&record)?;
            Ok(())
        })
    }

    /// Remove the record if present. Deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.db.backend().await?.delete(T::TABLE, key)?;
        Ok(())
    }

    /// Records whose indexed `key_path` equals `key`.
    pub async fn where_equals(&self, key_path: &str, key: impl Into<IndexKey>) -> Result<Vec<T>> {
        let rows = self
            .db
            .backend()
            .await?
            .query_index(T::TABLE, key_path, &key.into())?;
        decode_all(rows)
    }

    pub async fn to_vec(&self) -> Result<Vec<T>> {
        let rows = self.db.backend().await?.all(T::TABLE)?;
        decode_all(rows)
    }

    pub async fn count(&self) -> Result<u64> {
        self.db.backend().await?.count(T::TABLE)
    }

    pub async fn clear(&self) -> Result<()> {
        self.db.backend().await?.clear(T::TABLE)
    }

    /// Put all records in one transaction.
    pub async fn bulk_put(&self, records: &[T]) -> Result<Vec<String>> {
        let values = records.iter().map(encode).collect::<Result<Vec<_>>>()?;
        self.db.backend().await?.bulk_put(T::TABLE, &values)
    }

    pub async fn bulk_delete(&self, keys: &[&str]) -> Result<()> {
        self.db.backend().await?.bulk_delete(T::TABLE, keys)
    }
}

fn encode<T: Entity>(record: &T) -> Result<serde_json::Value> {
    record.validate()?;
    Ok(serde_json::to_value(record)?)
}

impl EntityTable<StickyNote> {
    /// Notes tagged with `note_type`, looked up through the `type` index.
    pub async fn query_by_type(&self, note_type: &str) -> Result<Vec<StickyNote>> {
        self.where_equals("type", note_type).await
    }
}

fn decode_all<T: Entity>(rows: Vec<serde_json::Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NoteUpdate;
    use crate::error::StoreError;
    use tempfile::TempDir;

    fn scenario_note() -> StickyNote {
        StickyNote::with_id("n1", "sticky")
            .at(10.0, 20.0)
            .content("hello")
            .size("200px", "150px")
    }

    #[tokio::test]
    async fn test_open_is_lazy_and_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db = Database::sticky_notes(StoreConfig::in_dir(tmp.path()));
        assert!(!db.is_open());
        assert!(!tmp.path().join("StickyNotesDB.sqlite3").exists());

        db.open().await.unwrap();
        db.open().await.unwrap();
        assert!(db.is_open());
        assert_eq!(db.version().await.unwrap(), 1);

        let clone = db.clone();
        clone.notes().put(&scenario_note()).await.unwrap();
        assert!(db.notes().get("n1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_first_operation_opens_store() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        assert_eq!(db.notes().count().await.unwrap(), 0);
        assert!(db.is_open());
    }

    #[tokio::test]
    async fn test_scenario() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        let note = scenario_note();

        notes.put(&note).await.unwrap();
        assert_eq!(notes.get("n1").await.unwrap(), Some(note.clone()));

        let sticky = notes.query_by_type("sticky").await.unwrap();
        assert!(sticky.iter().any(|n| n.id == "n1"));

        notes.delete("n1").await.unwrap();
        assert_eq!(notes.get("n1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();

        notes.put(&scenario_note()).await.unwrap();
        let _ = notes.get("n1").await.unwrap();
        let replacement = scenario_note().content("second").at(1.0, 1.0);
        notes.put(&replacement).await.unwrap();

        assert_eq!(notes.get("n1").await.unwrap(), Some(replacement));
        assert_eq!(notes.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        notes.put(&scenario_note()).await.unwrap();

        notes.delete("missing").await.unwrap();
        assert_eq!(notes.to_vec().await.unwrap(), vec![scenario_note()]);
    }

    #[tokio::test]
    async fn test_query_by_type_returns_exact_subset() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();

        let types = ["todo", "sticky", "idea", "sticky", "todo", "sticky"];
        for (i, t) in types.iter().enumerate().rev() {
            notes
                .put(&StickyNote::with_id(format!("n{}", i), *t))
                .await
                .unwrap();
        }

        for t in ["todo", "sticky", "idea", "missing"] {
            let mut ids: Vec<String> = notes
                .query_by_type(t)
                .await
                .unwrap()
                .into_iter()
                .map(|n| n.id)
                .collect();
            ids.sort();
            let mut expected: Vec<String> = types
                .iter()
                .enumerate()
                .filter(|(_, ty)| **ty == t)
                .map(|(i, _)| format!("n{}", i))
                .collect();
            expected.sort();
            assert_eq!(ids, expected, "type {}", t);
        }
    }

    #[tokio::test]
    async fn test_update_by_id() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        notes.put(&scenario_note()).await.unwrap();

        let update = NoteUpdate {
            note_type: Some("todo".to_string()),
            x: Some(42.0),
            ..Default::default()
        };
        assert!(notes.update("n1", |n| update.apply(n)).await.unwrap());

        let stored = notes.get("n1").await.unwrap().unwrap();
        assert_eq!(stored.note_type, "todo");
        assert_eq!(stored.position.x, 42.0);
        assert_eq!(stored.data.content, "hello");
        assert!(notes.query_by_type("sticky").await.unwrap().is_empty());

        assert!(!notes.update("absent", |_| {}).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_cannot_change_id() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        notes.put(&scenario_note()).await.unwrap();

        let err = notes
            .update("n1", |n| n.id = "other".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(notes.get("n1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_id_is_rejected() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let err = db
            .notes()
            .put(&StickyNote::with_id("", "sticky"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_non_finite_position_is_rejected() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        notes.put(&scenario_note()).await.unwrap();

        for bad in [
            StickyNote::with_id("nan", "sticky").at(f64::NAN, 0.0),
            StickyNote::with_id("inf", "sticky").at(0.0, f64::INFINITY),
        ] {
            let err = notes.put(&bad).await.unwrap_err();
            assert!(matches!(err, StoreError::Constraint(_)));
            let err = notes.add(&bad).await.unwrap_err();
            assert!(matches!(err, StoreError::Constraint(_)));
        }

        // Nothing unreadable was stored, so reads over the table still work
        assert_eq!(notes.query_by_type("sticky").await.unwrap(), vec![scenario_note()]);
        assert_eq!(notes.to_vec().await.unwrap().len(), 1);
        assert!(notes.get("nan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_to_non_finite_position_keeps_record() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        notes.put(&scenario_note()).await.unwrap();

        let err = notes
            .update("n1", |n| n.position.x = f64::NAN)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(notes.get("n1").await.unwrap(), Some(scenario_note()));
    }

    #[tokio::test]
    async fn test_bulk_put_with_non_finite_position_writes_nothing() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        let batch = vec![
            StickyNote::with_id("b0", "sticky"),
            StickyNote::with_id("b1", "sticky").at(f64::NEG_INFINITY, 1.0),
        ];

        let err = notes.bulk_put(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(notes.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_then_add_again_fails() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        notes.add(&scenario_note()).await.unwrap();
        let err = notes.add(&scenario_note()).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_bulk_operations_and_clear() {
        let db = Database::sticky_notes(StoreConfig::in_memory());
        let notes = db.notes();
        let batch: Vec<StickyNote> = (0..5)
            .map(|i| StickyNote::with_id(format!("b{}", i), "sticky"))
            .collect();

        let keys = notes.bulk_put(&batch).await.unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(notes.count().await.unwrap(), 5);

        notes.bulk_delete(&["b0", "b1", "nope"]).await.unwrap();
        assert_eq!(notes.count().await.unwrap(), 3);

        notes.clear().await.unwrap();
        assert_eq!(notes.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Database::sticky_notes(StoreConfig::in_dir(tmp.path()));
            db.notes().put(&scenario_note()).await.unwrap();
        }

        let reopened = Database::sticky_notes(StoreConfig::in_dir(tmp.path()));
        assert_eq!(
            reopened.notes().get("n1").await.unwrap(),
            Some(scenario_note())
        );
        assert_eq!(reopened.notes().query_by_type("sticky").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_surfaces_and_retries() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("occupied");
        std::fs::write(&blocker, b"x").unwrap();

        let db = Database::sticky_notes(StoreConfig::in_dir(&blocker));
        let err = db.notes().get("n1").await.unwrap_err();
        assert!(err.is_initialization());
        assert!(!db.is_open());

        let err = db.open().await.unwrap_err();
        assert!(matches!(err, StoreError::Initialization { .. }));
    }
}
