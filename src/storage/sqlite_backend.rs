use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tracing::{debug, info};

use super::keypath::{index_keys, primary_key, IndexKey};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::schema::{Schema, TableSchema};

const META_SQL: &str = "CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Insert or overwrite by primary key.
    Put,
    /// Insert only; an existing key is a constraint violation.
    Add,
}

/// SQLite-backed record store for a versioned [`Schema`].
///
/// Every table keeps the serialized record in `value`, its primary key in
/// `key`, and one `idx_*` column per secondary index.
pub struct SqliteBackend {
    conn: Connection,
    tables: BTreeMap<String, TableSchema>,
    version: u32,
}

impl SqliteBackend {
    /// Open or create the store described by `config`, bringing it up to the
    /// schema's declared version.
    pub fn open(config: &StoreConfig, schema: &Schema) -> Result<Self> {
        schema.validate()?;
        config.validate()?;
        let location = config.describe();

        let mut conn =
            Self::create_connection(config).map_err(|e| initialization(&location, e))?;

        let stored = Self::apply_schema(&mut conn, schema).map_err(|e| match e {
            StoreError::Storage(_) | StoreError::Io(_) | StoreError::Json(_) => {
                initialization(&location, e)
            }
            other => other,
        })?;

        let version = schema.declared_version();
        if stored < version {
            info!(
                "Upgraded store {} from version {} to {}",
                location, stored, version
            );
        }
        info!("Opened store {} at schema version {}", location, version);

        Ok(Self {
            conn,
            tables: schema.tables(),
            version,
        })
    }

    fn create_connection(config: &StoreConfig) -> Result<Connection> {
        let conn = match config.db_path() {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                Connection::open(&path)?
            }
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        Ok(conn)
    }

    /// Apply every version newer than the stored one. Returns the stored version
    /// found before upgrading.
    fn apply_schema(conn: &mut Connection, schema: &Schema) -> Result<u32> {
        conn.execute(META_SQL, [])?;

        let declared = schema.declared_version();
        let stored = read_schema_version(conn)?;
        if is_current(stored, declared)? {
            return Ok(stored);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Another process may have upgraded while we waited for the write lock.
        let stored = read_schema_version(&tx)?;
        if is_current(stored, declared)? {
            return Ok(stored);
        }
        for version in schema.versions().iter().filter(|v| v.version > stored) {
            let before = schema.tables_at(version.version - 1);
            for table in &version.tables {
                migrate_table(&tx, before.get(&table.name), table)?;
            }
            if let Some(step) = version.upgrade {
                let tables = schema.tables_at(version.version);
                step(&UpgradeContext {
                    conn: &tx,
                    tables: &tables,
                })?;
            }
            debug!("Applied schema version {}", version.version);
        }

        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
            [declared.to_string()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('upgraded_at', ?1)",
            [chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(stored)
    }

    /// Schema version the store is at.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// When the schema was last applied, as stored in the metadata table.
    pub fn upgraded_at(&self) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'upgraded_at'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    pub fn table(&self, name: &str) -> Result<&TableSchema> {
        lookup(&self.tables, name)
    }

    /// Insert or overwrite a record. Returns its key.
    pub fn put(&self, table: &str, record: &Value) -> Result<String> {
        let table = lookup(&self.tables, table)?;
        let key = write_record(&self.conn, table, record, WriteMode::Put)?;
        debug!("put {}/{}", table.name, key);
        Ok(key)
    }

    /// Insert a record whose key must not exist yet.
    pub fn add(&self, table: &str, record: &Value) -> Result<String> {
        let table = lookup(&self.tables, table)?;
        let key = write_record(&self.conn, table, record, WriteMode::Add)?;
        debug!("add {}/{}", table.name, key);
        Ok(key)
    }

    pub fn get(&self, table: &str, key: &str) -> Result<Option<Value>> {
        let table = lookup(&self.tables, table)?;
        read_record(&self.conn, table, key)
    }

    /// Read, modify and write back one record in a single transaction.
    ///
    /// Returns `false` when no record has `key`. The primary key is immutable.
    pub fn update<F>(&mut self, table: &str, key: &str, modify: F) -> Result<bool>
    where
        F: FnOnce(&mut Value) -> Result<()>,
    {
        let table = lookup(&self.tables, table)?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut record) = read_record(&tx, table, key)? else {
            return Ok(false);
        };
        modify(&mut record)?;

        let new_key = primary_key(&record, table)?;
        if new_key != key {
            return Err(StoreError::Constraint(format!(
                "cannot change primary key of {}/{} to '{}'",
                table.name, key, new_key
            )));
        }
        write_record(&tx, table, &record, WriteMode::Put)?;
        tx.commit()?;

        debug!("update {}/{}", table.name, key);
        Ok(true)
    }

    /// Remove a record. Returns whether one was present.
    pub fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let table = lookup(&self.tables, table)?;
        let removed = delete_record(&self.conn, table, key)?;
        debug!("delete {}/{} (present: {})", table.name, key, removed);
        Ok(removed)
    }

    /// Records whose `key_path` equals `key`, in primary key order.
    pub fn query_index(&self, table: &str, key_path: &str, key: &IndexKey) -> Result<Vec<Value>> {
        let table = lookup(&self.tables, table)?;

        if key_path == table.primary_key {
            let found = match key {
                IndexKey::Text(k) => read_record(&self.conn, table, k)?,
                IndexKey::Number(_) => None,
            };
            return Ok(found.into_iter().collect());
        }

        let index = table.index(key_path).ok_or_else(|| {
            StoreError::Schema(format!(
                "'{}' is not indexed on table '{}'",
                key_path, table.name
            ))
        })?;

        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT value FROM \"{}\" WHERE \"{}\" = ?1 ORDER BY key",
            table.name,
            index.column()
        ))?;
        let rows = stmt
            .query_map([key], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|text| serde_json::from_str(text).map_err(StoreError::from))
            .collect()
    }

    /// Every record of a table, in primary key order.
    pub fn all(&self, table: &str) -> Result<Vec<Value>> {
        let table = lookup(&self.tables, table)?;
        read_all(&self.conn, table)
    }

    pub fn count(&self, table: &str) -> Result<u64> {
        let table = lookup(&self.tables, table)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table.name),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn clear(&self, table: &str) -> Result<()> {
        let table = lookup(&self.tables, table)?;
        self.conn
            .execute(&format!("DELETE FROM \"{}\"", table.name), [])?;
        debug!("clear {}", table.name);
        Ok(())
    }

    /// Put several records in one transaction; either all land or none.
    pub fn bulk_put(&mut self, table: &str, records: &[Value]) -> Result<Vec<String>> {
        let table = lookup(&self.tables, table)?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let keys = records
            .iter()
            .map(|record| write_record(&tx, table, record, WriteMode::Put))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;
        debug!("bulk put {} records into {}", keys.len(), table.name);
        Ok(keys)
    }

    /// Delete several keys in one transaction. Absent keys are ignored.
    pub fn bulk_delete(&mut self, table: &str, keys: &[&str]) -> Result<()> {
        let table = lookup(&self.tables, table)?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for key in keys {
            delete_record(&tx, table, key)?;
        }
        tx.commit()?;
        debug!("bulk delete {} keys from {}", keys.len(), table.name);
        Ok(())
    }
}

/// Record access handed to schema upgrade steps.
///
/// All changes happen inside the upgrade transaction; a failing step leaves
/// the store at its previous version.
pub struct UpgradeContext<'a> {
    conn: &'a Connection,
    tables: &'a BTreeMap<String, TableSchema>,
}

impl UpgradeContext<'_> {
    pub fn records(&self, table: &str) -> Result<Vec<Value>> {
        read_all(self.conn, lookup(self.tables, table)?)
    }

    pub fn put(&self, table: &str, record: &Value) -> Result<String> {
        write_record(self.conn, lookup(self.tables, table)?, record, WriteMode::Put)
    }

    pub fn delete(&self, table: &str, key: &str) -> Result<bool> {
        delete_record(self.conn, lookup(self.tables, table)?, key)
    }

    /// Rewrite every record of a table. Returns how many were visited.
    pub fn modify<F>(&self, table: &str, mut f: F) -> Result<usize>
    where
        F: FnMut(&mut Value),
    {
        let table = lookup(self.tables, table)?;
        let records = read_all(self.conn, table)?;
        let visited = records.len();
        for mut record in records {
            let key = primary_key(&record, table)?;
            f(&mut record);
            if primary_key(&record, table)? != key {
                return Err(StoreError::Constraint(format!(
                    "upgrade changed primary key of {}/{}",
                    table.name, key
                )));
            }
            write_record(self.conn, table, &record, WriteMode::Put)?;
        }
        Ok(visited)
    }
}

fn lookup<'t>(tables: &'t BTreeMap<String, TableSchema>, name: &str) -> Result<&'t TableSchema> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
}

fn initialization(location: &str, reason: impl Display) -> StoreError {
    StoreError::Initialization {
        location: location.to_string(),
        reason: reason.to_string(),
    }
}

/// `true` when no upgrade is needed; an error when the store is newer.
fn is_current(stored: u32, declared: u32) -> Result<bool> {
    if stored > declared {
        return Err(StoreError::VersionMismatch { stored, declared });
    }
    Ok(stored == declared)
}

fn read_schema_version(conn: &Connection) -> Result<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| StoreError::Storage(format!("corrupt schema version '{}'", v))),
        None => Ok(0),
    }
}

/// Create a table or bring an existing one to `table`'s index layout.
fn migrate_table(conn: &Connection, previous: Option<&TableSchema>, table: &TableSchema) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
            table.name
        ),
        [],
    )?;

    let columns = table_columns(conn, &table.name)?;
    let mut needs_backfill = false;
    for index in &table.indexes {
        let column = index.column();
        if !columns.contains(&column) {
            conn.execute(
                &format!("ALTER TABLE \"{}\" ADD COLUMN \"{}\"", table.name, column),
                [],
            )?;
        }
        let is_new = previous.and_then(|p| p.index(&index.key_path)).is_none();
        needs_backfill |= is_new;
    }

    if let Some(previous) = previous {
        for old in &previous.indexes {
            if table.index(&old.key_path) == Some(old) {
                continue;
            }
            conn.execute(
                &format!("DROP INDEX IF EXISTS \"{}_{}\"", table.name, old.column()),
                [],
            )?;
            if table.index(&old.key_path).is_none() {
                conn.execute(
                    &format!("UPDATE \"{}\" SET \"{}\" = NULL", table.name, old.column()),
                    [],
                )?;
            }
        }
    }

    if needs_backfill {
        backfill_indexes(conn, table)?;
    }

    for index in &table.indexes {
        conn.execute(
            &format!(
                "CREATE {}INDEX IF NOT EXISTS \"{}_{}\" ON \"{}\"(\"{}\")",
                if index.unique { "UNIQUE " } else { "" },
                table.name,
                index.column(),
                table.name,
                index.column()
            ),
            [],
        )?;
    }

    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Recompute every index column from the stored records.
fn backfill_indexes(conn: &Connection, table: &TableSchema) -> Result<()> {
    if table.indexes.is_empty() {
        return Ok(());
    }

    let records = read_all(conn, table)?;
    let assignments = table
        .indexes
        .iter()
        .enumerate()
        .map(|(i, index)| format!("\"{}\" = ?{}", index.column(), i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE key = ?1",
        table.name, assignments
    );

    for record in &records {
        let mut params = vec![SqlValue::Text(primary_key(record, table)?)];
        params.extend(index_params(record, table));
        conn.execute(&sql, params_from_iter(params.iter()))?;
    }
    debug!("Backfilled {} records in {}", records.len(), table.name);
    Ok(())
}

fn index_params(record: &Value, table: &TableSchema) -> Vec<SqlValue> {
    index_keys(record, table)
        .into_iter()
        .map(|key| key.map(|k| k.to_sql_value()).unwrap_or(SqlValue::Null))
        .collect()
}

fn write_record(conn: &Connection, table: &TableSchema, record: &Value, mode: WriteMode) -> Result<String> {
    if !record.is_object() {
        return Err(StoreError::Constraint(format!(
            "'{}' records must be objects",
            table.name
        )));
    }
    let key = primary_key(record, table)?;

    let mut columns = vec!["key".to_string(), "value".to_string()];
    columns.extend(table.indexes.iter().map(|i| format!("\"{}\"", i.column())));
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table.name,
        columns.join(", "),
        placeholders
    );
    if mode == WriteMode::Put {
        let updates = columns[1..]
            .iter()
            .map(|c| format!("{} = excluded.{}", c, c))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ON CONFLICT(key) DO UPDATE SET {}", updates));
    }

    let mut params = vec![
        SqlValue::Text(key.clone()),
        SqlValue::Text(serde_json::to_string(record)?),
    ];
    params.extend(index_params(record, table));

    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params_from_iter(params.iter()))
        .map_err(|e| constraint_or_storage(e, || match mode {
            WriteMode::Add => format!("key '{}' already exists in '{}' or a unique index clashes", key, table.name),
            WriteMode::Put => format!("record {}/{} clashes with a unique index", table.name, key),
        }))?;

    Ok(key)
}

fn read_record(conn: &Connection, table: &TableSchema, key: &str) -> Result<Option<Value>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT value FROM \"{}\" WHERE key = ?1",
        table.name
    ))?;
    let text: Option<String> = stmt.query_row([key], |row| row.get(0)).optional()?;
    match text {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn read_all(conn: &Connection, table: &TableSchema) -> Result<Vec<Value>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT value FROM \"{}\" ORDER BY key",
        table.name
    ))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|text| serde_json::from_str(text).map_err(StoreError::from))
        .collect()
}

fn delete_record(conn: &Connection, table: &TableSchema, key: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached(&format!("DELETE FROM \"{}\" WHERE key = ?1", table.name))?;
    Ok(stmt.execute([key])? > 0)
}

fn constraint_or_storage(e: rusqlite::Error, describe: impl FnOnce() -> String) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Constraint(describe())
        }
        other => other.into(),
    }
}

// Implement From for rusqlite::Error
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(format!("SQLite error: {}", e))
    }
}
