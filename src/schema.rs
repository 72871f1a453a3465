//! Declarative store layout.
//!
//! A [`Schema`] is an ordered list of [`SchemaVersion`]s. Each version names
//! the tables it (re)declares with a compact store spec such as `"id, type"`:
//! the first entry is the primary key path, every further entry a secondary
//! index, `&` marking a unique one. Tables declared by an older version are
//! carried into newer versions unless redeclared.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::storage::UpgradeContext;

/// Table holding sticky notes.
pub const NOTES_TABLE: &str = "notes";
/// Holds the stored schema version; never available as a user table.
pub(crate) const META_TABLE: &str = "meta";

/// Runs inside the upgrade transaction after a version's tables are in place.
pub type UpgradeFn = fn(&UpgradeContext<'_>) -> Result<()>;

/// A secondary index over a key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub key_path: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            unique: false,
        }
    }

    pub fn unique(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
            unique: true,
        }
    }

    /// Name of the column carrying this index's keys.
    pub fn column(&self) -> String {
        format!("idx_{}", self.key_path.replace('.', "__"))
    }
}

/// One table: a name, a primary key path and its indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: String,
    pub indexes: Vec<IndexSpec>,
}

impl TableSchema {
    /// Parse a store spec like `"id, type, &slug"`.
    pub fn parse(name: &str, spec: &str) -> Result<Self> {
        let mut entries = spec.split(',').map(str::trim);

        let primary_key = entries.next().unwrap_or_default();
        if primary_key.is_empty() {
            return Err(StoreError::Schema(format!(
                "table '{}' has no primary key",
                name
            )));
        }
        if primary_key.starts_with("++") {
            return Err(StoreError::Schema(format!(
                "table '{}': auto-increment keys are not supported",
                name
            )));
        }
        if primary_key.starts_with('&') {
            return Err(StoreError::Schema(format!(
                "table '{}': primary key is unique already, drop the '&'",
                name
            )));
        }

        let mut indexes = Vec::new();
        for entry in entries {
            if entry.is_empty() {
                return Err(StoreError::Schema(format!(
                    "table '{}' has an empty index entry",
                    name
                )));
            }
            let index = match entry.strip_prefix('&') {
                Some(path) => IndexSpec::unique(path.trim()),
                None => IndexSpec::new(entry),
            };
            indexes.push(index);
        }

        let table = Self {
            name: name.to_string(),
            primary_key: primary_key.to_string(),
            indexes,
        };
        table.validate()?;
        Ok(table)
    }

    /// Look up a declared index by key path.
    pub fn index(&self, key_path: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.key_path == key_path)
    }

    /// Render back to store-spec syntax.
    pub fn spec(&self) -> String {
        let mut parts = vec![self.primary_key.clone()];
        for index in &self.indexes {
            if index.unique {
                parts.push(format!("&{}", index.key_path));
            } else {
                parts.push(index.key_path.clone());
            }
        }
        parts.join(", ")
    }

    fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(StoreError::Schema(format!(
                "invalid table name '{}'",
                self.name
            )));
        }
        if self.name.starts_with('_')
            || self.name.eq_ignore_ascii_case(META_TABLE)
            || self.name.to_ascii_lowercase().starts_with("sqlite_")
        {
            return Err(StoreError::Schema(format!(
                "table name '{}' is reserved",
                self.name
            )));
        }
        if !is_key_path(&self.primary_key) {
            return Err(StoreError::Schema(format!(
                "table '{}': invalid primary key path '{}'",
                self.name, self.primary_key
            )));
        }
        for (i, index) in self.indexes.iter().enumerate() {
            if !is_key_path(&index.key_path) {
                return Err(StoreError::Schema(format!(
                    "table '{}': invalid index path '{}'",
                    self.name, index.key_path
                )));
            }
            if index.key_path == self.primary_key {
                return Err(StoreError::Schema(format!(
                    "table '{}': '{}' is already the primary key",
                    self.name, index.key_path
                )));
            }
            if self.indexes[..i].iter().any(|o| o.key_path == index.key_path) {
                return Err(StoreError::Schema(format!(
                    "table '{}': duplicate index '{}'",
                    self.name, index.key_path
                )));
            }
            // Columns are flattened key paths, and SQLite compares them case-insensitively.
            if let Some(other) = self.indexes[..i]
                .iter()
                .find(|o| o.column().eq_ignore_ascii_case(&index.column()))
            {
                return Err(StoreError::Schema(format!(
                    "table '{}': indexes '{}' and '{}' map to the same column",
                    self.name, other.key_path, index.key_path
                )));
            }
        }
        Ok(())
    }
}

/// Tables declared (or redeclared) at one version number.
#[derive(Clone)]
pub struct SchemaVersion {
    pub version: u32,
    pub tables: Vec<TableSchema>,
    pub upgrade: Option<UpgradeFn>,
}

impl std::fmt::Debug for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaVersion")
            .field("version", &self.version)
            .field("tables", &self.tables)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// The ordered version history of a store.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    versions: Vec<SchemaVersion>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a version from `(table, spec)` pairs.
    pub fn version(mut self, version: u32, stores: &[(&str, &str)]) -> Result<Self> {
        let tables = stores
            .iter()
            .map(|(name, spec)| TableSchema::parse(name, spec))
            .collect::<Result<Vec<_>>>()?;
        self.versions.push(SchemaVersion {
            version,
            tables,
            upgrade: None,
        });
        self.validate()?;
        Ok(self)
    }

    /// Attach an upgrade step to the most recently declared version.
    pub fn upgrade(mut self, step: UpgradeFn) -> Result<Self> {
        match self.versions.last_mut() {
            Some(last) => {
                last.upgrade = Some(step);
                Ok(self)
            }
            None => Err(StoreError::Schema(
                "upgrade step declared before any version".to_string(),
            )),
        }
    }

    pub fn versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    /// Highest declared version, 0 when nothing is declared.
    pub fn declared_version(&self) -> u32 {
        self.versions.last().map(|v| v.version).unwrap_or(0)
    }

    /// Effective table layout as of `version`.
    pub fn tables_at(&self, version: u32) -> BTreeMap<String, TableSchema> {
        let mut tables = BTreeMap::new();
        for declared in self.versions.iter().take_while(|v| v.version <= version) {
            for table in &declared.tables {
                tables.insert(table.name.clone(), table.clone());
            }
        }
        tables
    }

    /// Effective table layout at the declared version.
    pub fn tables(&self) -> BTreeMap<String, TableSchema> {
        self.tables_at(self.declared_version())
    }

    pub fn table(&self, name: &str) -> Option<TableSchema> {
        self.tables().remove(name)
    }

    /// Check version ordering and that no redeclaration changes a primary key.
    pub fn validate(&self) -> Result<()> {
        let mut previous = 0;
        let mut primary_keys: BTreeMap<&str, &str> = BTreeMap::new();
        for declared in &self.versions {
            if declared.version == 0 {
                return Err(StoreError::Schema("versions start at 1".to_string()));
            }
            if declared.version <= previous {
                return Err(StoreError::Schema(format!(
                    "version {} declared after version {}",
                    declared.version, previous
                )));
            }
            previous = declared.version;

            for (i, table) in declared.tables.iter().enumerate() {
                if declared.tables[..i].iter().any(|t| t.name == table.name) {
                    return Err(StoreError::Schema(format!(
                        "version {} declares table '{}' twice",
                        declared.version, table.name
                    )));
                }
                if let Some(existing) = primary_keys.insert(table.name.as_str(), table.primary_key.as_str()) {
                    if existing != table.primary_key {
                        return Err(StoreError::Schema(format!(
                            "version {} changes the primary key of '{}' from '{}' to '{}'",
                            declared.version, table.name, existing, table.primary_key
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Version 1: `notes` keyed by `id`, indexed on `type`.
pub fn sticky_notes_schema() -> Schema {
    Schema {
        versions: vec![SchemaVersion {
            version: 1,
            tables: vec![TableSchema {
                name: NOTES_TABLE.to_string(),
                primary_key: "id".to_string(),
                indexes: vec![IndexSpec::new("type")],
            }],
            upgrade: None,
        }],
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_key_path(s: &str) -> bool {
    s.split('.').all(is_identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticky_notes_schema_layout() {
        let schema = sticky_notes_schema();
        schema.validate().unwrap();
        assert_eq!(schema.declared_version(), 1);

        let notes = schema.table("notes").unwrap();
        assert_eq!(notes.primary_key, "id");
        assert_eq!(notes.indexes, vec![IndexSpec::new("type")]);
        assert_eq!(notes.spec(), "id, type");
    }

    #[test]
    fn test_parse_store_spec() {
        let table = TableSchema::parse("notes", " id , type, &slug, position.x").unwrap();
        assert_eq!(table.primary_key, "id");
        assert_eq!(table.indexes.len(), 3);
        assert!(!table.index("type").unwrap().unique);
        assert!(table.index("slug").unwrap().unique);
        assert_eq!(table.index("position.x").unwrap().column(), "idx_position__x");
        assert_eq!(table.spec(), "id, type, &slug, position.x");
    }

    #[test]
    fn test_parse_matches_declared_schema() {
        let parsed = Schema::new().version(1, &[("notes", "id, type")]).unwrap();
        assert_eq!(parsed.tables(), sticky_notes_schema().tables());
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        assert!(TableSchema::parse("notes", "").is_err());
        assert!(TableSchema::parse("notes", "++id").is_err());
        assert!(TableSchema::parse("notes", "&id").is_err());
        assert!(TableSchema::parse("notes", "id,,type").is_err());
        assert!(TableSchema::parse("notes", "id, type, type").is_err());
        assert!(TableSchema::parse("notes", "id, id").is_err());
        assert!(TableSchema::parse("no tes", "id").is_err());
        assert!(TableSchema::parse("_meta", "key").is_err());
        assert!(TableSchema::parse("meta", "key").is_err());
        assert!(TableSchema::parse("Meta", "key").is_err());
        assert!(TableSchema::parse("notes", "id; DROP TABLE x").is_err());
    }

    #[test]
    fn test_indexes_must_not_share_a_column() {
        let err = TableSchema::parse("t", "id, a__b, a.b").unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
        assert!(TableSchema::parse("t", "id, type, Type").is_err());
        assert!(TableSchema::parse("t", "id, a.b, a.c").is_ok());
    }

    #[test]
    fn test_versions_must_increase() {
        let result = Schema::new()
            .version(2, &[("notes", "id")])
            .and_then(|s| s.version(1, &[("notes", "id")]));
        assert!(matches!(result, Err(StoreError::Schema(_))));

        assert!(Schema::new().version(0, &[("notes", "id")]).is_err());
    }

    #[test]
    fn test_primary_key_cannot_change() {
        let result = Schema::new()
            .version(1, &[("notes", "id, type")])
            .and_then(|s| s.version(2, &[("notes", "uuid, type")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_tables_carry_forward() {
        let schema = Schema::new()
            .version(1, &[("notes", "id, type")])
            .and_then(|s| s.version(2, &[("boards", "id")]))
            .and_then(|s| s.version(3, &[("notes", "id, type, data.content")]))
            .unwrap();

        let v1 = schema.tables_at(1);
        assert_eq!(v1.len(), 1);

        let v2 = schema.tables_at(2);
        assert_eq!(v2.len(), 2);
        assert_eq!(v2["notes"].indexes.len(), 1);

        let v3 = schema.tables();
        assert_eq!(v3["notes"].indexes.len(), 2);
        assert!(v3.contains_key("boards"));
    }

    #[test]
    fn test_upgrade_requires_a_version() {
        fn noop(_: &UpgradeContext<'_>) -> Result<()> {
            Ok(())
        }
        assert!(Schema::new().upgrade(noop).is_err());

        let schema = sticky_notes_schema().upgrade(noop).unwrap();
        assert!(schema.versions()[0].upgrade.is_some());
    }
}
