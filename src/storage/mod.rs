mod keypath;
mod sqlite_backend;

pub use keypath::{index_keys, primary_key, resolve, IndexKey};
pub use sqlite_backend::{SqliteBackend, UpgradeContext};
