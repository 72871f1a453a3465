pub mod cli;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod schema;
pub mod storage;

pub use config::{StoreConfig, StoreLocation};
pub use db::{Database, EntityTable};
pub use entity::{Entity, NoteUpdate, StickyNote};
pub use error::{Result, StoreError};
pub use schema::{sticky_notes_schema, Schema};
pub use storage::IndexKey;
