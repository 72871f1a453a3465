mod note;

pub use note::{NoteData, NoteStyle, NoteUpdate, Position, StickyNote};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A record type bound to one table of the schema.
///
/// Records are stored in their serialized JSON form; the primary key and
/// index keys are read from that form through the table's key paths.
pub trait Entity: Serialize + DeserializeOwned + Send + 'static {
    /// Name of the table holding this entity.
    const TABLE: &'static str;

    /// Reject values that would not read back as the same record.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}
