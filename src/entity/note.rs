// src/entity/note.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Entity;
use crate::error::{Result, StoreError};
use crate::schema::NOTES_TABLE;

/// On-canvas placement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteData {
    pub content: String,
}

/// Rendered size as CSS lengths, e.g. `"200px"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteStyle {
    pub width: String,
    pub height: String,
}

impl Default for NoteStyle {
    fn default() -> Self {
        Self {
            width: "200px".to_string(),
            height: "200px".to_string(),
        }
    }
}

/// A sticky note as stored in the `notes` table.
///
/// `note_type` serializes as `type` and is a freeform tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickyNote {
    pub id: String,
    #[serde(rename = "type")]
    pub note_type: String,
    pub position: Position,
    pub data: NoteData,
    pub style: NoteStyle,
}

impl Entity for StickyNote {
    const TABLE: &'static str = NOTES_TABLE;

    /// JSON has no NaN or infinity; serde_json would store them as `null`.
    fn validate(&self) -> Result<()> {
        let Position { x, y } = self.position;
        if !x.is_finite() || !y.is_finite() {
            return Err(StoreError::Constraint(format!(
                "note '{}': position ({}, {}) is not finite",
                self.id, x, y
            )));
        }
        Ok(())
    }
}

impl StickyNote {
    /// New note of the given type with a fresh UUID.
    pub fn new(note_type: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), note_type)
    }

    pub fn with_id(id: impl Into<String>, note_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            note_type: note_type.into(),
            position: Position::default(),
            data: NoteData::default(),
            style: NoteStyle::default(),
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.data.content = content.into();
        self
    }

    pub fn size(mut self, width: impl Into<String>, height: impl Into<String>) -> Self {
        self.style = NoteStyle {
            width: width.into(),
            height: height.into(),
        };
        self
    }
}

/// Field changes applied by an update-by-id. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub note_type: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub content: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
}

impl NoteUpdate {
    pub fn is_empty(&self) -> bool {
        self.note_type.is_none()
            && self.x.is_none()
            && self.y.is_none()
            && self.content.is_none()
            && self.width.is_none()
            && self.height.is_none()
    }

    pub fn apply(self, note: &mut StickyNote) {
        if let Some(note_type) = self.note_type {
            note.note_type = note_type;
        }
        if let Some(x) = self.x {
            note.position.x = x;
        }
        if let Some(y) = self.y {
            note.position.y = y;
        }
        if let Some(content) = self.content {
            note.data.content = content;
        }
        if let Some(width) = self.width {
            note.style.width = width;
        }
        if let Some(height) = self.height {
            note.style.height = height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let note = StickyNote::with_id("n1", "sticky")
            .at(10.0, 20.0)
            .content("hello")
            .size("200px", "150px");

        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "n1",
                "type": "sticky",
                "position": { "x": 10.0, "y": 20.0 },
                "data": { "content": "hello" },
                "style": { "width": "200px", "height": "150px" }
            })
        );
    }

    #[test]
    fn test_validate_requires_finite_position() {
        assert!(StickyNote::with_id("n1", "sticky").at(-5.0, 1e9).validate().is_ok());

        let err = StickyNote::with_id("n1", "sticky")
            .at(f64::NAN, 0.0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(StickyNote::with_id("n1", "sticky")
            .at(0.0, f64::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn test_reads_integer_coordinates() {
        let json = r#"{"id":"n2","type":"todo","position":{"x":3,"y":-4},
                      "data":{"content":""},"style":{"width":"1em","height":"2em"}}"#;
        let note: StickyNote = serde_json::from_str(json).unwrap();
        assert_eq!(note.position, Position { x: 3.0, y: -4.0 });
        assert_eq!(note.note_type, "todo");
    }

    #[test]
    fn test_new_generates_distinct_ids() {
        let a = StickyNote::new("sticky");
        let b = StickyNote::new("sticky");
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_update_applies_only_set_fields() {
        let mut note = StickyNote::with_id("n1", "sticky").at(1.0, 2.0).content("old");
        let update = NoteUpdate {
            y: Some(5.0),
            content: Some("new".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
        update.apply(&mut note);

        assert_eq!(note.position, Position { x: 1.0, y: 5.0 });
        assert_eq!(note.data.content, "new");
        assert_eq!(note.note_type, "sticky");
        assert_eq!(note.style, NoteStyle::default());
        assert!(NoteUpdate::default().is_empty());
    }
}
