use std::path::PathBuf;

use crate::config::StoreConfig;
use crate::db::Database;
use crate::entity::{NoteUpdate, StickyNote};
use crate::error::Result;

/// What a command found. Missing notes are not store errors, but the CLI
/// still reports them with a failing exit status.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    NotFound(String),
}

/// Environment defaults overridden by command line flags.
pub fn resolve_config(data_dir: Option<PathBuf>, name: Option<String>) -> StoreConfig {
    let mut config = StoreConfig::from_env();
    if let Some(dir) = data_dir {
        config = StoreConfig {
            name: config.name,
            ..StoreConfig::in_dir(dir)
        };
    }
    if let Some(name) = name {
        config.name = name;
    }
    config
}

fn print_note(note: &StickyNote) {
    println!(
        "{} [{}] at ({}, {}), {} by {}",
        note.id,
        note.note_type,
        note.position.x,
        note.position.y,
        note.style.width,
        note.style.height
    );
    if !note.data.content.is_empty() {
        for line in note.data.content.lines() {
            println!("    {}", line);
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_add(
    db: &Database,
    content: String,
    note_type: String,
    id: Option<String>,
    x: f64,
    y: f64,
    width: String,
    height: String,
    json: bool,
) -> Result<Outcome> {
    let note = match id {
        Some(id) => StickyNote::with_id(id, note_type),
        None => StickyNote::new(note_type),
    }
    .at(x, y)
    .content(content)
    .size(width, height);

    db.notes().add(&note).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&note)?);
    } else {
        println!("Created note {} [{}]", note.id, note.note_type);
    }
    Ok(Outcome::Done)
}

pub async fn handle_get(db: &Database, id: String, json: bool) -> Result<Outcome> {
    let Some(note) = db.notes().get(&id).await? else {
        return Ok(Outcome::NotFound(id));
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&note)?);
    } else {
        print_note(&note);
    }
    Ok(Outcome::Done)
}

pub async fn handle_list(db: &Database, note_type: Option<String>, json: bool) -> Result<Outcome> {
    let notes = match &note_type {
        Some(t) => db.notes().query_by_type(t).await?,
        None => db.notes().to_vec().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&notes)?);
    } else if notes.is_empty() {
        println!("No notes found.");
    } else {
        for note in &notes {
            print_note(note);
        }
    }
    Ok(Outcome::Done)
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_update(
    db: &Database,
    id: String,
    note_type: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
    content: Option<String>,
    width: Option<String>,
    height: Option<String>,
    json: bool,
) -> Result<Outcome> {
    let update = NoteUpdate {
        note_type,
        x,
        y,
        content,
        width,
        height,
    };
    if update.is_empty() {
        eprintln!("Warning: nothing to update");
    }

    let notes = db.notes();
    if !notes.update(&id, |note| update.apply(note)).await? {
        return Ok(Outcome::NotFound(id));
    }

    if json {
        if let Some(note) = notes.get(&id).await? {
            println!("{}", serde_json::to_string_pretty(&note)?);
        }
    } else {
        println!("Updated note {}", id);
    }
    Ok(Outcome::Done)
}

pub async fn handle_delete(db: &Database, id: String) -> Result<Outcome> {
    db.notes().delete(&id).await?;
    println!("Deleted note {}", id);
    Ok(Outcome::Done)
}

pub async fn handle_count(db: &Database, note_type: Option<String>) -> Result<Outcome> {
    let count = match &note_type {
        Some(t) => db.notes().query_by_type(t).await?.len() as u64,
        None => db.notes().count().await?,
    };
    println!("{}", count);
    Ok(Outcome::Done)
}

pub fn handle_schema(db: &Database, json: bool) -> Result<Outcome> {
    let schema = db.schema();
    if json {
        let tables: Vec<_> = schema.tables().into_values().collect();
        let doc = serde_json::json!({
            "name": db.config().name,
            "version": schema.declared_version(),
            "tables": tables,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        println!("{} (version {})", db.config().name, schema.declared_version());
        for table in schema.tables().values() {
            println!("  {}: \"{}\"", table.name, table.spec());
        }
    }
    Ok(Outcome::Done)
}
