use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "stickynotes")]
#[command(version, about = "A durable local store for sticky notes")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the store (defaults to $STICKYNOTES_DATA_DIR or .stickynotes)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Store name (defaults to $STICKYNOTES_DB_NAME or StickyNotesDB)
    #[arg(long, global = true)]
    pub name: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new note
    Add {
        /// Note body
        content: String,

        /// Freeform note type
        #[arg(long = "type", short = 't', default_value = "sticky")]
        note_type: String,

        /// Use this id instead of a generated UUID
        #[arg(long)]
        id: Option<String>,

        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        x: f64,

        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        y: f64,

        #[arg(long, default_value = "200px")]
        width: String,

        #[arg(long, default_value = "200px")]
        height: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one note
    Get {
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List notes, optionally only one type
    List {
        #[arg(long = "type", short = 't')]
        note_type: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change fields of an existing note
    Update {
        id: String,

        #[arg(long = "type", short = 't')]
        note_type: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        x: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        y: Option<f64>,

        #[arg(long)]
        content: Option<String>,

        #[arg(long)]
        width: Option<String>,

        #[arg(long)]
        height: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a note (no error if it does not exist)
    Delete { id: String },

    /// Count notes, optionally only one type
    Count {
        #[arg(long = "type", short = 't')]
        note_type: Option<String>,
    },

    /// Print the declared schema
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
