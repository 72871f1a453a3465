use clap::Parser;
use stickynotes::cli::{
    handle_add, handle_count, handle_delete, handle_get, handle_list, handle_schema,
    handle_update, resolve_config, Cli, Commands, Outcome,
};
use stickynotes::Database;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = Database::sticky_notes(resolve_config(cli.data_dir, cli.name));

    let result = match cli.command {
        Commands::Add {
            content,
            note_type,
            id,
            x,
            y,
            width,
            height,
            json,
        } => handle_add(&db, content, note_type, id, x, y, width, height, json).await,
        Commands::Get { id, json } => handle_get(&db, id, json).await,
        Commands::List { note_type, json } => handle_list(&db, note_type, json).await,
        Commands::Update {
            id,
            note_type,
            x,
            y,
            content,
            width,
            height,
            json,
        } => handle_update(&db, id, note_type, x, y, content, width, height, json).await,
        Commands::Delete { id } => handle_delete(&db, id).await,
        Commands::Count { note_type } => handle_count(&db, note_type).await,
        Commands::Schema { json } => handle_schema(&db, json),
    };

    match result {
        Ok(Outcome::Done) => {}
        Ok(Outcome::NotFound(id)) => {
            eprintln!("Note not found: {}", id);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
