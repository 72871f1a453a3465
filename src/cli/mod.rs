mod commands;
mod handlers;

pub use commands::{Cli, Commands};
pub use handlers::{
    handle_add, handle_count, handle_delete, handle_get, handle_list, handle_schema,
    handle_update, resolve_config, Outcome,
};
