use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open store at {location}: {reason}")]
    Initialization { location: String, reason: String },

    #[error("Store is at schema version {stored}, newer than declared version {declared}")]
    VersionMismatch { stored: u32, declared: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Table not declared in schema: {0}")]
    UnknownTable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// True for failures raised while opening the store rather than by a single operation.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            StoreError::Initialization { .. }
                | StoreError::VersionMismatch { .. }
                | StoreError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
