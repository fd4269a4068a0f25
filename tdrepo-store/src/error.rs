use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Document already registered: {0}")]
    DuplicateId(String),

    #[error("Document too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("{0}")]
    Custom(String),
}

impl StoreError {
    /// Errors caused by the caller's input rather than the store itself
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::QuerySyntax(_) | Self::Parse(_) | Self::DuplicateId(_) | Self::TooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
