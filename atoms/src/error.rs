use thiserror::Error;

/// Failure kinds shared by every atom.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown id. Private items without a grant report this too.
    #[error("{table} not found: {id}")]
    NotFound { table: &'static str, id: String },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("tile ({z}, {x}, {y}) is outside the pyramid")]
    OutOfRange { z: i64, x: i64, y: i64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker error: {0}")]
    Worker(String),
}

impl Error {
    pub fn not_found(table: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound { table, id: id.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Short machine-readable name used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NotFound",
            Error::InvalidGeometry(_) => "InvalidGeometry",
            Error::OutOfRange { .. } => "OutOfRange",
            Error::Validation(_) => "ValidationError",
            Error::Storage(_) => "StorageError",
            Error::Image(_) => "ImageError",
            Error::Io(_) => "IoError",
            Error::Json(_) => "JsonError",
            Error::Worker(_) => "WorkerError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
