// src/error.rs

use thiserror::Error;

/// Core error types for csvfs
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No encoding in the fallback list produced valid text
    #[error("Could not decode {0} with any supported encoding")]
    Encoding(String),

    /// Malformed schema override file
    #[error("Malformed schema override line: {0:?}")]
    SchemaParse(String),

    /// A declared column type could not be applied to the data
    #[error("Column {column:?} cannot be coerced to {target}: {value:?}")]
    Coerce {
        column: String,
        target: &'static str,
        value: String,
    },

    /// Backend initialization error
    #[error("Failed to initialize backend: {0}")]
    InitError(String),
}

/// Result type alias using csvfs's Error type
pub type Result<T> = std::result::Result<T, Error>;
