// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for OPM
#[derive(Error, Debug)]
pub enum Error {
    /// Network failure, unexpected HTTP status, or unparsable payload
    #[error("Failed to fetch {url}: {reason}")]
    FetchError { url: String, reason: String },

    /// Package absent from the manifest or from the installed registry
    #[error("Package '{0}' not found")]
    NotFoundError(String),

    /// Download or extraction failure for a single package
    #[error("Failed to install {package}: {reason}")]
    InstallError { package: String, reason: String },

    /// Directory creation/deletion or file replacement failure
    #[error("Filesystem error at {}: {source}", path.display())]
    FilesystemError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Corrupt or unreadable ZIP archive
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Construction failure (HTTP client, directories)
    #[error("Failed to initialize: {0}")]
    InitError(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened at
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FilesystemError {
            path: path.into(),
            source,
        }
    }

    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        Error::FetchError {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using OPM's Error type
pub type Result<T> = std::result::Result<T, Error>;
