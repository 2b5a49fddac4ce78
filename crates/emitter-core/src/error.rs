//! Error type shared by every emitter crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("recipient enumeration failed: {0}")]
    Recipients(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EmitterError>;
