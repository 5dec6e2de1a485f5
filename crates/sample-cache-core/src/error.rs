use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Structure error: {0}")]
    Structure(String),

    #[error("Enumeration of {sample} failed: {reason}")]
    Enumeration { sample: String, reason: String },

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("{0}")]
    Other(String),
}
