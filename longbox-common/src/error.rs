//! Errors raised while loading configuration and decoding stored rows

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file unreadable, unparseable or rejected by validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored column whose text no longer decodes
    #[error("Corrupt {column} value '{value}': {reason}")]
    CorruptColumn {
        column: &'static str,
        value: String,
        reason: String,
    },

    /// A global tracing subscriber is already installed
    #[error("Logging already initialised: {0}")]
    LoggingInstalled(String),
}

impl Error {
    pub fn corrupt(column: &'static str, value: &str, reason: impl std::fmt::Display) -> Self {
        Error::CorruptColumn {
            column,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_column_names_the_value() {
        let err = Error::corrupt("created_at", "yesterday", "premature end of input");
        assert_eq!(
            err.to_string(),
            "Corrupt created_at value 'yesterday': premature end of input"
        );
    }
}
