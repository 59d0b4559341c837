//! Error types for the chat-archive library.
//!
//! This module provides custom error types using `thiserror` so callers can
//! tell configuration and capability failures at open time apart from the
//! per-operation failures of the messaging flows.

use thiserror::Error;

/// Errors that can occur in the chat-archive library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Paths, permissions or invalid configuration values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required storage engine feature is not available
    #[error("Capability error: {feature} is not available in the linked SQLite ({detail})")]
    Capability {
        /// Name of the missing feature
        feature: &'static str,
        /// Underlying engine message
        detail: String,
    },

    /// A malformed query or filter
    #[error("Query error: {0}")]
    Query(String),

    /// Referenced message or chat does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Media descriptor is missing a field required for download
    #[error("Incomplete media info for message {message_id}: missing {missing}")]
    IncompleteMedia {
        /// Message the descriptor belongs to
        message_id: String,
        /// First missing field
        missing: &'static str,
    },

    /// A message row with neither text nor media
    #[error("Message {0} has neither text nor media")]
    EmptyMessage(String),

    /// Failure reported by the messaging transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Identifier that could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Malformed binary input (audio container)
    #[error("Format error: {0}")]
    Format(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for Result with `ArchiveError`
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl From<config::ConfigError> for ArchiveError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
