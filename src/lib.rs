//! Chat Archive - Local Searchable Message History
//!
//! A Rust library that keeps a local, searchable copy of a messaging
//! account's conversation history, reconciled from live message events and
//! bulk history-sync rounds delivered by a transport collaborator.
//!
//! # Features
//!
//! - SQLite store with an FTS5 index kept in sync by triggers
//! - Idempotent ingestion of live and history-sync messages
//! - Best-effort display names from mappings, chats and the contact directory
//! - Staleness-driven sync scheduling with a bounded completion wait
//! - Reply, forward, reaction, media download and voice-note flows

/// Ogg/Opus voice note inspection
pub mod audio;
/// Configuration management
pub mod config;
/// Database operations, migrations and write paths
pub mod db;
/// Error types
pub mod error;
/// Decoded transport events
pub mod events;
/// Display name resolution
pub mod identity;
/// Message ingestion pipeline
pub mod ingest;
/// Chat and sender identifiers
pub mod jid;
/// Logging setup and utilities
pub mod logging;
/// Outgoing message flows
pub mod messaging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Read-side queries and full-text search
pub mod queries;
/// Sync scheduling
pub mod scheduler;
/// Database schema definitions
pub mod schema;
/// History-sync completion notice
pub mod signal;
/// Transport collaborator interfaces
pub mod transport;

// Re-export key components for easier access
pub use db::Store;
pub use error::{ArchiveError, Result};
pub use ingest::Ingestor;
pub use jid::Jid;
pub use models::{Chat, ListChatsOptions, ListMessagesOptions, Message, MessageRecord, SearchOptions};
pub use scheduler::SyncScheduler;
pub use signal::SyncSignal;
