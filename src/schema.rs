//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! The DDL itself lives in `migrations/`.

/// Chats table schema
pub mod chats {
    /// Table name
    pub const TABLE: &str = "chats";
    /// Primary key: chat identifier
    pub const JID: &str = "jid";
    /// Display name column
    pub const NAME: &str = "name";
    /// Unix seconds of the newest message seen for the chat
    pub const LAST_MESSAGE_TIME: &str = "last_message_time";
}

/// Messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Message identifier column (unique together with `CHAT_JID`)
    pub const ID: &str = "id";
    /// Owning chat identifier column
    pub const CHAT_JID: &str = "chat_jid";
    /// Sender user part column
    pub const SENDER: &str = "sender";
    /// Resolved sender display name column
    pub const SENDER_NAME: &str = "sender_name";
    /// Text content column, mirrored into the full-text index
    pub const CONTENT: &str = "content";
    /// Unix seconds column
    pub const TIMESTAMP: &str = "timestamp";
    /// Flag indicating the message was sent by the local account
    pub const IS_FROM_ME: &str = "is_from_me";
    /// Media type column (image, video, audio, document, sticker)
    pub const MEDIA_TYPE: &str = "media_type";
    /// Media filename column
    pub const FILENAME: &str = "filename";
    /// Remote locator column
    pub const URL: &str = "url";
    /// Symmetric media key column
    pub const MEDIA_KEY: &str = "media_key";
    /// Plaintext hash column
    pub const FILE_SHA256: &str = "file_sha256";
    /// Ciphertext hash column
    pub const FILE_ENC_SHA256: &str = "file_enc_sha256";
    /// Byte length column
    pub const FILE_LENGTH: &str = "file_length";
}

/// Identity mapping table schema
pub mod lid_mappings {
    /// Table name
    pub const TABLE: &str = "lid_mappings";
    /// Primary key: secondary identifier user part
    pub const LID: &str = "lid";
    /// Best-known phone column
    pub const PHONE: &str = "phone";
    /// Best-known display name column
    pub const NAME: &str = "name";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Sync state table schema
pub mod sync_state {
    /// Table name
    pub const TABLE: &str = "sync_state";
    /// Singleton key column
    pub const ID: &str = "id";
    /// Unix seconds of the last completed sync attempt
    pub const LAST_SYNC_TIME: &str = "last_sync_time";
}

/// Full-text index over `messages.content`
pub mod messages_fts {
    /// Virtual table name
    pub const TABLE: &str = "messages_fts";
}
