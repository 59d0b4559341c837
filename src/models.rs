//! Data models for chats, messages and identity mappings
//!
//! This module contains the statically declared record shapes the store reads
//! and writes, plus the option records accepted by the read-side queries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// A chat as listed from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Chat identifier
    pub jid: String,
    /// Display name, if one has been resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// True for group chats
    pub is_group: bool,
    /// Timestamp of the newest message seen for this chat
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    /// Content of the newest stored message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// Sender of the newest stored message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sender: Option<String>,
    /// Own-message flag of the newest stored message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_is_from_me: Option<bool>,
}

/// Class of media attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Audio, including voice notes
    Audio,
    /// Any other file
    Document,
    /// Sticker
    Sticker,
}

impl MediaKind {
    /// Value stored in `messages.media_type`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }

    /// Human label used when a media message is quoted
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Image => "Photo",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Document => "Document",
            Self::Sticker => "Sticker",
        }
    }

    /// Default file extension for downloads without a filename
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
            Self::Audio => "ogg",
            Self::Document => "bin",
            Self::Sticker => "webp",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            "sticker" => Ok(Self::Sticker),
            other => Err(ArchiveError::Query(format!("unknown media type: {other}"))),
        }
    }
}

/// Everything needed to fetch and decrypt an attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Media type as stored (`image`, `video`, ...)
    pub media_type: String,
    /// Original filename, when the sender provided one
    pub filename: Option<String>,
    /// Remote locator
    pub url: Option<String>,
    /// Symmetric media key
    pub media_key: Option<Vec<u8>>,
    /// Hash of the plaintext
    pub file_sha256: Option<Vec<u8>>,
    /// Hash of the ciphertext
    pub file_enc_sha256: Option<Vec<u8>>,
    /// Plaintext length in bytes
    pub file_length: Option<u64>,
}

impl MediaDescriptor {
    /// Parsed media class, if the stored type is a known one
    #[must_use]
    pub fn kind(&self) -> Option<MediaKind> {
        self.media_type.parse().ok()
    }

    /// A descriptor without a media type carries nothing worth storing.
    #[must_use]
    pub fn is_present(&self) -> bool {
        !self.media_type.is_empty()
    }

    /// Name of the first field a download would be missing.
    #[must_use]
    pub fn first_missing_field(&self) -> Option<&'static str> {
        fn blank(bytes: Option<&Vec<u8>>) -> bool {
            bytes.is_none_or(Vec::is_empty)
        }

        if self.media_type.is_empty() {
            Some("media type")
        } else if self.url.as_deref().is_none_or(str::is_empty) {
            Some("remote locator")
        } else if blank(self.media_key.as_ref()) {
            Some("media key")
        } else if blank(self.file_sha256.as_ref()) {
            Some("content hash")
        } else if blank(self.file_enc_sha256.as_ref()) {
            Some("encrypted content hash")
        } else if self.file_length.unwrap_or(0) == 0 {
            Some("byte length")
        } else {
            None
        }
    }
}

/// A complete message row, as written by ingestion and read back by key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message identifier (unique together with `chat_jid`)
    pub id: String,
    /// Owning chat identifier
    pub chat_jid: String,
    /// Sender user part
    pub sender: String,
    /// Resolved sender display name (may be empty)
    pub sender_name: String,
    /// Text content
    pub content: Option<String>,
    /// Time the message was sent
    pub timestamp: DateTime<Utc>,
    /// True if the local account sent the message
    pub is_from_me: bool,
    /// Attachment descriptor
    pub media: Option<MediaDescriptor>,
}

impl MessageRecord {
    /// A message with neither text nor media is never persisted.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
            || self.media.as_ref().is_some_and(MediaDescriptor::is_present)
    }
}

/// A message as listed or found by search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier
    pub id: String,
    /// Owning chat identifier
    pub chat_jid: String,
    /// Sender user part
    pub sender: String,
    /// Stored sender name, else the mapping name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Send time
    pub timestamp: DateTime<Utc>,
    /// Authored by the local account
    pub is_from_me: bool,
    /// Media type, if the message has an attachment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Attachment filename
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Name of the owning chat
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
}

/// Best-known phone and name for a secondary identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Secondary identifier user part
    pub lid: String,
    /// Phone user part, empty when unknown
    pub phone: String,
    /// Display name, empty when unknown
    pub name: String,
}

/// Options for listing chats
#[derive(Debug, Clone, Default)]
pub struct ListChatsOptions {
    /// Case-insensitive substring of the name or identifier
    pub query: Option<String>,
    /// Only list group chats
    pub only_groups: bool,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

/// Options for listing messages
#[derive(Debug, Clone, Default)]
pub struct ListMessagesOptions {
    /// Restrict to one chat
    pub chat_jid: Option<String>,
    /// RFC 3339 lower bound; unparseable values are dropped
    pub after: Option<String>,
    /// RFC 3339 upper bound; unparseable values are dropped
    pub before: Option<String>,
    /// Named time window, overridden by explicit bounds
    pub timeframe: Option<String>,
    /// `text` or a media kind
    pub media_type: Option<String>,
    /// Maximum rows; `None` or 0 means unlimited
    pub limit: Option<usize>,
}

/// Options for full-text search
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// FTS5 match expression
    pub query: String,
    /// Restrict to one chat
    pub chat_jid: Option<String>,
    /// Sender user part
    pub from: Option<String>,
    /// RFC 3339 lower bound
    pub after: Option<String>,
    /// RFC 3339 upper bound
    pub before: Option<String>,
    /// Named time window, overridden by explicit bounds
    pub timeframe: Option<String>,
    /// `text` or a media kind
    pub media_type: Option<String>,
    /// Maximum rows; `None` or 0 means unlimited
    pub limit: Option<usize>,
}

/// Full history of one chat, newest message first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExport {
    /// Chat identifier
    pub jid: String,
    /// Chat name, when one is stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Number of exported messages
    pub message_count: usize,
    /// Messages, newest first
    pub messages: Vec<Message>,
}

/// Row counts of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Stored chats
    pub chats: usize,
    /// Stored messages
    pub messages: usize,
}
