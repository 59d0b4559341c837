//! Collaborator interfaces consumed by the archive.
//!
//! The messaging transport owns the wire format, pairing and session storage.
//! The archive only consumes its decoded events (see [`crate::events`]) and
//! calls the lookup and send primitives declared here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::jid::Jid;
use crate::models::{MediaDescriptor, MediaKind};

/// Names the directory knows for a contact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Name from the address book
    pub full_name: String,
    /// Verified business name
    pub business_name: String,
    /// Self-reported display name
    pub push_name: String,
}

impl ContactInfo {
    /// Full name, then business name, then push name.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        [&self.full_name, &self.business_name, &self.push_name]
            .into_iter()
            .map(String::as_str)
            .find(|name| !name.is_empty())
    }
}

/// Contact and group directory. Lookups are local and must not block on the
/// network for long; they run inside ingestion.
pub trait Directory: Send + Sync {
    /// Contact entry for an individual identifier
    fn contact(&self, jid: &Jid) -> Option<ContactInfo>;

    /// Subject of a group
    fn group_name(&self, jid: &Jid) -> Option<String>;
}

/// Reference to an already delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    /// Chat holding the message
    pub chat: Jid,
    /// Message identifier
    pub id: String,
    /// Authored by the local account
    pub from_me: bool,
    /// Author within a group chat
    pub participant: Option<Jid>,
}

/// Quoted-reply context attached to outgoing text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedContext {
    /// Identifier of the quoted message
    pub stanza_id: String,
    /// Author of the quoted message, set for group chats
    pub participant: Option<Jid>,
    /// Text shown in the quote bubble
    pub quoted_text: String,
}

/// Media uploaded to the transport's media servers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedMedia {
    /// Remote locator
    pub url: String,
    /// Server path of the encrypted blob
    pub direct_path: String,
    /// Symmetric media key
    pub media_key: Vec<u8>,
    /// Hash of the plaintext
    pub file_sha256: Vec<u8>,
    /// Hash of the ciphertext
    pub file_enc_sha256: Vec<u8>,
    /// Plaintext length in bytes
    pub file_length: u64,
}

/// Everything this crate knows how to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// Plain text, optionally quoting an earlier message
    Text {
        /// Message text
        body: String,
        /// Quoted-reply context
        quote: Option<QuotedContext>,
    },
    /// An empty emoji removes a previous reaction
    Reaction {
        /// Message reacted to
        target: MessageKey,
        /// Reaction emoji, empty to remove
        emoji: String,
    },
    /// Push-to-talk audio
    VoiceNote {
        /// Uploaded Ogg/Opus blob
        media: UploadedMedia,
        /// Content type of the blob
        mimetype: String,
        /// Whole seconds
        duration_secs: u32,
        /// Amplitude envelope
        waveform: Vec<u8>,
    },
}

/// Server acknowledgement of a sent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Server-assigned message identifier
    pub id: String,
    /// Server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Session-level operations of the messaging transport.
///
/// Failures are reported as [`crate::error::ArchiveError::Transport`] and are
/// never retried by this crate.
#[async_trait]
pub trait Transport: Directory {
    /// True when stored credentials exist (the device is paired)
    fn is_authenticated(&self) -> bool;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self);

    async fn send(&self, to: &Jid, message: OutgoingMessage) -> Result<SendReceipt>;

    /// Fetch and decrypt an attachment
    async fn download(&self, media: &MediaDescriptor) -> Result<Vec<u8>>;

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> Result<UploadedMedia>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_preference() {
        let mut info = ContactInfo {
            full_name: String::new(),
            business_name: "Acme Ltd".to_string(),
            push_name: "acme".to_string(),
        };
        assert_eq!(info.display_name(), Some("Acme Ltd"));
        info.full_name = "Alice Smith".to_string();
        assert_eq!(info.display_name(), Some("Alice Smith"));
        assert_eq!(ContactInfo::default().display_name(), None);
    }
}
