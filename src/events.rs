//! Decoded events delivered by the transport.
//!
//! The set is closed: ingestion dispatches over [`TransportEvent`] with an
//! exhaustive match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jid::Jid;
use crate::models::MediaDescriptor;

/// Every event kind the archive reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A single live message
    Message(MessageEvent),
    /// One round of history sync
    HistorySync(HistorySyncBatch),
    /// The offline message queue has been drained
    OfflineSyncCompleted,
    /// Group participant records carrying secondary identifiers
    Participants(Vec<Participant>),
    /// Session established; carries the local account identifier when known
    Connected {
        /// Local account identifier
        own_id: Option<Jid>,
    },
    /// Stored credentials were revoked
    LoggedOut,
}

/// A decoded live message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Message identifier
    pub id: String,
    /// Chat the message belongs to
    pub chat: Jid,
    /// Author
    pub sender: Jid,
    /// Phone-based alternate of a secondary-identifier sender
    pub sender_alt: Option<Jid>,
    /// Display name embedded in the message
    pub push_name: String,
    /// Send time
    pub timestamp: DateTime<Utc>,
    /// Authored by the local account
    pub is_from_me: bool,
    /// Text or caption
    pub text: Option<String>,
    /// Attachment, if any
    pub media: Option<MediaDescriptor>,
}

/// One history-sync round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySyncBatch {
    /// Conversations delivered in this round
    pub conversations: Vec<Conversation>,
    /// Overall progress, 0 to 100
    pub progress: Option<u32>,
}

/// A conversation and its backlog, newest message first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Raw chat identifier
    pub id: String,
    /// Backlog of the conversation
    pub messages: Vec<HistoryMessage>,
}

/// A backlog message. Every field may be absent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Message identifier
    pub id: Option<String>,
    /// Authored by the local account
    pub from_me: Option<bool>,
    /// Participant pseudo-identifier of the author in group chats
    pub participant: Option<String>,
    /// Unix seconds
    pub timestamp: Option<u64>,
    /// Text or caption
    pub text: Option<String>,
    /// Attachment, if any
    pub media: Option<MediaDescriptor>,
}

/// Secondary identifier, phone and name of a group participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Secondary identifier
    pub lid: Jid,
    /// Phone-based identifier, when known
    pub phone: Option<Jid>,
    /// Display name, may be empty
    pub name: String,
}
