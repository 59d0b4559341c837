//! Outgoing flows built on stored messages: replies, forwards, reactions,
//! media download and voice notes.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::audio;
use crate::db::Store;
use crate::error::{ArchiveError, Result};
use crate::jid::Jid;
use crate::models::{MediaKind, MessageRecord};
use crate::transport::{MessageKey, OutgoingMessage, QuotedContext, SendReceipt, Transport};

const VOICE_NOTE_MIMETYPE: &str = "audio/ogg; codecs=opus";

/// Outcome of a send-style flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    /// Identifier assigned by the server
    pub message_id: String,
    /// Recipient chat
    pub chat_jid: String,
    /// Server timestamp, RFC 3339
    pub timestamp: String,
}

impl SendResult {
    fn new(to: &Jid, receipt: SendReceipt) -> Self {
        Self {
            message_id: receipt.id,
            chat_jid: to.to_string(),
            timestamp: receipt.timestamp.to_rfc3339(),
        }
    }
}

/// A downloaded attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedMedia {
    /// Media type as stored
    pub media_type: String,
    /// Name of the written file
    pub filename: String,
    /// Full path of the written file
    pub path: PathBuf,
}

/// Sends through a transport, reading referenced messages from the store.
pub struct Messenger<'a, T: Transport + ?Sized> {
    store: &'a Store,
    transport: &'a T,
}

impl<'a, T: Transport + ?Sized> Messenger<'a, T> {
    /// Create a messenger over `store` and `transport`.
    pub fn new(store: &'a Store, transport: &'a T) -> Self {
        Self { store, transport }
    }

    fn require_connected(&self) -> Result<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(ArchiveError::Transport("not connected".to_string()))
        }
    }

    fn stored_message(&self, id: &str, chat_jid: &str) -> Result<MessageRecord> {
        self.store
            .message(id, chat_jid)?
            .ok_or_else(|| ArchiveError::NotFound(format!("message {id} in {chat_jid}")))
    }

    /// Send text, optionally as a quoted reply to a message in the same chat.
    pub async fn send_text(&self, recipient: &str, text: &str, reply_to: Option<&str>) -> Result<SendResult> {
        self.require_connected()?;
        let to = Jid::parse_recipient(recipient)?;

        let quote = match reply_to.filter(|id| !id.is_empty()) {
            Some(id) => Some(self.quoted_context(id, &to)?),
            None => None,
        };

        let receipt = self
            .transport
            .send(
                &to,
                OutgoingMessage::Text {
                    body: text.to_string(),
                    quote,
                },
            )
            .await?;
        info!(chat_jid = %to, id = %receipt.id, "Sent text message");
        Ok(SendResult::new(&to, receipt))
    }

    /// Quote context for a stored message. Media is summarised by its label.
    fn quoted_context(&self, id: &str, chat: &Jid) -> Result<QuotedContext> {
        let quoted = self.stored_message(id, &chat.to_string())?;
        let participant = chat.is_group().then(|| sender_jid(&quoted.sender));
        let quoted_text = match &quoted.media {
            Some(media) => media.kind().map_or("Media", MediaKind::label).to_string(),
            None => quoted.content.unwrap_or_default(),
        };
        Ok(QuotedContext {
            stanza_id: id.to_string(),
            participant,
            quoted_text,
        })
    }

    /// Forward a stored text message. Media forwarding is not supported.
    pub async fn forward(&self, recipient: &str, message_id: &str, from_chat: &str) -> Result<SendResult> {
        self.require_connected()?;
        let to = Jid::parse_recipient(recipient)?;
        let original = self.stored_message(message_id, from_chat)?;
        if original.media.is_some() {
            return Err(ArchiveError::Transport("media forwarding is not supported".to_string()));
        }

        let receipt = self
            .transport
            .send(
                &to,
                OutgoingMessage::Text {
                    body: original.content.unwrap_or_default(),
                    quote: None,
                },
            )
            .await?;
        info!(chat_jid = %to, id = %message_id, "Forwarded message");
        Ok(SendResult::new(&to, receipt))
    }

    /// React to a stored message, or remove the reaction.
    pub async fn react(&self, chat: &str, message_id: &str, emoji: &str, remove: bool) -> Result<SendResult> {
        self.require_connected()?;
        let to = Jid::parse_recipient(chat)?;
        let target = self.stored_message(message_id, &to.to_string())?;

        let key = MessageKey {
            chat: to.clone(),
            id: message_id.to_string(),
            from_me: target.is_from_me,
            participant: (to.is_group() && !target.is_from_me).then(|| sender_jid(&target.sender)),
        };
        let emoji = if remove { String::new() } else { emoji.to_string() };

        let receipt = self.transport.send(&to, OutgoingMessage::Reaction { target: key, emoji }).await?;
        info!(chat_jid = %to, id = %message_id, remove, "Sent reaction");
        Ok(SendResult::new(&to, receipt))
    }

    /// Download a stored attachment into `dir/<chat>/<filename>`.
    ///
    /// Nothing is fetched unless the stored descriptor is complete.
    pub async fn download_media(&self, message_id: &str, chat_jid: &str, dir: &Path) -> Result<DownloadedMedia> {
        let media = self.store.media_descriptor(message_id, chat_jid)?;
        let data = self.transport.download(&media).await?;

        let filename = media
            .filename
            .as_deref()
            .and_then(file_name_only)
            .map_or_else(
                || {
                    let extension = media.kind().map_or("bin", MediaKind::extension);
                    format!("{}.{extension}", path_component(message_id))
                },
                str::to_string,
            );
        let out_dir = dir.join(path_component(chat_jid));
        fs::create_dir_all(&out_dir).await?;
        let path = out_dir.join(&filename);
        fs::write(&path, &data).await?;

        info!(id = %message_id, path = %path.display(), bytes = data.len(), "Downloaded media");
        Ok(DownloadedMedia {
            media_type: media.media_type,
            filename,
            path,
        })
    }

    /// Upload an Ogg/Opus buffer and send it as a voice note.
    pub async fn send_voice_note(&self, recipient: &str, ogg: Vec<u8>) -> Result<SendResult> {
        self.require_connected()?;
        let to = Jid::parse_recipient(recipient)?;
        let info = audio::analyze_ogg_opus(&ogg)?;

        let uploaded = self.transport.upload(ogg, MediaKind::Audio).await?;
        let receipt = self
            .transport
            .send(
                &to,
                OutgoingMessage::VoiceNote {
                    media: uploaded,
                    mimetype: VOICE_NOTE_MIMETYPE.to_string(),
                    duration_secs: info.duration_secs,
                    waveform: info.waveform,
                },
            )
            .await?;
        info!(chat_jid = %to, seconds = info.duration_secs, "Sent voice note");
        Ok(SendResult::new(&to, receipt))
    }
}

/// Final component of a sender-supplied filename. Absolute paths and `..`
/// segments never reach the filesystem.
fn file_name_only(raw: &str) -> Option<&str> {
    let name = Path::new(raw).file_name()?.to_str()?;
    (!name.is_empty() && name != "." && name != "..").then_some(name)
}

/// A single directory entry derived from an identifier.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, ':' | '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Stored senders are user parts; older rows may hold a full identifier.
fn sender_jid(sender: &str) -> Jid {
    Jid::parse(sender).unwrap_or_else(|_| Jid::phone(sender))
}
