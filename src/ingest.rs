//! Message ingestion: live messages and history-sync rounds into the store.
//!
//! Handlers run on whatever context the transport delivers events on. Each
//! message (or each history conversation) is written in one transaction on
//! the store's single connection. Directory answers are captured before the
//! connection is taken.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::{self, Store};
use crate::error::Result;
use crate::events::{Conversation, HistoryMessage, HistorySyncBatch, MessageEvent, Participant, TransportEvent};
use crate::identity::{self, DirectorySnapshot};
use crate::jid::{self, Jid};
use crate::logging::OperationTimer;
use crate::metrics::{self, Source};
use crate::models::{MediaDescriptor, MessageRecord};
use crate::signal::SyncSignal;
use crate::transport::Directory;

/// Progress value at which a history sync counts as complete
pub const HISTORY_SYNC_COMPLETE: u32 = 100;

/// Writes decoded transport events into the store.
pub struct Ingestor<D: Directory + ?Sized> {
    store: Store,
    directory: Arc<D>,
    signal: SyncSignal,
    own_id: RwLock<Option<Jid>>,
}

impl<D: Directory + ?Sized> Ingestor<D> {
    /// Create an ingestor writing to `store` and resolving names through `directory`.
    pub fn new(store: Store, directory: Arc<D>, signal: SyncSignal) -> Self {
        Self {
            store,
            directory,
            signal,
            own_id: RwLock::new(None),
        }
    }

    /// Store written to
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Completion notice raised when history sync finishes
    pub fn signal(&self) -> &SyncSignal {
        &self.signal
    }

    /// Local account identity, once known
    pub fn own_id(&self) -> Option<Jid> {
        self.own_id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record the local account identity used for self-authored backlog.
    pub fn set_own_id(&self, own_id: Option<Jid>) {
        *self.own_id.write().unwrap_or_else(PoisonError::into_inner) = own_id;
    }

    /// Dispatch one transport event.
    pub fn handle(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Message(message) => self.handle_message(&message).map(|_| ()),
            TransportEvent::HistorySync(batch) => self.handle_history_sync(&batch).map(|_| ()),
            TransportEvent::OfflineSyncCompleted => {
                info!("Offline queue drained");
                self.complete_sync();
                Ok(())
            }
            TransportEvent::Participants(participants) => self.record_participants(&participants).map(|_| ()),
            TransportEvent::Connected { own_id } => {
                info!(own_id = ?own_id.as_ref().map(ToString::to_string), "Connected");
                if own_id.is_some() {
                    self.set_own_id(own_id);
                }
                Ok(())
            }
            TransportEvent::LoggedOut => {
                warn!("Logged out; stored credentials are no longer valid");
                Ok(())
            }
        }
    }

    /// Persist one live message. Returns false when it carried nothing to store.
    pub fn handle_message(&self, message: &MessageEvent) -> Result<bool> {
        let chat_jid = message.chat.to_string();
        let mut record = MessageRecord {
            id: message.id.clone(),
            chat_jid: chat_jid.clone(),
            sender: message.sender.local_part().to_string(),
            sender_name: String::new(),
            content: message.text.clone().filter(|t| !t.is_empty()),
            timestamp: message.timestamp,
            is_from_me: message.is_from_me,
            media: message.media.clone().filter(MediaDescriptor::is_present),
        };
        if !record.has_payload() {
            debug!(id = %message.id, chat_jid = %chat_jid, "Skipping message without payload");
            metrics::record_dropped(Source::Live, "no_payload");
            return Ok(false);
        }

        let alt_phone = message
            .sender_alt
            .as_ref()
            .filter(|alt| message.sender.is_hidden_user() && !alt.is_hidden_user());
        let mapping = self.store.identity_mapping(message.sender.local_part())?;
        let mut lookups = identity::sender_lookup_jids(&message.sender, mapping.as_ref());
        lookups.extend(alt_phone.map(|alt| Jid::phone(alt.local_part())));
        lookups.push(message.chat.clone());
        let directory = DirectorySnapshot::capture(&*self.directory, &lookups);

        let mut conn = self.store.get_connection()?;
        let tx = conn.transaction()?;

        if let Some(alt) = alt_phone {
            db::store_identity_mapping(&tx, message.sender.local_part(), alt.local_part(), "")?;
        }

        record.sender_name = identity::resolve_sender_name(&tx, &directory, &message.sender, &message.push_name)?;
        if !message.is_from_me && message.sender.is_individual() {
            identity::ensure_shadow_chat(&tx, &directory, &message.sender)?;
        }

        let chat_name = identity::resolve_chat_name(&tx, &directory, &message.chat, message.sender.local_part())?;
        db::upsert_chat(&tx, &chat_jid, &chat_name, Some(message.timestamp))?;
        db::upsert_message(&tx, &record)?;
        tx.commit()?;

        debug!(id = %message.id, chat_jid = %chat_jid, "Stored live message");
        metrics::record_ingested(Source::Live, 1);
        Ok(true)
    }

    /// Persist one history-sync round. Returns the number of stored messages.
    ///
    /// A conversation that fails to store is logged and skipped; the rest of
    /// the round proceeds. Progress of 100 completes the sync.
    pub fn handle_history_sync(&self, batch: &HistorySyncBatch) -> Result<usize> {
        let timer = OperationTimer::new("history_sync_batch");
        if let Some(progress) = batch.progress {
            metrics::record_history_progress(progress);
        }

        let own_id = self.own_id();
        let mut synced = 0;
        for conversation in &batch.conversations {
            let chat = match Jid::parse(&conversation.id) {
                Ok(chat) => chat,
                Err(e) => {
                    warn!(chat_jid = %conversation.id, error = %e, "History sync: bad chat identifier");
                    continue;
                }
            };
            match self.store_conversation(&chat, conversation, own_id.as_ref()) {
                Ok(count) => synced += count,
                Err(e) => warn!(chat_jid = %chat, error = %e, "History sync: failed to store conversation"),
            }
        }

        info!(count = synced, progress = ?batch.progress, "History sync persisted messages");
        metrics::record_ingested(Source::HistorySync, synced);
        timer.finish();

        if batch.progress.is_some_and(|p| p >= HISTORY_SYNC_COMPLETE) {
            self.complete_sync();
        }
        Ok(synced)
    }

    fn store_conversation(&self, chat: &Jid, conversation: &Conversation, own_id: Option<&Jid>) -> Result<usize> {
        let chat_jid = chat.to_string();
        let drafts: Vec<(Jid, MessageRecord)> = conversation
            .messages
            .iter()
            .filter_map(|message| history_record(chat, message, own_id))
            .collect();
        if drafts.is_empty() {
            return Ok(0);
        }

        let mut lookups = vec![chat.clone()];
        for (sender, _) in &drafts {
            if lookups.contains(sender) {
                continue;
            }
            let mapping = if sender.is_hidden_user() {
                self.store.identity_mapping(sender.local_part())?
            } else {
                None
            };
            lookups.extend(identity::sender_lookup_jids(sender, mapping.as_ref()));
        }
        let directory = DirectorySnapshot::capture(&*self.directory, &lookups);

        let mut conn = self.store.get_connection()?;
        let tx = conn.transaction()?;

        for (sender, record) in &drafts {
            if !record.is_from_me && sender.is_individual() {
                identity::ensure_shadow_chat(&tx, &directory, sender)?;
            }
        }
        let newest = drafts.iter().map(|(_, record)| record.timestamp).max();
        let name = identity::resolve_chat_name(&tx, &directory, chat, "")?;
        db::upsert_chat(&tx, &chat_jid, &name, newest)?;

        let stored = drafts.len();
        for (sender, mut record) in drafts {
            record.sender_name = identity::resolve_sender_name(&tx, &directory, &sender, "")?;
            db::upsert_message(&tx, &record)?;
        }
        tx.commit()?;
        Ok(stored)
    }

    /// Merge participant records into the identity mapping table.
    pub fn record_participants(&self, participants: &[Participant]) -> Result<usize> {
        let mut conn = self.store.get_connection()?;
        let tx = conn.transaction()?;
        let mut recorded = 0;
        for participant in participants.iter().filter(|p| !p.lid.local_part().is_empty()) {
            let phone = participant.phone.as_ref().map_or("", Jid::local_part);
            db::store_identity_mapping(&tx, participant.lid.local_part(), phone, &participant.name)?;
            recorded += 1;
        }
        tx.commit()?;
        debug!(count = recorded, "Recorded participant mappings");
        Ok(recorded)
    }

    /// Backfill chat names, then raise the completion notice.
    fn complete_sync(&self) {
        match identity::backfill_chat_names(&self.store, &*self.directory) {
            Ok(updated) => debug!(count = updated, "Chat name backfill finished"),
            Err(e) => warn!(error = %e, "Chat name backfill failed"),
        }
        self.signal.notify();
    }
}

/// Row for a backlog message, paired with its author, or `None` when it
/// must be dropped. The sender name is resolved later.
fn history_record(chat: &Jid, message: &HistoryMessage, own_id: Option<&Jid>) -> Option<(Jid, MessageRecord)> {
    let is_from_me = message.from_me.unwrap_or(false);
    let sender = history_sender(chat, message, is_from_me, own_id);
    let mut record = MessageRecord {
        id: message.id.clone().unwrap_or_default(),
        chat_jid: chat.to_string(),
        sender: sender.local_part().to_string(),
        sender_name: String::new(),
        content: message.text.clone().filter(|t| !t.is_empty()),
        timestamp: DateTime::<Utc>::default(),
        is_from_me,
        media: message.media.clone().filter(MediaDescriptor::is_present),
    };
    if !record.has_payload() {
        metrics::record_dropped(Source::HistorySync, "no_payload");
        return None;
    }
    if record.id.is_empty() {
        metrics::record_dropped(Source::HistorySync, "missing_id");
        return None;
    }
    let Some(timestamp) = message.timestamp.and_then(from_epoch) else {
        debug!(id = %record.id, chat_jid = %chat, "Dropping backlog message without timestamp");
        metrics::record_dropped(Source::HistorySync, "missing_timestamp");
        return None;
    };
    record.timestamp = timestamp;
    Some((sender, record))
}

/// Author of a backlog message.
///
/// Own messages use the local identity when known, else the chat peer.
/// Others use the participant pseudo-identifier when present, else the chat.
fn history_sender(chat: &Jid, message: &HistoryMessage, is_from_me: bool, own_id: Option<&Jid>) -> Jid {
    if is_from_me {
        return own_id.map_or_else(|| chat.to_phone(), Jid::to_phone);
    }
    match message.participant.as_deref().filter(|p| !p.is_empty()) {
        Some(raw) => Jid::parse(raw).unwrap_or_else(|_| Jid::phone(jid::normalize_user(raw))),
        None => chat.clone(),
    }
}

fn from_epoch(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    i64::try_from(secs).ok().and_then(|s| DateTime::from_timestamp(s, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backlog(participant: Option<&str>, from_me: bool) -> HistoryMessage {
        HistoryMessage {
            id: Some("H1".to_string()),
            from_me: Some(from_me),
            participant: participant.map(str::to_string),
            timestamp: Some(1_700_000_000),
            text: Some("hi".to_string()),
            media: None,
        }
    }

    #[test]
    fn test_history_sender_normalizes_participant() {
        let group = Jid::new("1203", "g.us");
        let sender = history_sender(&group, &backlog(Some("4915:7@s.whatsapp.net"), false), false, None);
        assert_eq!(sender, Jid::phone("4915"));

        let sender = history_sender(&group, &backlog(Some("888@lid"), false), false, None);
        assert!(sender.is_hidden_user());
    }

    #[test]
    fn test_history_sender_for_own_messages() {
        let chat = Jid::phone("4915");
        let own = Jid::parse("3333:2@s.whatsapp.net").unwrap();
        assert_eq!(history_sender(&chat, &backlog(None, true), true, Some(&own)), Jid::phone("3333"));
        assert_eq!(history_sender(&chat, &backlog(None, true), true, None), chat);
    }

    #[test]
    fn test_history_record_drops_empty_media_descriptor() {
        let chat = Jid::phone("4915");
        let mut message = backlog(None, false);
        message.text = None;
        message.media = Some(MediaDescriptor::default());
        assert!(history_record(&chat, &message, None).is_none());

        message.text = Some("caption".to_string());
        let (sender, record) = history_record(&chat, &message, None).unwrap();
        assert_eq!(sender, chat);
        assert_eq!(record.media, None);
        assert_eq!(record.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_from_epoch() {
        assert_eq!(from_epoch(0), None);
        assert_eq!(from_epoch(60).map(|t| t.timestamp()), Some(60));
    }
}
