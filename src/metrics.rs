//! Metric names and recording helpers.
//!
//! All recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use metrics::{counter, gauge};

/// Counter of stored messages, labelled by source
pub const MESSAGES_INGESTED_TOTAL: &str = "chat_archive_messages_ingested_total";
/// Counter of dropped messages, labelled by source and reason
pub const MESSAGES_DROPPED_TOTAL: &str = "chat_archive_messages_dropped_total";
/// Counter of sync attempts, labelled by outcome
pub const SYNC_ATTEMPTS_TOTAL: &str = "chat_archive_sync_attempts_total";
/// Counter of chats renamed by backfill
pub const CHAT_NAMES_BACKFILLED_TOTAL: &str = "chat_archive_chat_names_backfilled_total";
/// Gauge of the latest history-sync progress
pub const HISTORY_SYNC_PROGRESS: &str = "chat_archive_history_sync_progress";

/// Producer a message arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Delivered while connected
    Live,
    /// Backlog from a history-sync round
    HistorySync,
}

impl Source {
    /// Label value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::HistorySync => "history_sync",
        }
    }
}

/// Count stored messages.
pub fn record_ingested(source: Source, count: usize) {
    counter!(MESSAGES_INGESTED_TOTAL, "source" => source.as_str()).increment(count as u64);
}

/// Count one dropped message.
pub fn record_dropped(source: Source, reason: &'static str) {
    counter!(MESSAGES_DROPPED_TOTAL, "source" => source.as_str(), "reason" => reason).increment(1);
}

/// Count one finished sync attempt.
pub fn record_sync_attempt(outcome: &'static str) {
    counter!(SYNC_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Count chats renamed by backfill.
pub fn record_backfill(updated: usize) {
    counter!(CHAT_NAMES_BACKFILLED_TOTAL).increment(updated as u64);
}

/// Record history-sync progress.
pub fn record_history_progress(progress: u32) {
    gauge!(HISTORY_SYNC_PROGRESS).set(f64::from(progress));
}
