//! Staleness-driven sync scheduling.
//!
//! An auto-sync runs when the caller has not opted out and the last attempt
//! is missing or older than the configured threshold. Every attempt that got
//! as far as waiting advances the recorded sync time, whether or not history
//! sync actually reported completion.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::db::Store;
use crate::error::{ArchiveError, Result};
use crate::metrics;
use crate::signal::{SyncSignal, WaitOutcome};
use crate::transport::Transport;

/// Result of a scheduling decision or a sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Opted out, or the local copy is fresh
    NotDue,
    /// No stored credentials; skipped silently
    NotAuthenticated,
    /// The wait ended; the sync time was advanced
    Attempted(WaitOutcome),
}

/// Counts reported after an explicit sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Stored chats after the sync
    pub chats: usize,
    /// Stored messages after the sync
    pub messages: usize,
    /// History sync reported completion before the wait ended
    pub completed: bool,
}

/// Decides when to sync and runs sync attempts against a transport.
pub struct SyncScheduler {
    store: Store,
    config: SyncConfig,
}

impl SyncScheduler {
    /// Create a scheduler over `store` with `config`.
    pub fn new(store: Store, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// Whether an auto-sync is due at `now`.
    pub fn should_auto_sync_at(&self, now: DateTime<Utc>) -> Result<bool> {
        if self.config.disabled {
            return Ok(false);
        }
        let Some(last) = self.store.last_sync_time()? else {
            return Ok(true);
        };
        let age = now.signed_duration_since(last).to_std().unwrap_or_default();
        Ok(age > self.config.staleness_threshold())
    }

    /// Sync if the local copy is stale.
    ///
    /// An existing connection is reused as is. Otherwise a transient one is
    /// opened and closed around the wait, unless no credentials are stored.
    pub async fn maybe_auto_sync<T, F>(&self, transport: &T, signal: &SyncSignal, cancel: F) -> Result<SyncOutcome>
    where
        T: Transport + ?Sized,
        F: Future<Output = ()>,
    {
        if !self.should_auto_sync_at(Utc::now())? {
            return Ok(SyncOutcome::NotDue);
        }

        let last = self.store.last_sync_time()?;
        let reuse = transport.is_connected();
        if !reuse && !transport.is_authenticated() {
            debug!("Auto-sync skipped: not authenticated");
            return Ok(SyncOutcome::NotAuthenticated);
        }
        info!(last_sync = %format_time_since(last, Utc::now()), "Auto-syncing");

        let mut waiter = signal.subscribe();
        if !reuse {
            transport.connect().await?;
        }
        let outcome = waiter.wait(self.config.wait_timeout(), cancel).await;
        if !reuse {
            transport.disconnect().await;
        }

        self.finish_attempt(outcome)?;
        Ok(SyncOutcome::Attempted(outcome))
    }

    /// Explicit one-time sync: connect, wait for completion (bounded by the
    /// manual timeout and `cancel`), disconnect, and report store counts.
    pub async fn sync_now<T, F>(&self, transport: &T, signal: &SyncSignal, cancel: F) -> Result<SyncReport>
    where
        T: Transport + ?Sized,
        F: Future<Output = ()>,
    {
        if !transport.is_authenticated() {
            return Err(ArchiveError::Transport(
                "not authenticated; pair this device first".to_string(),
            ));
        }

        let mut waiter = signal.subscribe();
        let reuse = transport.is_connected();
        if !reuse {
            transport.connect().await?;
        }
        info!("Connected. Performing one-time sync");
        let outcome = waiter.wait(self.config.manual_timeout(), cancel).await;
        if !reuse {
            transport.disconnect().await;
        }
        self.finish_attempt(outcome)?;

        let stats = self.store.stats()?;
        info!(chats = stats.chats, messages = stats.messages, "Sync finished");
        Ok(SyncReport {
            chats: stats.chats,
            messages: stats.messages,
            completed: outcome == WaitOutcome::Completed,
        })
    }

    fn finish_attempt(&self, outcome: WaitOutcome) -> Result<()> {
        match outcome {
            WaitOutcome::Completed => info!("Sync complete"),
            WaitOutcome::TimedOut => warn!("Sync timeout (continuing with available data)"),
            WaitOutcome::Cancelled => info!("Sync interrupted"),
        }
        metrics::record_sync_attempt(outcome.as_str());
        self.store.set_last_sync_time(Utc::now())
    }
}

/// Human-readable age of the last sync.
#[must_use]
pub fn format_time_since(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "never".to_string();
    };
    let age = now.signed_duration_since(last);
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    };
    if age.num_minutes() < 1 {
        "just now".to_string()
    } else if age.num_hours() < 1 {
        plural(age.num_minutes(), "minute")
    } else if age.num_days() < 1 {
        plural(age.num_hours(), "hour")
    } else {
        plural(age.num_days(), "day")
    }
}
