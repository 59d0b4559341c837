//! History-sync completion notice.
//!
//! A generation counter behind a `tokio::sync::watch` channel. Notifying only
//! bumps the counter, so the producer never blocks and notices raised while
//! nobody is subscribed are not delivered to anyone. A waiter observes every
//! notice raised after it subscribed, including one raised before it started
//! awaiting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// How a bounded wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A completion notice arrived
    Completed,
    /// The wait bound elapsed first
    TimedOut,
    /// The caller's cancellation fired first
    Cancelled,
}

impl WaitOutcome {
    /// Label value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Producer side, shared by ingestion and the scheduler
#[derive(Debug, Clone)]
pub struct SyncSignal {
    generation: Arc<watch::Sender<u64>>,
}

impl Default for SyncSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSignal {
    /// Create a signal nobody has raised yet.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { generation: Arc::new(tx) }
    }

    /// Raise a completion notice. Never blocks.
    pub fn notify(&self) {
        self.generation.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Number of notices raised so far
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Start listening; only notices raised from now on count.
    #[must_use]
    pub fn subscribe(&self) -> SyncWaiter {
        SyncWaiter {
            rx: self.generation.subscribe(),
        }
    }
}

/// Consumer side of [`SyncSignal`]
#[derive(Debug)]
pub struct SyncWaiter {
    rx: watch::Receiver<u64>,
}

impl SyncWaiter {
    /// Wait for the next notice, bounded by `timeout` and by `cancel`,
    /// whichever fires first.
    pub async fn wait<F>(&mut self, timeout: Duration, cancel: F) -> WaitOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            Ok(()) = self.rx.changed() => WaitOutcome::Completed,
            () = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            () = cancel => WaitOutcome::Cancelled,
        }
    }
}
