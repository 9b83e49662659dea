//! Change notification batching.
//!
//! Paths accumulate in a pending set until either the debounce window has passed since the
//! most recent notification, or the max-wait ceiling has passed since the first one of the
//! batch. The pending set is then swapped out in one step and handed to the flush worker,
//! so notifications arriving mid-flush start a fresh batch.

use mirror_core::path;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// One drained batch of changed paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub paths: BTreeSet<String>,
}

impl ChangeBatch {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| path::normalize(p.as_ref()))
                .collect(),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(&path::normalize(path))
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

/// The currently accumulating set of changed paths.
#[derive(Debug, Default)]
pub struct PendingChanges {
    paths: BTreeSet<String>,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notification received at `now`. Empty notifications are ignored.
    pub fn push<I>(&mut self, paths: I, now: Instant)
    where
        I: IntoIterator<Item = String>,
    {
        let before = self.paths.len();
        let mut any = false;
        for p in paths {
            any = true;
            self.paths.insert(path::normalize(&p));
        }
        if !any {
            return;
        }
        if self.first_at.is_none() {
            self.first_at = Some(now);
        }
        self.last_at = Some(now);
        debug!(
            "Pending changes: {} (+{})",
            self.paths.len(),
            self.paths.len() - before
        );
    }

    pub fn is_empty(&self) -> bool {
        self.first_at.is_none()
    }

    /// When the pending batch must be flushed, if anything is pending.
    pub fn deadline(&self, debounce: Duration, max_wait: Duration) -> Option<Instant> {
        let first = self.first_at?;
        let last = self.last_at.unwrap_or(first);
        Some((last + debounce).min(first + max_wait))
    }

    /// Drain the batch; the next notification starts a new one.
    pub fn take(&mut self) -> ChangeBatch {
        self.first_at = None;
        self.last_at = None;
        ChangeBatch {
            paths: std::mem::take(&mut self.paths),
        }
    }
}

/// Timer loop turning raw notifications into flush batches.
pub struct ChangeAggregator {
    debounce: Duration,
    max_wait: Duration,
    changes: mpsc::UnboundedReceiver<Vec<String>>,
    batches: mpsc::UnboundedSender<ChangeBatch>,
    pending: PendingChanges,
}

impl ChangeAggregator {
    /// Returns the aggregator, the sender for raw notifications and the batch receiver.
    pub fn new(
        debounce: Duration,
        max_wait: Duration,
    ) -> (
        Self,
        mpsc::UnboundedSender<Vec<String>>,
        mpsc::UnboundedReceiver<ChangeBatch>,
    ) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let aggregator = Self {
            debounce,
            max_wait,
            changes: change_rx,
            batches: batch_tx,
            pending: PendingChanges::new(),
        };
        (aggregator, change_tx, batch_rx)
    }

    /// Run until the notification sender or the batch receiver goes away.
    ///
    /// Whatever is still pending when notifications stop is dropped.
    pub async fn run(mut self) {
        loop {
            let deadline = self.pending.deadline(self.debounce, self.max_wait);
            let expired = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = self.changes.recv() => match changed {
                    Some(paths) => self.pending.push(paths, Instant::now()),
                    None => break,
                },
                _ = expired => {
                    let batch = self.pending.take();
                    debug!("Flushing {} changed path(s)", batch.len());
                    if self.batches.send(batch).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Change aggregator stopped");
    }
}
