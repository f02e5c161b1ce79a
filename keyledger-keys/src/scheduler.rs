//! Best-effort expiration timers
//!
//! Timers live only as long as the process. `KeyStore::cleanup_expired` is
//! what guarantees expired keys go away; the scheduler just removes them
//! sooner when the process happens to still be running.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::key_store::KeyStore;
use crate::key_types::{KeyEntry, KeyId, Timestamp};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Wait used when nothing is scheduled; any new schedule wakes the loop early
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Delay before retrying a timer whose removal lost a write race
const CONFLICT_RETRY_SECS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledExpiry {
    fire_at: DateTime<Utc>,
    id: KeyId,
}

impl Ord for ScheduledExpiry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the earliest expiry first
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ScheduledExpiry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending expiries, one live entry per id
///
/// Rescheduling or cancelling leaves the old heap entry behind; it is
/// dropped when it reaches the top.
#[derive(Debug, Default)]
pub struct ExpirationQueue {
    heap: BinaryHeap<ScheduledExpiry>,
    due: HashMap<KeyId, DateTime<Utc>>,
}

impl ExpirationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` at `fire_at`, replacing any earlier schedule for it
    pub fn schedule(&mut self, id: KeyId, fire_at: DateTime<Utc>) {
        self.due.insert(id.clone(), fire_at);
        self.heap.push(ScheduledExpiry { fire_at, id });
    }

    pub fn cancel(&mut self, id: &str) -> bool {
        self.due.remove(id).is_some()
    }

    fn is_live(&self, entry: &ScheduledExpiry) -> bool {
        self.due.get(&entry.id) == Some(&entry.fire_at)
    }

    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }

    pub fn next_fire_at(&mut self) -> Option<DateTime<Utc>> {
        self.discard_stale();
        self.heap.peek().map(|entry| entry.fire_at)
    }

    /// Take every id due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<KeyId> {
        let mut due = Vec::new();
        loop {
            self.discard_stale();
            match self.heap.peek() {
                Some(top) if top.fire_at <= now => {
                    if let Some(entry) = self.heap.pop() {
                        self.due.remove(&entry.id);
                        due.push(entry.id);
                    }
                }
                _ => break,
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.due.len()
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}

/// Process-local expiration timers for a key store
pub struct ExpirationScheduler {
    queue: Mutex<ExpirationQueue>,
    wakeup: Notify,
    enabled: bool,
}

impl Default for ExpirationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpirationScheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(ExpirationQueue::new()),
            wakeup: Notify::new(),
            enabled: true,
        }
    }

    /// A scheduler that accepts schedules but never queues them
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn queue(&self) -> MutexGuard<'_, ExpirationQueue> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Arrange for `id` to be expired at `fire_at`. Never fails.
    pub fn schedule(&self, id: &str, fire_at: DateTime<Utc>) {
        if !self.enabled {
            debug!(key_id = %id, "Expiration scheduler disabled, not scheduling");
            return;
        }
        self.queue().schedule(id.to_string(), fire_at);
        self.wakeup.notify_one();
        debug!(key_id = %id, fire_at = %fire_at, "Scheduled key expiry");
    }

    /// Schedule every entry that has a readable expiry; returns how many
    pub fn schedule_entries<'a, I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = &'a KeyEntry>,
    {
        let mut scheduled = 0;
        for entry in entries {
            if let Some(Timestamp::Valid(expires)) = &entry.expires_at {
                self.schedule(&entry.id, *expires);
                scheduled += 1;
            }
        }
        scheduled
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.queue().cancel(id)
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.queue().next_fire_at()
    }

    /// Expire every key due at `now`; returns the ids actually removed
    ///
    /// Failures are logged and swallowed. A removal that lost a write race is
    /// retried a few seconds later.
    pub async fn fire_due(&self, store: &KeyStore, now: DateTime<Utc>) -> Vec<KeyId> {
        let due = self.queue().pop_due(now);
        let mut removed = Vec::new();

        for id in due {
            match store.expire_key(&id, now).await {
                Ok(true) => removed.push(id),
                Ok(false) => {
                    debug!(key_id = %id, "Timer fired for a key that is gone or renewed");
                }
                Err(e) if e.is_conflict() => {
                    warn!(key_id = %id, error = %e, "Timer removal conflicted, retrying later");
                    self.schedule(&id, now + chrono::Duration::seconds(CONFLICT_RETRY_SECS));
                }
                Err(e) => {
                    warn!(key_id = %id, error = %e, "Failed to auto-remove key");
                }
            }
        }

        removed
    }

    /// Run timers and optional periodic sweeps on a background task
    pub fn spawn(
        self: &Arc<Self>,
        store: Arc<KeyStore>,
        sweep_interval: Option<Duration>,
    ) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(self.clone(), store, sweep_interval, shutdown_rx));
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a spawned scheduler task
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the task and wait for it. Pending timers are dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Expiration scheduler task failed");
        }
    }
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run(
    scheduler: Arc<ExpirationScheduler>,
    store: Arc<KeyStore>,
    sweep_interval: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sweep = sweep_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    info!(
        path = store.path(),
        pending = scheduler.pending(),
        sweep_interval_secs = sweep_interval.map(|d| d.as_secs()),
        "Expiration scheduler started"
    );

    loop {
        let wait = scheduler
            .next_fire_at()
            .map(|at| (at - store.now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(IDLE_WAIT);

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = scheduler.wakeup.notified() => continue,
            _ = tokio::time::sleep(wait) => {
                let removed = scheduler.fire_due(&store, store.now()).await;
                if !removed.is_empty() {
                    debug!(removed = removed.len(), "Timers fired");
                }
            }
            _ = next_sweep(&mut sweep) => {
                match store.cleanup().await {
                    Ok(removed) if !removed.is_empty() => {
                        info!(removed = removed.len(), "Periodic sweep removed expired keys");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Periodic sweep failed"),
                }
            }
        }
    }

    info!("Expiration scheduler stopped");
}
