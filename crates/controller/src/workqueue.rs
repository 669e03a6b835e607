// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! De-duplicating, per-key-serializing work queue.
//!
//! A key is in at most one of three places: queued, delayed or active.
//! Adding a key that is already queued is a no-op; adding a key that is
//! active marks it dirty so it re-queues the moment its worker finishes.
//! This guarantees at most one reconcile per key at a time while never
//! losing a notification.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tern_core::meta::RunKey;
use tokio::sync::Notify;
use tokio::time::Instant;

/// First retry delay for a failing key
const BASE_BACKOFF: Duration = Duration::from_millis(200);
/// Retry delays stop growing here
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Inner {
    queue: VecDeque<RunKey>,
    queued: HashSet<RunKey>,
    active: HashSet<RunKey>,
    dirty: HashSet<RunKey>,
    delayed: BinaryHeap<Reverse<(Instant, RunKey)>>,
    failures: HashMap<RunKey, u32>,
    shutdown: bool,
}

impl Inner {
    fn enqueue(&mut self, key: RunKey) -> bool {
        if self.active.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if !self.queued.insert(key.clone()) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Move due delayed keys into the queue; true if any moved
    fn promote_due(&mut self, now: Instant) -> bool {
        let mut moved = false;
        while let Some(Reverse((at, _))) = self.delayed.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((_, key))) = self.delayed.pop() else {
                break;
            };
            moved |= self.enqueue(key);
        }
        moved
    }

    fn next_delayed(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse((at, _))| *at)
    }
}

/// The queue served to reconcile workers
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a key for processing. Duplicates collapse; keys being
    /// processed re-queue when their worker finishes.
    pub fn add(&self, key: RunKey) {
        if self.lock().enqueue(key) {
            self.notify.notify_one();
        }
    }

    /// Add a key after a delay, e.g. to fire a deadline
    pub fn add_after(&self, key: RunKey, delay: Duration) {
        self.lock()
            .delayed
            .push(Reverse((Instant::now() + delay, key)));
        self.notify.notify_one();
    }

    /// Schedule a failing key with exponential backoff; returns the delay
    pub fn backoff(&self, key: &RunKey) -> Duration {
        let delay = {
            let mut inner = self.lock();
            let failures = inner.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            let exp = failures.saturating_sub(1).min(16);
            let delay = BASE_BACKOFF.saturating_mul(1u32 << exp).min(MAX_BACKOFF);
            inner
                .delayed
                .push(Reverse((Instant::now() + delay, key.clone())));
            delay
        };
        self.notify.notify_one();
        delay
    }

    /// Reset the failure counter once a key reconciles cleanly
    pub fn forget(&self, key: &RunKey) {
        self.lock().failures.remove(key);
    }

    /// Mark a key's processing finished; a dirty key re-queues
    pub fn done(&self, key: &RunKey) {
        let requeued = {
            let mut inner = self.lock();
            inner.active.remove(key);
            if inner.dirty.remove(key) {
                inner.enqueue(key.clone())
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys; waiting workers unblock with `None`
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    /// Next key to process, waiting if none is ready. Returns `None`
    /// once the queue shuts down.
    pub async fn get(&self) -> Option<RunKey> {
        loop {
            let notified = self.notify.notified();
            let next_deadline;
            {
                let mut inner = self.lock();
                inner.promote_due(Instant::now());
                if let Some(key) = inner.queue.pop_front() {
                    inner.queued.remove(&key);
                    inner.active.insert(key.clone());
                    return Some(key);
                }
                if inner.shutdown {
                    return None;
                }
                next_deadline = inner.next_delayed();
            }
            match next_deadline {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Queued plus delayed count, for observability and tests
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.queue.len() + inner.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "workqueue_tests.rs"]
mod tests;
