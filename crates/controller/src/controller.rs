// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool dispatching keys from the queue to the reconciler

use crate::workqueue::WorkQueue;
use std::sync::Arc;
use tern_core::clock::Clock;
use tern_core::meta::RunKey;
use tern_reconciler::{FlagSource, Outcome, Reconciler};
use tern_store::Cluster;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Parallel workers; keys are still serialized individually
    pub workers: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

/// Serves pipeline-run keys to reconcile workers until shut down
pub struct Controller<C: Cluster, K: Clock, F: FlagSource> {
    reconciler: Arc<Reconciler<C, K, F>>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl<C: Cluster, K: Clock, F: FlagSource> Controller<C, K, F> {
    pub fn new(reconciler: Reconciler<C, K, F>, config: ControllerConfig) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
            config,
        }
    }

    /// The queue, for the watch plumbing that feeds keys in
    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Hand a key to the workers
    pub fn enqueue(&self, key: RunKey) {
        self.queue.add(key);
    }

    /// Stop the workers after their current keys finish
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Run the worker pool to completion (until `shutdown`)
    pub async fn run(&self) {
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            let queue = self.queue.clone();
            let reconciler = self.reconciler.clone();
            workers.spawn(async move {
                debug!(worker, "reconcile worker started");
                while let Some(key) = queue.get().await {
                    let result = reconciler.reconcile(&key).await;
                    queue.done(&key);
                    match result {
                        Ok(Outcome::Done) => {
                            queue.forget(&key);
                        }
                        Ok(Outcome::RequeueAfter(delay)) => {
                            queue.forget(&key);
                            debug!(run = %key, ?delay, "requeueing for deadline");
                            queue.add_after(key, delay);
                        }
                        Err(err) if err.is_transient() => {
                            let delay = queue.backoff(&key);
                            warn!(run = %key, error = %err, ?delay, "transient reconcile failure");
                        }
                        Err(err) => {
                            // Terminal status is already written; the key
                            // only comes back if the object changes
                            error!(run = %key, error = %err, "permanent reconcile failure");
                            queue.forget(&key);
                        }
                    }
                }
                debug!(worker, "reconcile worker stopped");
            });
        }
        while workers.join_next().await.is_some() {}
        info!("controller stopped");
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
