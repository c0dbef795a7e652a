//! Local-then-remote writes with rollback.
//!
//! A mutation applies its change to the projection right away, issues the
//! remote write, and then either folds the authoritative result back in or
//! restores the slice it replaced. Mutations targeting the same entity of the
//! same slice run one after another: each captures its snapshot only once
//! the previous one has settled.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use db::models::entity::EntityId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{
    error::SyncError,
    projection::Projection,
    toast::{Toast, UserNotifier},
};

/// An optimistic change that has been applied locally and whose remote write
/// has not settled yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub seq: u64,
    pub slice: String,
    pub target: EntityId,
    pub started_at: DateTime<Utc>,
}

type QueueMap = DashMap<String, Arc<Mutex<()>>>;

/// Held for the lifetime of one mutation on one entity.
struct EntityPermit {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    queues: Arc<QueueMap>,
}

impl Drop for EntityPermit {
    fn drop(&mut self) {
        // Release first so the map holds the last reference when idle.
        self.guard.take();
        self.queues
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

struct PendingGuard<'a> {
    seq: u64,
    pending: &'a DashMap<u64, PendingMutation>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

pub struct MutationEngine {
    seq: AtomicU64,
    queues: Arc<QueueMap>,
    pending: DashMap<u64, PendingMutation>,
    notifier: Arc<dyn UserNotifier>,
}

impl MutationEngine {
    pub fn new(notifier: Arc<dyn UserNotifier>) -> Self {
        Self {
            seq: AtomicU64::new(0),
            queues: Arc::new(DashMap::new()),
            pending: DashMap::new(),
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<dyn UserNotifier> {
        &self.notifier
    }

    async fn acquire(&self, slice: &str, target: &EntityId) -> EntityPermit {
        let key = format!("{slice}/{target}");
        let lock = self
            .queues
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        EntityPermit {
            key,
            guard: Some(guard),
            queues: self.queues.clone(),
        }
    }

    /// Run one optimistic mutation against `projection`.
    ///
    /// `change` produces the optimistic slice from the current one. On success
    /// `commit` folds the remote result into the slice; on failure the slice
    /// captured before `change` is restored, `failure` is shown as an error
    /// toast, and the error is returned.
    pub async fn perform<S, R, Fut>(
        &self,
        projection: &Projection<S>,
        target: &EntityId,
        failure: &str,
        change: impl FnOnce(&S) -> S,
        remote_write: impl FnOnce() -> Fut,
        commit: impl FnOnce(&mut S, &R),
    ) -> Result<R, SyncError>
    where
        S: Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<R, SyncError>>,
    {
        let _permit = self.acquire(projection.name(), target).await;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = projection.apply(change);
        self.pending.insert(
            seq,
            PendingMutation {
                seq,
                slice: projection.name().to_string(),
                target: target.clone(),
                started_at: Utc::now(),
            },
        );
        let _pending = PendingGuard {
            seq,
            pending: &self.pending,
        };
        debug!(seq, slice = projection.name(), target = %target, "optimistic change applied");

        match remote_write().await {
            Ok(result) => {
                projection.update(|slice| commit(slice, &result));
                debug!(seq, slice = projection.name(), "mutation committed");
                Ok(result)
            }
            Err(err) => {
                projection.replace(previous);
                warn!(
                    seq,
                    slice = projection.name(),
                    target = %target,
                    error = %err,
                    "mutation rolled back"
                );
                self.notifier.notify(Toast::error(failure));
                Err(err)
            }
        }
    }

    /// Report a failed precondition. Nothing has been applied locally.
    pub fn reject(&self, message: impl Into<String>) -> SyncError {
        let message = message.into();
        self.notifier.notify(Toast::error(message.clone()));
        SyncError::Validation(message)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, slice: &str, target: &EntityId) -> bool {
        self.pending
            .iter()
            .any(|entry| entry.slice == slice && &entry.target == target)
    }

    /// In-flight mutations, oldest first.
    pub fn pending(&self) -> Vec<PendingMutation> {
        let mut pending: Vec<_> = self.pending.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|p| p.seq);
        pending
    }

    /// Number of entities with a mutation running or queued.
    pub fn queued_entities(&self) -> usize {
        self.queues.len()
    }
}
