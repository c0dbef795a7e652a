//! Realtime reconciliation.
//!
//! Each consumer registers under a key (for example `checklist:<task_id>`)
//! with the collections it depends on and a [`SliceReconciler`] that knows how
//! to bring its slice up to date. The channel keeps one background task per
//! key no matter how many handles share it, re-fetches the whole slice every
//! time the subscription is (re)established, and drops change events it has
//! already applied.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{StreamExt, stream::select_all};
use remote::{ChangeEvent, ChangeFeed, CollectionDescriptor, RemoteError, Subscription};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{
    config::SyncConfig,
    dedup::DedupSet,
    error::SyncError,
    toast::{Toast, UserNotifier},
};

/// Brings one slice in line with the backend.
#[async_trait]
pub trait SliceReconciler: Send + Sync {
    /// Re-fetch the whole slice.
    async fn resync(&self) -> Result<(), SyncError>;

    /// Merge one change. Applying the same event twice must leave the slice
    /// as applying it once did.
    async fn apply(&self, event: &ChangeEvent) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribePolicy {
    pub attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl ResubscribePolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            attempts: config.resubscribe_attempts,
            min_delay: Duration::from_millis(config.resubscribe_min_delay_ms),
            max_delay: Duration::from_millis(config.resubscribe_max_delay_ms),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.attempts)
            .with_jitter()
    }
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

struct Registration {
    id: u64,
    refs: usize,
    task: JoinHandle<()>,
}

type Registry = DashMap<String, Registration>;

#[derive(Clone)]
pub struct RealtimeChannel {
    feed: Arc<dyn ChangeFeed>,
    dedup: Arc<DedupSet>,
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
    policy: ResubscribePolicy,
    notifier: Option<Arc<dyn UserNotifier>>,
}

impl RealtimeChannel {
    pub fn new(feed: Arc<dyn ChangeFeed>, dedup: Arc<DedupSet>, policy: ResubscribePolicy) -> Self {
        Self {
            feed,
            dedup,
            registry: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            policy,
            notifier: None,
        }
    }

    /// Report subscriptions that could not be re-established to the user.
    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn dedup(&self) -> &Arc<DedupSet> {
        &self.dedup
    }

    /// Start watching `collections` for `key`, or share the existing
    /// subscription if `key` is already registered. In that case the first
    /// registrant's reconciler keeps serving the key.
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        collections: Vec<CollectionDescriptor>,
        reconciler: Arc<dyn SliceReconciler>,
    ) -> SubscriptionHandle {
        let key = key.into();
        let mut entry = self.registry.entry(key.clone());
        let shared = match &mut entry {
            // A task that gave up is replaced rather than shared.
            Entry::Occupied(occupied) if !occupied.get().task.is_finished() => {
                let registration = occupied.get_mut();
                registration.refs += 1;
                debug!(key = %key, refs = registration.refs, "sharing realtime subscription");
                Some(registration.id)
            }
            _ => None,
        };
        let id = match shared {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                info!(key = %key, collections = collections.len(), "opening realtime subscription");
                let task = tokio::spawn(run_subscription(
                    SubscriptionTask {
                        key: key.clone(),
                        id,
                        registry: self.registry.clone(),
                        notifier: self.notifier.clone(),
                    },
                    self.feed.clone(),
                    collections,
                    reconciler,
                    self.dedup.clone(),
                    self.policy,
                ));
                let registration = Registration { id, refs: 1, task };
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(registration);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(registration);
                    }
                }
                id
            }
        };
        SubscriptionHandle {
            key,
            id,
            registry: self.registry.clone(),
            released: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.registry.contains_key(key)
    }

    pub fn ref_count(&self, key: &str) -> usize {
        self.registry.get(key).map(|r| r.refs).unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Tear down every subscription and forget every applied event.
    pub fn shutdown(&self) {
        let before = self.registry.len();
        self.registry.retain(|_, registration| {
            registration.task.abort();
            false
        });
        self.dedup.clear();
        info!(subscriptions = before, "realtime channel shut down");
    }
}

async fn open_all(
    feed: &dyn ChangeFeed,
    collections: &[CollectionDescriptor],
) -> Result<Vec<Subscription>, RemoteError> {
    let mut subscriptions = Vec::with_capacity(collections.len());
    for descriptor in collections {
        subscriptions.push(feed.subscribe(descriptor).await?);
    }
    Ok(subscriptions)
}

/// Identity of one subscription task within the registry.
struct SubscriptionTask {
    key: String,
    id: u64,
    registry: Arc<Registry>,
    notifier: Option<Arc<dyn UserNotifier>>,
}

impl SubscriptionTask {
    /// Drop this task's registration so the key can be subscribed afresh.
    fn give_up(&self) {
        self.registry
            .remove_if(&self.key, |_, registration| registration.id == self.id);
        if let Some(notifier) = &self.notifier {
            notifier.notify(Toast::error(
                "Live updates stopped. Reopen the view to reconnect.",
            ));
        }
    }
}

async fn run_subscription(
    task: SubscriptionTask,
    feed: Arc<dyn ChangeFeed>,
    collections: Vec<CollectionDescriptor>,
    reconciler: Arc<dyn SliceReconciler>,
    dedup: Arc<DedupSet>,
    policy: ResubscribePolicy,
) {
    let key = task.key.clone();
    loop {
        let opened = (|| async { open_all(feed.as_ref(), &collections).await })
            .retry(policy.backoff())
            .notify(|e: &RemoteError, dur: Duration| {
                warn!(
                    key = %key,
                    "realtime subscribe failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await;
        let subscriptions = match opened {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(key = %key, error = %e, "giving up on realtime subscription");
                task.give_up();
                return;
            }
        };

        // Events missed while disconnected are only recovered by a full fetch.
        if let Err(e) = reconciler.resync().await {
            warn!(key = %key, error = %e, "resync failed");
        }

        let mut events = select_all(subscriptions);
        while let Some(event) = events.next().await {
            let dedup_key = format!("{key}:{}", event.event_id);
            if !dedup.first_sighting(&dedup_key) {
                debug!(key = %key, event_id = %event.event_id, "duplicate change event dropped");
                continue;
            }
            if let Err(e) = reconciler.apply(&event).await {
                warn!(
                    key = %key,
                    collection = %event.collection,
                    error = %e,
                    "failed to apply change event"
                );
            }
        }
        warn!(key = %key, "realtime stream closed, resubscribing");
    }
}

/// One consumer's share of a keyed subscription. Released on
/// [`SubscriptionHandle::unsubscribe`] or drop, whichever comes first.
pub struct SubscriptionHandle {
    key: String,
    id: u64,
    registry: Arc<Registry>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Entry::Occupied(mut entry) = self.registry.entry(self.key.clone()) {
            // The key may have been torn down and registered again since.
            if entry.get().id != self.id {
                return;
            }
            let registration = entry.get_mut();
            registration.refs = registration.refs.saturating_sub(1);
            if registration.refs == 0 {
                entry.remove().task.abort();
                info!(key = %self.key, "closed realtime subscription");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}
