//! Shared fixtures for the service tests.

use std::{sync::Arc, time::Duration};

use db::models::entity::Row;
use remote::{Gateway, memory::InMemoryBackend};
use serde_json::Value;
use uuid::Uuid;

use super::{
    config::SyncConfig,
    dedup::DedupSet,
    entities::EntityGateway,
    optimistic::MutationEngine,
    realtime::{RealtimeChannel, ResubscribePolicy},
    toast::ToastQueue,
};

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

pub struct Harness {
    pub backend: Arc<InMemoryBackend>,
    pub entities: EntityGateway,
    pub engine: Arc<MutationEngine>,
    pub toasts: Arc<ToastQueue>,
    pub realtime: RealtimeChannel,
    pub user: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let user = Uuid::new_v4();
        backend.set_current_user(Some(user));
        let gateway = Gateway::from_backend(backend.clone());
        let toasts = Arc::new(ToastQueue::new());
        let engine = Arc::new(MutationEngine::new(toasts.clone()));
        let policy = ResubscribePolicy {
            attempts: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let realtime = RealtimeChannel::new(
            gateway.changes.clone(),
            Arc::new(DedupSet::new(SyncConfig::default().dedup_capacity)),
            policy,
        )
        .with_notifier(toasts.clone());
        Self {
            entities: EntityGateway::new(gateway, timeout),
            backend,
            engine,
            toasts,
            realtime,
            user,
        }
    }

    /// Descriptions of every toast raised so far.
    pub fn toast_messages(&self) -> Vec<String> {
        self.toasts
            .drain()
            .into_iter()
            .map(|t| t.description)
            .collect()
    }
}
