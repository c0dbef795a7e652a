//! In-process backend used by tests and local development.
//!
//! Behaves like the hosted backend closely enough to exercise the sync core:
//! ids are assigned on insert, every write is echoed on the change feed, and
//! tests can inject failures, stall writes, publish raw events or cut every
//! live subscription.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{
    change::{ChangeEvent, ChangeKind},
    error::RemoteError,
    gateway::{ChangeFeed, EntityStore, ObjectStore, SessionProvider, Subscription, UserId},
    query::{CollectionDescriptor, Query, Row},
};

const DEFAULT_PUBLIC_BASE: &str = "http://localhost:54321/storage/v1/object/public/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub kind: ChangeKind,
    pub collection: String,
    pub id: String,
}

struct Subscriber {
    id: u64,
    descriptor: CollectionDescriptor,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Row>>,
    subscribers: Vec<Subscriber>,
    objects: HashMap<(String, String), Vec<u8>>,
    current_user: Option<UserId>,
    failures: HashMap<String, VecDeque<RemoteError>>,
    subscribe_failures: HashMap<String, usize>,
    stalled: HashSet<String>,
    withheld: HashSet<String>,
    writes: Vec<WriteRecord>,
    next_event: u64,
    next_subscriber: u64,
}

impl State {
    fn take_failure(&mut self, collection: &str) -> Option<RemoteError> {
        self.failures.get_mut(collection)?.pop_front()
    }

    fn dispatch(&mut self, collection: &str, kind: ChangeKind, entity_id: &str, row: Row) {
        self.next_event += 1;
        let event = ChangeEvent {
            event_id: format!("evt-{}", self.next_event),
            collection: collection.to_string(),
            kind,
            entity_id: entity_id.to_string(),
            row: Some(row),
        };
        self.broadcast(event);
    }

    fn broadcast(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|sub| {
            if !sub.descriptor.matches(&event.collection, event.row.as_ref()) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }
}

#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
    resume: Arc<Notify>,
    public_base: String,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            resume: Arc::new(Notify::new()),
            public_base: DEFAULT_PUBLIC_BASE.to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_current_user(&self, user: Option<UserId>) {
        self.lock().current_user = user;
    }

    /// Make the next request touching `collection` fail with `error`.
    pub fn fail_next(&self, collection: &str, error: RemoteError) {
        self.lock()
            .failures
            .entry(collection.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make the next `count` subscribe attempts on `collection` fail.
    pub fn fail_subscriptions(&self, collection: &str, count: usize) {
        self.lock()
            .subscribe_failures
            .insert(collection.to_string(), count);
    }

    /// While stalled, writes to `collection` never complete.
    pub fn stall_writes(&self, collection: &str, stalled: bool) {
        let mut state = self.lock();
        if stalled {
            state.stalled.insert(collection.to_string());
        } else {
            state.stalled.remove(collection);
        }
        drop(state);
        self.resume.notify_waiters();
    }

    /// Insert rows without emitting change events.
    pub fn seed(&self, collection: &str, rows: impl IntoIterator<Item = Row>) {
        let mut state = self.lock();
        let table = state.tables.entry(collection.to_string()).or_default();
        for mut row in rows {
            row.entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            table.push(row);
        }
    }

    /// Insert a row on behalf of another client, echoing it on the feed.
    pub fn insert_external(&self, collection: &str, row: Row) -> Row {
        let mut state = self.lock();
        insert_row(&mut state, collection, row)
    }

    /// Push a raw event to matching subscribers, bypassing the tables.
    pub fn publish(&self, event: ChangeEvent) {
        self.lock().broadcast(event);
    }

    /// Sever every live subscription, as a dropped connection would.
    pub fn drop_subscriptions(&self) {
        self.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn object_paths(&self, bucket: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, path)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Writes applied so far, in the order they reached the backend.
    /// While held, creates on `collection` are applied and echoed on the
    /// feed, but the caller does not get its response until released.
    pub fn hold_responses(&self, collection: &str, held: bool) {
        let mut state = self.lock();
        if held {
            state.withheld.insert(collection.to_string());
        } else {
            state.withheld.remove(collection);
        }
        drop(state);
        self.resume.notify_waiters();
    }

    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    async fn wait_until_writable(&self, collection: &str) {
        self.wait_while(|state| state.stalled.contains(collection))
            .await;
    }

    async fn wait_while(&self, blocked: impl Fn(&State) -> bool) {
        loop {
            let resumed = self.resume.notified();
            let waiting = blocked(&self.lock());
            if !waiting {
                return;
            }
            resumed.await;
        }
    }
}

fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn insert_row(state: &mut State, collection: &str, mut row: Row) -> Row {
    let id = Uuid::new_v4().to_string();
    row.insert("id".to_string(), Value::String(id.clone()));
    let now = timestamp();
    row.entry("created_at").or_insert_with(|| now.clone());
    row.entry("updated_at").or_insert(now);
    state
        .tables
        .entry(collection.to_string())
        .or_default()
        .push(row.clone());
    state.writes.push(WriteRecord {
        kind: ChangeKind::Insert,
        collection: collection.to_string(),
        id: id.clone(),
    });
    state.dispatch(collection, ChangeKind::Insert, &id, row.clone());
    row
}

#[async_trait]
impl EntityStore for InMemoryBackend {
    async fn create(&self, collection: &str, row: Row) -> Result<Row, RemoteError> {
        self.wait_until_writable(collection).await;
        let stored = {
            let mut state = self.lock();
            if let Some(err) = state.take_failure(collection) {
                return Err(err);
            }
            insert_row(&mut state, collection, row)
        };
        self.wait_while(|state| state.withheld.contains(collection))
            .await;
        Ok(stored)
    }

    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<Row, RemoteError> {
        self.wait_until_writable(collection).await;
        let mut state = self.lock();
        if let Some(err) = state.take_failure(collection) {
            return Err(err);
        }
        let not_found = || RemoteError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        let stored = state
            .tables
            .get_mut(collection)
            .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
            .ok_or_else(not_found)?;
        for (key, value) in patch {
            if key != "id" {
                stored.insert(key, value);
            }
        }
        let row = stored.clone();
        state.writes.push(WriteRecord {
            kind: ChangeKind::Update,
            collection: collection.to_string(),
            id: id.to_string(),
        });
        state.dispatch(collection, ChangeKind::Update, id, row.clone());
        Ok(row)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.wait_until_writable(collection).await;
        let mut state = self.lock();
        if let Some(err) = state.take_failure(collection) {
            return Err(err);
        }
        let rows = state.tables.get_mut(collection);
        let position = rows
            .as_ref()
            .and_then(|rows| rows.iter().position(|r| row_id(r) == Some(id)));
        let (Some(rows), Some(position)) = (rows, position) else {
            return Err(RemoteError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        let old = rows.remove(position);
        state.writes.push(WriteRecord {
            kind: ChangeKind::Delete,
            collection: collection.to_string(),
            id: id.to_string(),
        });
        state.dispatch(collection, ChangeKind::Delete, id, old);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Row>, RemoteError> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(&query.collection) {
            return Err(err);
        }
        let mut rows: Vec<Row> = state
            .tables
            .get(&query.collection)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| query.compare_rows(a, b));
        if let Some(range) = query.range {
            rows = rows.into_iter().skip(range.offset).take(range.limit).collect();
        }
        Ok(rows)
    }
}

#[async_trait]
impl ChangeFeed for InMemoryBackend {
    async fn subscribe(
        &self,
        descriptor: &CollectionDescriptor,
    ) -> Result<Subscription, RemoteError> {
        let mut state = self.lock();
        if let Some(remaining) = state.subscribe_failures.get_mut(&descriptor.collection) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::SubscriptionFailed(descriptor.to_string()));
            }
        }
        state.next_subscriber += 1;
        let id = state.next_subscriber;
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(Subscriber {
            id,
            descriptor: descriptor.clone(),
            tx,
        });
        debug!(subscriber = id, descriptor = %descriptor, "subscribed");

        let shared = Arc::downgrade(&self.state);
        Ok(Subscription::new(rx).with_teardown(move || {
            if let Some(state) = shared.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.subscribers.retain(|s| s.id != id);
            }
        }))
    }
}

#[async_trait]
impl ObjectStore for InMemoryBackend {
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String, RemoteError> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(bucket) {
            return Err(err);
        }
        state
            .objects
            .insert((bucket.to_string(), path.to_string()), bytes);
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, RemoteError> {
        Url::parse(&format!("{}{bucket}/{path}", self.public_base))
            .map_err(|e| RemoteError::Storage(e.to_string()))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if let Some(err) = state.take_failure(bucket) {
            return Err(err);
        }
        for path in paths {
            state.objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionProvider for InMemoryBackend {
    async fn current_user(&self) -> Result<Option<UserId>, RemoteError> {
        Ok(self.lock().current_user)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::query::Filter;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_assigns_id_and_echoes_insert() {
        let backend = InMemoryBackend::new();
        let mut sub = backend
            .subscribe(&CollectionDescriptor::all("tasks"))
            .await
            .unwrap();

        let stored = backend
            .create("tasks", row(json!({"title": "a"})))
            .await
            .unwrap();
        let id = stored["id"].as_str().unwrap().to_string();
        assert!(stored.contains_key("created_at"));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.entity_id, id);
    }

    #[tokio::test]
    async fn scoped_subscription_only_sees_matching_rows() {
        let backend = InMemoryBackend::new();
        let mut sub = backend
            .subscribe(&CollectionDescriptor::scoped(
                "checklist_items",
                Filter::eq("task_id", "t1"),
            ))
            .await
            .unwrap();
        backend.insert_external("checklist_items", row(json!({"task_id": "t2"})));
        backend.insert_external("checklist_items", row(json!({"task_id": "t1"})));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.row.unwrap()["task_id"], json!("t1"));
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let backend = InMemoryBackend::new();
        backend.fail_next("tasks", RemoteError::request("boom", None));
        assert!(backend.create("tasks", Row::new()).await.is_err());
        assert!(backend.create("tasks", Row::new()).await.is_ok());
        assert_eq!(backend.rows("tasks").len(), 1);
    }

    #[tokio::test]
    async fn update_merges_and_delete_echoes_old_row() {
        let backend = InMemoryBackend::new();
        let stored = backend
            .create("tasks", row(json!({"title": "a", "status": "Backlog"})))
            .await
            .unwrap();
        let id = stored["id"].as_str().unwrap().to_string();
        let mut sub = backend
            .subscribe(&CollectionDescriptor::all("tasks"))
            .await
            .unwrap();

        let updated = backend
            .update("tasks", &id, row(json!({"status": "Blocked"})))
            .await
            .unwrap();
        assert_eq!(updated["title"], json!("a"));
        assert_eq!(updated["status"], json!("Blocked"));

        backend.delete("tasks", &id).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().kind, ChangeKind::Update);
        let deleted = sub.recv().await.unwrap();
        assert_eq!(deleted.kind, ChangeKind::Delete);
        assert_eq!(deleted.row.unwrap()["status"], json!("Blocked"));

        assert!(matches!(
            backend.delete("tasks", &id).await,
            Err(RemoteError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn query_filters_orders_and_pages() {
        let backend = InMemoryBackend::new();
        backend.seed(
            "items",
            (0..5).map(|i| {
                let parity = if i % 2 == 0 { "even" } else { "odd" };
                row(json!({"position": i, "task_id": parity}))
            }),
        );
        let rows = backend
            .query(
                &Query::new("items")
                    .eq("task_id", "even")
                    .order_by("position", false)
                    .range(1, 5),
            )
            .await
            .unwrap();
        let positions: Vec<_> = rows.iter().map(|r| r["position"].clone()).collect();
        assert_eq!(positions, vec![json!(2), json!(0)]);
    }

    #[tokio::test]
    async fn stalled_writes_resume_when_released() {
        let backend = InMemoryBackend::new();
        backend.stall_writes("tasks", true);
        let writer = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.create("tasks", Row::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(backend.rows("tasks").is_empty());

        backend.stall_writes("tasks", false);
        writer.await.unwrap().unwrap();
        assert_eq!(backend.rows("tasks").len(), 1);
    }

    #[tokio::test]
    async fn held_create_echoes_before_responding() {
        let backend = InMemoryBackend::new();
        let mut sub = backend
            .subscribe(&CollectionDescriptor::all("tasks"))
            .await
            .unwrap();
        backend.hold_responses("tasks", true);
        let writer = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.create("tasks", Row::new()).await })
        };

        let echo = sub.recv().await.unwrap();
        assert_eq!(echo.kind, ChangeKind::Insert);
        assert!(!writer.is_finished());

        backend.hold_responses("tasks", false);
        let stored = writer.await.unwrap().unwrap();
        assert_eq!(stored["id"], json!(echo.entity_id));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let backend = InMemoryBackend::new();
        let sub = backend
            .subscribe(&CollectionDescriptor::all("tasks"))
            .await
            .unwrap();
        assert_eq!(backend.subscriber_count(), 1);
        drop(sub);
        assert_eq!(backend.subscriber_count(), 0);

        backend.fail_subscriptions("tasks", 1);
        assert!(backend.subscribe(&CollectionDescriptor::all("tasks")).await.is_err());
        assert!(backend.subscribe(&CollectionDescriptor::all("tasks")).await.is_ok());
    }

    #[test]
    fn public_url_points_into_bucket() {
        let backend = InMemoryBackend::new();
        let url = backend.public_url("task-attachments", "t1/a.png").unwrap();
        assert!(url.as_str().ends_with("/object/public/task-attachments/t1/a.png"));
    }
}
