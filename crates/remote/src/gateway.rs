use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use crate::{
    change::ChangeEvent,
    error::RemoteError,
    query::{CollectionDescriptor, Query, Row},
};

pub type UserId = Uuid;

/// Row-level CRUD against backend collections.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a row and return it as stored, with the backend-assigned id.
    async fn create(&self, collection: &str, row: Row) -> Result<Row, RemoteError>;

    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<Row, RemoteError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    async fn query(&self, query: &Query) -> Result<Vec<Row>, RemoteError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        descriptor: &CollectionDescriptor,
    ) -> Result<Subscription, RemoteError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` and return the stored object path.
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<String, RemoteError>;

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, RemoteError>;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<UserId>, RemoteError>;
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Live stream of change events for one collection descriptor.
///
/// Dropping the subscription unsubscribes. The stream ends when the backend
/// drops the channel, which callers treat as a disconnect.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    teardown: Option<Teardown>,
    closed: bool,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self {
            events,
            teardown: None,
            closed: false,
        }
    }

    pub fn with_teardown(mut self, teardown: impl FnOnce() + Send + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// Stop receiving events. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.events.close();
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.events.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Handles to every backend capability, cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    pub entities: Arc<dyn EntityStore>,
    pub changes: Arc<dyn ChangeFeed>,
    pub objects: Arc<dyn ObjectStore>,
    pub session: Arc<dyn SessionProvider>,
}

impl Gateway {
    /// Build a gateway from one backend that serves every capability.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: EntityStore + ChangeFeed + ObjectStore + SessionProvider + 'static,
    {
        Self {
            entities: backend.clone(),
            changes: backend.clone(),
            objects: backend.clone(),
            session: backend,
        }
    }
}
