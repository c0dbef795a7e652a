//! Typed access to the backend.
//!
//! Everything the feature slices send or receive passes through here: DTOs
//! are encoded into rows, rows are decoded into models, provisional ids are
//! refused before they can reach the backend, and every call is bounded by
//! the configured timeout.

use std::{future::Future, sync::Arc, time::Duration};

use db::models::entity::{Entity, EntityId, decode_row, encode_row, find_provisional};
use remote::{ChangeFeed, Gateway, Query, RemoteError, UserId};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use url::Url;

use super::error::SyncError;

#[derive(Clone)]
pub struct EntityGateway {
    gateway: Gateway,
    timeout: Option<Duration>,
}

impl EntityGateway {
    pub fn new(gateway: Gateway, timeout: Option<Duration>) -> Self {
        Self { gateway, timeout }
    }

    pub fn changes(&self) -> Arc<dyn ChangeFeed> {
        self.gateway.changes.clone()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, SyncError> {
        let Some(limit) = self.timeout else {
            return Ok(call.await?);
        };
        match tokio::time::timeout(limit, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(operation, timeout = ?limit, "remote call timed out");
                Err(SyncError::Timeout(limit))
            }
        }
    }

    fn refuse_provisional_id(id: &EntityId) -> Result<(), SyncError> {
        if id.is_provisional() {
            return Err(SyncError::ProvisionalLeak(id.to_string()));
        }
        Ok(())
    }

    fn encode<D: Serialize + ?Sized>(dto: &D) -> Result<remote::Row, SyncError> {
        let row = encode_row(dto)?;
        if let Some(id) = find_provisional(&row) {
            return Err(SyncError::ProvisionalLeak(id.to_string()));
        }
        Ok(row)
    }

    pub async fn create<E, D>(&self, dto: &D) -> Result<E, SyncError>
    where
        E: Entity + DeserializeOwned,
        D: Serialize + ?Sized,
    {
        let row = Self::encode(dto)?;
        let stored = self
            .bounded("create", self.gateway.entities.create(E::COLLECTION, row))
            .await?;
        debug!(collection = E::COLLECTION, "row created");
        Ok(decode_row(E::COLLECTION, stored)?)
    }

    pub async fn update<E, D>(&self, id: &EntityId, patch: &D) -> Result<E, SyncError>
    where
        E: Entity + DeserializeOwned,
        D: Serialize + ?Sized,
    {
        Self::refuse_provisional_id(id)?;
        let patch = Self::encode(patch)?;
        let stored = self
            .bounded(
                "update",
                self.gateway
                    .entities
                    .update(E::COLLECTION, id.as_str(), patch),
            )
            .await?;
        Ok(decode_row(E::COLLECTION, stored)?)
    }

    pub async fn delete<E: Entity>(&self, id: &EntityId) -> Result<(), SyncError> {
        Self::refuse_provisional_id(id)?;
        self.bounded(
            "delete",
            self.gateway.entities.delete(E::COLLECTION, id.as_str()),
        )
        .await
    }

    /// Run `query` and decode each row. Rows that do not match the model are
    /// logged and left out.
    pub async fn query<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, SyncError> {
        let rows = self
            .bounded("query", self.gateway.entities.query(query))
            .await?;
        let total = rows.len();
        let decoded: Vec<T> = rows
            .into_iter()
            .filter_map(|row| match decode_row(&query.collection, row) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "skipping invalid row");
                    None
                }
            })
            .collect();
        if decoded.len() != total {
            debug!(
                collection = %query.collection,
                kept = decoded.len(),
                total,
                "query returned invalid rows"
            );
        }
        Ok(decoded)
    }

    pub async fn current_user(&self) -> Result<Option<UserId>, SyncError> {
        self.bounded("current_user", self.gateway.session.current_user())
            .await
    }

    pub async fn require_user(&self) -> Result<UserId, SyncError> {
        self.current_user().await?.ok_or(SyncError::Unauthenticated)
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<String, SyncError> {
        self.bounded("put_object", self.gateway.objects.put(bucket, path, bytes))
            .await
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> Result<Url, SyncError> {
        Ok(self.gateway.objects.public_url(bucket, path)?)
    }

    pub async fn remove_objects(&self, bucket: &str, paths: &[String]) -> Result<(), SyncError> {
        self.bounded("remove_objects", self.gateway.objects.remove(bucket, paths))
            .await
    }
}

#[cfg(test)]
mod tests {
    use db::models::{
        checklist::{ChecklistItem, CreateChecklistItem, UpdateChecklistItem},
        entity::Row,
    };
    use remote::memory::InMemoryBackend;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn setup(timeout: Option<Duration>) -> (Arc<InMemoryBackend>, EntityGateway) {
        let backend = Arc::new(InMemoryBackend::new());
        let gateway = EntityGateway::new(Gateway::from_backend(backend.clone()), timeout);
        (backend, gateway)
    }

    fn new_item(task_id: Uuid) -> CreateChecklistItem {
        CreateChecklistItem {
            task_id,
            title: "Buy milk".to_string(),
            completed: false,
            created_by: None,
            mentions: Vec::new(),
            position: 0,
        }
    }

    #[tokio::test]
    async fn create_returns_decoded_entity_with_real_id() {
        let (_backend, gateway) = setup(None);
        let item: ChecklistItem = gateway.create(&new_item(Uuid::new_v4())).await.unwrap();
        assert!(!item.id.is_provisional());
        assert!(item.created_at.is_some());
    }

    #[tokio::test]
    async fn provisional_ids_never_reach_the_backend() {
        let (backend, gateway) = setup(None);
        let temp = EntityId::provisional();

        let err = gateway
            .update::<ChecklistItem, _>(&temp, &UpdateChecklistItem { completed: true })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ProvisionalLeak(_)));

        let mut leaking = Row::new();
        leaking.insert("task_id".into(), json!(temp.as_str()));
        let err = gateway
            .create::<ChecklistItem, _>(&leaking)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ProvisionalLeak(_)));

        assert!(matches!(
            gateway.delete::<ChecklistItem>(&temp).await,
            Err(SyncError::ProvisionalLeak(_))
        ));
        assert!(backend.write_log().is_empty());
    }

    #[tokio::test]
    async fn query_skips_rows_that_fail_to_decode() {
        let (backend, gateway) = setup(None);
        let task_id = Uuid::new_v4();
        backend.seed(
            "checklist_items",
            [
                json!({"task_id": task_id, "title": "ok", "position": 0}),
                json!({"task_id": task_id, "position": 1}),
            ]
            .into_iter()
            .filter_map(|v| v.as_object().cloned()),
        );

        let items: Vec<ChecklistItem> = gateway
            .query(&Query::new("checklist_items").eq("task_id", task_id.to_string()))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out() {
        let (backend, gateway) = setup(Some(Duration::from_secs(30)));
        backend.stall_writes("checklist_items", true);
        let err = gateway
            .create::<ChecklistItem, _>(&new_item(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::Timeout(Duration::from_secs(30)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn missing_user_is_unauthenticated() {
        let (backend, gateway) = setup(None);
        assert_eq!(gateway.require_user().await, Err(SyncError::Unauthenticated));
        let user = Uuid::new_v4();
        backend.set_current_user(Some(user));
        assert_eq!(gateway.require_user().await, Ok(user));
    }
}
