use std::sync::Arc;

use async_trait::async_trait;
use db::models::{
    attachment::{Attachment, CreateAttachment, UpdateAttachment},
    entity::{Entity, EntityId},
};
use remote::{ChangeEvent, CollectionDescriptor, Filter, Query};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::{
    entities::EntityGateway,
    error::SyncError,
    optimistic::MutationEngine,
    projection::{ListSlice, Projection},
    realtime::{RealtimeChannel, SliceReconciler, SubscriptionHandle},
    toast::Toast,
};

/// A file picked for upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Files attached to one task. The bytes live in the object store; the
/// `attachments` rows describe them.
#[derive(Clone)]
pub struct AttachmentList {
    task_id: Uuid,
    bucket: String,
    attachments: Projection<ListSlice<Attachment>>,
    entities: EntityGateway,
    engine: Arc<MutationEngine>,
}

impl AttachmentList {
    pub fn new(
        task_id: Uuid,
        bucket: impl Into<String>,
        entities: EntityGateway,
        engine: Arc<MutationEngine>,
    ) -> Self {
        Self {
            task_id,
            bucket: bucket.into(),
            attachments: Projection::new(format!("attachments:{task_id}"), ListSlice::new()),
            entities,
            engine,
        }
    }

    pub fn attachments(&self) -> &Projection<ListSlice<Attachment>> {
        &self.attachments
    }

    pub async fn load(&self) -> Result<(), SyncError> {
        let attachments: Vec<Attachment> = self
            .entities
            .query(
                &Query::new(Attachment::COLLECTION)
                    .eq("task_id", self.task_id.to_string())
                    .eq("deleted", false)
                    .order_by("uploaded_at", false),
            )
            .await?;
        self.attachments.replace(ListSlice::from_items(attachments));
        Ok(())
    }

    pub fn public_url(&self, attachment: &Attachment) -> Result<Url, SyncError> {
        self.entities.public_url(&self.bucket, &attachment.file_path)
    }

    /// Store the file, then add its metadata row. If the row cannot be
    /// written the stored object is removed again.
    pub async fn upload(&self, upload: Upload) -> Result<Attachment, SyncError> {
        if upload.file_name.trim().is_empty() {
            return Err(self.engine.reject("File name is required"));
        }
        let uploaded_by = self.entities.current_user().await?;
        let path = CreateAttachment::object_path(self.task_id, &upload.file_name);
        let size = upload.bytes.len() as i64;

        let stored_path = match self
            .entities
            .put_object(&self.bucket, &path, upload.bytes)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "attachment upload failed");
                self.engine
                    .notifier()
                    .notify(Toast::error(format!("Failed to upload {}", upload.file_name)));
                return Err(e);
            }
        };

        let create = CreateAttachment {
            task_id: self.task_id,
            file_name: upload.file_name,
            file_path: stored_path.clone(),
            file_type: upload.content_type,
            file_size: size,
            uploaded_by,
        };
        let provisional = EntityId::provisional();
        let placeholder = create.provisional_attachment(provisional.clone());

        let attachment = self
            .engine
            .perform(
                &self.attachments,
                &provisional,
                "Failed to save attachment",
                |attachments| {
                    let mut next = attachments.clone();
                    next.prepend(placeholder);
                    next
                },
                || async move {
                    match self.entities.create::<Attachment, _>(&create).await {
                        Ok(attachment) => Ok(attachment),
                        Err(e) => {
                            let orphan = [stored_path.clone()];
                            if let Err(cleanup) =
                                self.entities.remove_objects(&self.bucket, &orphan).await
                            {
                                warn!(path = %stored_path, error = %cleanup, "orphaned attachment object");
                            }
                            Err(e)
                        }
                    }
                },
                |attachments, created: &Attachment| {
                    attachments.replace_provisional(&provisional, created.clone());
                },
            )
            .await?;
        info!(task_id = %self.task_id, path = %attachment.file_path, "attachment uploaded");
        Ok(attachment)
    }

    /// Remove the stored object and flag the row as deleted.
    pub async fn delete(&self, id: &EntityId) -> Result<(), SyncError> {
        let Some(path) = self
            .attachments
            .read(|attachments| attachments.get(id).map(|a| a.file_path.clone()))
        else {
            return Err(SyncError::not_found(Attachment::COLLECTION, id));
        };
        let patch = UpdateAttachment { deleted: true };
        self.engine
            .perform(
                &self.attachments,
                id,
                "Failed to delete attachment",
                |attachments| {
                    let mut next = attachments.clone();
                    next.remove(id);
                    next
                },
                || async move {
                    self.entities
                        .remove_objects(&self.bucket, std::slice::from_ref(&path))
                        .await?;
                    self.entities
                        .update::<Attachment, _>(id, &patch)
                        .await
                },
                |_, _| {},
            )
            .await?;
        Ok(())
    }

    pub fn subscribe(&self, realtime: &RealtimeChannel) -> SubscriptionHandle {
        realtime.subscribe(
            self.attachments.name(),
            vec![CollectionDescriptor::scoped(
                Attachment::COLLECTION,
                Filter::eq("task_id", self.task_id.to_string()),
            )],
            Arc::new(self.clone()),
        )
    }
}

#[async_trait]
impl SliceReconciler for AttachmentList {
    async fn resync(&self) -> Result<(), SyncError> {
        self.load().await
    }

    async fn apply(&self, _event: &ChangeEvent) -> Result<(), SyncError> {
        self.load().await
    }
}
