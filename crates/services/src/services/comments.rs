use std::sync::Arc;

use async_trait::async_trait;
use db::models::{
    comment::{CommentMetadata, CreateTaskComment, TaskComment},
    entity::{Entity, EntityId},
};
use remote::{ChangeEvent, CollectionDescriptor, Filter, Query};
use tracing::info;
use uuid::Uuid;

use super::{
    entities::EntityGateway,
    error::SyncError,
    optimistic::MutationEngine,
    projection::{ListSlice, Projection},
    realtime::{RealtimeChannel, SliceReconciler, SubscriptionHandle},
};

/// Comments on one task, newest first.
#[derive(Clone)]
pub struct CommentThread {
    task_id: Uuid,
    organization_id: Uuid,
    comments: Projection<ListSlice<TaskComment>>,
    entities: EntityGateway,
    engine: Arc<MutationEngine>,
}

impl CommentThread {
    pub fn new(
        task_id: Uuid,
        organization_id: Uuid,
        entities: EntityGateway,
        engine: Arc<MutationEngine>,
    ) -> Self {
        Self {
            task_id,
            organization_id,
            comments: Projection::new(format!("comments:{task_id}"), ListSlice::new()),
            entities,
            engine,
        }
    }

    pub fn comments(&self) -> &Projection<ListSlice<TaskComment>> {
        &self.comments
    }

    pub async fn load(&self) -> Result<(), SyncError> {
        let comments: Vec<TaskComment> = self
            .entities
            .query(
                &Query::new(TaskComment::COLLECTION)
                    .eq("task_id", self.task_id.to_string())
                    .order_by("created_at", false),
            )
            .await?;
        self.comments.replace(ListSlice::from_items(comments));
        Ok(())
    }

    pub async fn add_comment(
        &self,
        content: &str,
        mentions: Vec<String>,
    ) -> Result<TaskComment, SyncError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(self.engine.reject("Comment cannot be empty"));
        }
        let Some(user_id) = self.entities.current_user().await? else {
            return Err(self.engine.reject("You must be logged in to comment"));
        };
        let create = CreateTaskComment {
            task_id: self.task_id,
            organization_id: self.organization_id,
            user_id,
            content: content.to_string(),
            metadata: CommentMetadata {
                thumbnails: Vec::new(),
                mentions,
            },
        };
        let provisional = EntityId::provisional();
        let placeholder = create.provisional_comment(provisional.clone());

        let comment = self
            .engine
            .perform(
                &self.comments,
                &provisional,
                "Failed to add comment",
                |comments| {
                    let mut next = comments.clone();
                    next.prepend(placeholder);
                    next
                },
                || self.entities.create::<TaskComment, _>(&create),
                |comments, created: &TaskComment| {
                    comments.replace_provisional(&provisional, created.clone());
                },
            )
            .await?;
        info!(task_id = %self.task_id, comment_id = %comment.id, "comment added");
        Ok(comment)
    }

    pub async fn delete_comment(&self, id: &EntityId) -> Result<(), SyncError> {
        if !self.comments.read(|comments| comments.contains(id)) {
            return Err(SyncError::not_found(TaskComment::COLLECTION, id));
        }
        self.engine
            .perform(
                &self.comments,
                id,
                "Failed to delete comment",
                |comments| {
                    let mut next = comments.clone();
                    next.remove(id);
                    next
                },
                || self.entities.delete::<TaskComment>(id),
                |_, _| {},
            )
            .await
    }

    pub fn subscribe(&self, realtime: &RealtimeChannel) -> SubscriptionHandle {
        realtime.subscribe(
            self.comments.name(),
            vec![CollectionDescriptor::scoped(
                TaskComment::COLLECTION,
                Filter::eq("task_id", self.task_id.to_string()),
            )],
            Arc::new(self.clone()),
        )
    }
}

#[async_trait]
impl SliceReconciler for CommentThread {
    async fn resync(&self) -> Result<(), SyncError> {
        self.load().await
    }

    async fn apply(&self, _event: &ChangeEvent) -> Result<(), SyncError> {
        self.load().await
    }
}

#[cfg(test)]
mod tests {
    use remote::RemoteError;

    use super::*;
    use crate::services::test_support::Harness;

    fn thread(harness: &Harness) -> CommentThread {
        CommentThread::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            harness.entities.clone(),
            harness.engine.clone(),
        )
    }

    #[tokio::test]
    async fn new_comments_go_on_top() {
        let harness = Harness::new();
        let thread = thread(&harness);
        thread.add_comment("first", Vec::new()).await.unwrap();
        let second = thread
            .add_comment("second @ana", vec!["ana".to_string()])
            .await
            .unwrap();

        let comments = thread.comments().snapshot();
        assert_eq!(comments.items()[0].id, second.id);
        assert_eq!(comments.items()[0].metadata.mentions, ["ana"]);
        assert_eq!(comments.len(), 2);
        assert!(!comments.has_provisional());
    }

    #[tokio::test]
    async fn empty_comment_and_anonymous_user_are_rejected() {
        let harness = Harness::new();
        let thread = thread(&harness);
        assert!(matches!(
            thread.add_comment("  ", Vec::new()).await,
            Err(SyncError::Validation(_))
        ));
        harness.backend.set_current_user(None);
        assert!(matches!(
            thread.add_comment("hello", Vec::new()).await,
            Err(SyncError::Validation(_))
        ));
        assert!(thread.comments().read(|c| c.is_empty()));
    }

    #[tokio::test]
    async fn failed_delete_restores_comment() {
        let harness = Harness::new();
        let thread = thread(&harness);
        let comment = thread.add_comment("keep me", Vec::new()).await.unwrap();
        let before = thread.comments().snapshot();

        harness
            .backend
            .fail_next("task_comments", RemoteError::request("offline", None));
        assert!(thread.delete_comment(&comment.id).await.is_err());
        assert_eq!(thread.comments().snapshot(), before);

        thread.delete_comment(&comment.id).await.unwrap();
        thread.load().await.unwrap();
        assert!(thread.comments().read(|c| c.is_empty()));
    }
}
