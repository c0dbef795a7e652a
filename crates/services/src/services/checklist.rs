use std::sync::Arc;

use async_trait::async_trait;
use db::models::{
    checklist::{ChecklistItem, ChecklistProgress, CreateChecklistItem, UpdateChecklistItem},
    entity::{Entity, EntityId},
};
use remote::{ChangeEvent, CollectionDescriptor, Filter, Query};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    entities::EntityGateway,
    error::SyncError,
    optimistic::MutationEngine,
    projection::{ListSlice, Projection},
    realtime::{RealtimeChannel, SliceReconciler, SubscriptionHandle},
};

/// Checklist of one task, ordered by position.
#[derive(Clone)]
pub struct Checklist {
    task_id: Uuid,
    items: Projection<ListSlice<ChecklistItem>>,
    entities: EntityGateway,
    engine: Arc<MutationEngine>,
}

impl Checklist {
    pub fn new(task_id: Uuid, entities: EntityGateway, engine: Arc<MutationEngine>) -> Self {
        Self {
            task_id,
            items: Projection::new(format!("checklist:{task_id}"), ListSlice::new()),
            entities,
            engine,
        }
    }

    pub fn items(&self) -> &Projection<ListSlice<ChecklistItem>> {
        &self.items
    }

    pub fn progress(&self) -> ChecklistProgress {
        self.items.read(|items| ChecklistProgress::from_items(items))
    }

    pub async fn load(&self) -> Result<(), SyncError> {
        let items: Vec<ChecklistItem> = self
            .entities
            .query(
                &Query::new(ChecklistItem::COLLECTION)
                    .eq("task_id", self.task_id.to_string())
                    .order_by("position", true),
            )
            .await?;
        debug!(task_id = %self.task_id, items = items.len(), "checklist loaded");
        self.items.replace(ListSlice::from_items(items));
        Ok(())
    }

    pub async fn add_item(
        &self,
        title: &str,
        mentions: Vec<String>,
    ) -> Result<ChecklistItem, SyncError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(self.engine.reject("Checklist item cannot be empty"));
        }
        let created_by = self.entities.current_user().await?;
        let create = CreateChecklistItem {
            task_id: self.task_id,
            title: title.to_string(),
            completed: false,
            created_by,
            mentions,
            position: self.items.read(|items| items.len()) as i32,
        };
        let provisional = EntityId::provisional();
        let placeholder = create.provisional_item(provisional.clone());

        let item = self
            .engine
            .perform(
                &self.items,
                &provisional,
                "Failed to add checklist item",
                |items| {
                    let mut next = items.clone();
                    next.push(placeholder);
                    next
                },
                || self.entities.create::<ChecklistItem, _>(&create),
                |items, created: &ChecklistItem| {
                    items.replace_provisional(&provisional, created.clone());
                },
            )
            .await?;
        info!(task_id = %self.task_id, item_id = %item.id, "checklist item added");
        Ok(item)
    }

    pub async fn toggle_item(&self, id: &EntityId) -> Result<ChecklistItem, SyncError> {
        let Some(completed) = self
            .items
            .read(|items| items.get(id).map(|item| !item.completed))
        else {
            return Err(SyncError::not_found(ChecklistItem::COLLECTION, id));
        };
        let patch = UpdateChecklistItem { completed };

        self.engine
            .perform(
                &self.items,
                id,
                "Failed to update checklist item",
                |items| {
                    let mut next = items.clone();
                    next.update(id, |item| item.completed = completed);
                    next
                },
                || self.entities.update::<ChecklistItem, _>(id, &patch),
                |items, updated: &ChecklistItem| {
                    items.update(id, |item| *item = updated.clone());
                },
            )
            .await
    }

    pub async fn delete_item(&self, id: &EntityId) -> Result<(), SyncError> {
        if !self.items.read(|items| items.contains(id)) {
            return Err(SyncError::not_found(ChecklistItem::COLLECTION, id));
        }
        self.engine
            .perform(
                &self.items,
                id,
                "Failed to delete checklist item",
                |items| {
                    let mut next = items.clone();
                    next.remove(id);
                    next
                },
                || self.entities.delete::<ChecklistItem>(id),
                |_, _| {},
            )
            .await
    }

    pub fn subscribe(&self, realtime: &RealtimeChannel) -> SubscriptionHandle {
        realtime.subscribe(
            self.items.name(),
            vec![CollectionDescriptor::scoped(
                ChecklistItem::COLLECTION,
                Filter::eq("task_id", self.task_id.to_string()),
            )],
            Arc::new(self.clone()),
        )
    }
}

#[async_trait]
impl SliceReconciler for Checklist {
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
    use serde_json::json;

    use super::*;
    use crate::services::test_support::{Harness, row, wait_until};

    fn checklist(harness: &Harness) -> Checklist {
        Checklist::new(Uuid::new_v4(), harness.entities.clone(), harness.engine.clone())
    }

    #[tokio::test]
    async fn buy_milk_progress_from_empty_to_done_to_empty() {
        let harness = Harness::new();
        let checklist = checklist(&harness);
        checklist.load().await.unwrap();
        assert_eq!(checklist.progress(), ChecklistProgress::default());

        let item = checklist.add_item("Buy milk", Vec::new()).await.unwrap();
        let progress = checklist.progress();
        assert_eq!((progress.completed, progress.total, progress.percent), (0, 1, 0));

        checklist.toggle_item(&item.id).await.unwrap();
        let progress = checklist.progress();
        assert_eq!((progress.completed, progress.total, progress.percent), (1, 1, 100));

        checklist.delete_item(&item.id).await.unwrap();
        assert!(checklist.items().read(|items| items.is_empty()));
        let progress = checklist.progress();
        assert_eq!((progress.completed, progress.total, progress.percent), (0, 0, 0));
    }

    #[tokio::test]
    async fn add_assigns_position_and_real_id() {
        let harness = Harness::new();
        let checklist = checklist(&harness);
        checklist.add_item("first", Vec::new()).await.unwrap();
        let second = checklist
            .add_item("  second  ", vec!["@sam".to_string()])
            .await
            .unwrap();

        assert_eq!(second.position, 1);
        assert_eq!(second.title, "second");
        assert_eq!(second.mentions, ["@sam"]);
        assert_eq!(second.created_by, Some(harness.user));
        assert!(!checklist.items().read(|items| items.has_provisional()));
    }

    #[tokio::test]
    async fn blank_title_is_rejected_before_any_change() {
        let harness = Harness::new();
        let checklist = checklist(&harness);
        let err = checklist.add_item("   ", Vec::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(checklist.items().read(|items| items.is_empty()));
        assert_eq!(harness.toast_messages(), ["Checklist item cannot be empty"]);
        assert!(harness.backend.write_log().is_empty());
    }

    #[tokio::test]
    async fn failed_toggle_and_delete_roll_back() {
        let harness = Harness::new();
        let checklist = checklist(&harness);
        let item = checklist.add_item("Buy milk", Vec::new()).await.unwrap();
        let before = checklist.items().snapshot();

        harness
            .backend
            .fail_next("checklist_items", RemoteError::request("timeout", None));
        assert!(checklist.toggle_item(&item.id).await.is_err());
        assert_eq!(checklist.items().snapshot(), before);

        harness
            .backend
            .fail_next("checklist_items", RemoteError::request("timeout", None));
        assert!(checklist.delete_item(&item.id).await.is_err());
        assert_eq!(checklist.items().snapshot(), before);
        assert_eq!(
            harness.toast_messages(),
            [
                "Failed to update checklist item",
                "Failed to delete checklist item"
            ]
        );
    }

    #[tokio::test]
    async fn echo_arriving_before_commit_yields_one_entry() {
        let harness = Harness::new();
        let checklist = checklist(&harness);
        let _subscription = checklist.subscribe(&harness.realtime);
        wait_until(|| harness.backend.subscriber_count() == 1).await;

        harness.backend.hold_responses("checklist_items", true);
        let adding = {
            let checklist = checklist.clone();
            tokio::spawn(async move { checklist.add_item("Buy milk", Vec::new()).await })
        };
        // The echo's refetch lands while the create is still unanswered.
        wait_until(|| {
            checklist
                .items()
                .read(|items| items.len() == 1 && !items.has_provisional())
        })
        .await;
        assert!(!adding.is_finished());

        harness.backend.hold_responses("checklist_items", false);
        let item = adding.await.unwrap().unwrap();
        let items = checklist.items().snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(items.items()[0].id, item.id);
    }

    #[tokio::test]
    async fn titles_starting_like_a_provisional_id_are_accepted() {
        let harness = Harness::new();
        let checklist = checklist(&harness);
        let item = checklist
            .add_item("temp-files cleanup", Vec::new())
            .await
            .unwrap();

        assert_eq!(item.title, "temp-files cleanup");
        assert!(!item.id.is_provisional());
        assert!(harness.toast_messages().is_empty());
        assert_eq!(harness.backend.rows("checklist_items").len(), 1);
    }

    #[tokio::test]
    async fn other_clients_items_arrive_in_position_order() {
        let harness = Harness::new();
        let checklist = checklist(&harness);
        let task_id = checklist.task_id;
        let _subscription = checklist.subscribe(&harness.realtime);
        wait_until(|| harness.backend.subscriber_count() == 1).await;

        harness.backend.insert_external(
            "checklist_items",
            row(json!({"task_id": task_id, "title": "second", "position": 1})),
        );
        harness.backend.insert_external(
            "checklist_items",
            row(json!({"task_id": task_id, "title": "first", "position": 0})),
        );
        wait_until(|| checklist.items().read(|items| items.len()) == 2).await;
        let titles: Vec<_> = checklist
            .items()
            .read(|items| items.iter().map(|i| i.title.clone()).collect());
        assert_eq!(titles, ["first", "second"]);
    }
}
