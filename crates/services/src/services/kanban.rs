//! Organization task board: tasks grouped into status columns.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use db::models::{
    checklist::{ChecklistItem, ChecklistProgress},
    entity::{Entity, EntityId},
    task::{BoardTask, CreateTask, Task, TaskAssignee, TaskStatus, UpdateTask},
};
use remote::{ChangeEvent, CollectionDescriptor, Filter, Query};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    entities::EntityGateway,
    error::SyncError,
    optimistic::MutationEngine,
    projection::{GroupedSlice, Projection},
    realtime::{RealtimeChannel, SliceReconciler, SubscriptionHandle},
    toast::Toast,
};

pub type BoardColumns = GroupedSlice<TaskStatus, BoardTask>;

/// Collections whose changes alter what a board card shows.
const RELATED_COLLECTIONS: [&str; 4] = [
    "checklist_items",
    "task_assignees",
    "task_comments",
    "attachments",
];

#[derive(Clone)]
pub struct KanbanBoard {
    organization_id: Uuid,
    columns: Projection<BoardColumns>,
    entities: EntityGateway,
    engine: Arc<MutationEngine>,
}

impl KanbanBoard {
    pub fn new(organization_id: Uuid, entities: EntityGateway, engine: Arc<MutationEngine>) -> Self {
        Self {
            organization_id,
            columns: Projection::new(
                format!("kanban:{organization_id}"),
                BoardColumns::with_groups(TaskStatus::columns()),
            ),
            entities,
            engine,
        }
    }

    pub fn columns(&self) -> &Projection<BoardColumns> {
        &self.columns
    }

    pub fn column(&self, status: TaskStatus) -> Vec<BoardTask> {
        self.columns.read(|board| {
            board
                .group(&status)
                .map(|list| list.items().to_vec())
                .unwrap_or_default()
        })
    }

    /// Fetch the board with assignees and checklist progress joined in.
    pub async fn fetch(&self) -> Result<BoardColumns, SyncError> {
        let tasks: Vec<Task> = self
            .entities
            .query(
                &Query::new(Task::COLLECTION)
                    .eq("organization_id", self.organization_id.to_string())
                    .eq("deleted", false)
                    .order_by("updated_at", false),
            )
            .await?;
        if tasks.is_empty() {
            return Ok(BoardColumns::with_groups(TaskStatus::columns()));
        }

        let ids: Vec<String> = tasks.iter().map(|t| t.id.to_string()).collect();
        let items: Vec<ChecklistItem> = self
            .entities
            .query(&Query::new(ChecklistItem::COLLECTION).is_in("task_id", ids.clone()))
            .await?;
        let assignees: Vec<TaskAssignee> = self
            .entities
            .query(&Query::new(TaskAssignee::COLLECTION).is_in("task_id", ids))
            .await?;

        let mut checklist: HashMap<String, (usize, usize)> = HashMap::new();
        for item in &items {
            let counts = checklist.entry(item.task_id.to_string()).or_default();
            counts.0 += usize::from(item.completed);
            counts.1 += 1;
        }
        let mut assigned: HashMap<String, Vec<Uuid>> = HashMap::new();
        for assignee in assignees {
            assigned
                .entry(assignee.task_id.to_string())
                .or_default()
                .push(assignee.user_id);
        }

        let cards = tasks.into_iter().map(|task| {
            let key = task.id.to_string();
            let (done, total) = checklist.get(&key).copied().unwrap_or_default();
            BoardTask {
                assignees: assigned.remove(&key).unwrap_or_default(),
                checklist: ChecklistProgress::from_counts(done, total),
                task,
            }
        });
        Ok(BoardColumns::regroup(TaskStatus::columns(), cards, |card| {
            card.status
        }))
    }

    pub async fn load(&self) -> Result<(), SyncError> {
        let board = self.fetch().await?;
        debug!(
            organization_id = %self.organization_id,
            tasks = board.total_len(),
            "board loaded"
        );
        self.columns.replace(board);
        Ok(())
    }

    /// Drag a card from `from` to `to`, landing at `index` in the target
    /// column. Reordering within a column stays local; a column change writes
    /// the new status and is reverted in both columns if that write fails.
    pub async fn move_task(
        &self,
        id: &EntityId,
        from: TaskStatus,
        to: TaskStatus,
        index: usize,
    ) -> Result<(), SyncError> {
        let location = self.columns.read(|board| board.locate(id));
        let current_index = match location {
            Some((status, index)) if status == from => index,
            _ => return Err(SyncError::not_found(Task::COLLECTION, id)),
        };

        if from == to {
            if current_index != index {
                self.columns.update(|board| {
                    board.move_entity(id, &to, index, |_| {});
                });
            }
            return Ok(());
        }

        let now = Utc::now();
        let patch = UpdateTask::status(to);
        self.engine
            .perform(
                &self.columns,
                id,
                "Failed to move task",
                |board| {
                    let mut next = board.clone();
                    next.move_entity(id, &to, index, |card| {
                        card.status = to;
                        card.updated_at = Some(now);
                    });
                    next
                },
                || self.entities.update::<Task, _>(id, &patch),
                |board, task: &Task| {
                    // A refetch may have put the card back while the write
                    // was in flight, so the column follows the stored status.
                    if let Some(existing) = board.get(id).cloned() {
                        let card = BoardTask {
                            task: task.clone(),
                            ..existing
                        };
                        board.upsert(&task.status, card);
                    }
                },
            )
            .await?;

        info!(task_id = %id, from = %from, to = %to, "task moved");
        self.engine
            .notifier()
            .notify(Toast::success("Success", format!("Task moved to {to}")));
        Ok(())
    }

    /// Add a "New Task" card at the top of `status`.
    pub async fn create_task(&self, status: TaskStatus) -> Result<Task, SyncError> {
        let Some(user) = self.entities.current_user().await? else {
            return Err(self.engine.reject("You must be logged in to create tasks"));
        };
        let create = CreateTask::placeholder(self.organization_id, status, user);
        let provisional = EntityId::provisional();
        let card = BoardTask::bare(create.provisional_task(provisional.clone()));

        let task = self
            .engine
            .perform(
                &self.columns,
                &provisional,
                "Failed to create task",
                |board| {
                    let mut next = board.clone();
                    next.insert_at(&status, 0, card);
                    next
                },
                || self.entities.create::<Task, _>(&create),
                |board, task: &Task| {
                    let authoritative = match board.get(&provisional) {
                        Some(existing) => BoardTask {
                            task: task.clone(),
                            ..existing.clone()
                        },
                        None => BoardTask::bare(task.clone()),
                    };
                    board.replace_provisional(&status, &provisional, authoritative);
                },
            )
            .await?;
        info!(task_id = %task.id, status = %status, "task created");
        Ok(task)
    }

    /// Soft-delete: the row stays, flagged `deleted`, and leaves the board.
    pub async fn delete_task(&self, id: &EntityId) -> Result<(), SyncError> {
        if self.columns.read(|board| board.get(id).is_none()) {
            return Err(SyncError::not_found(Task::COLLECTION, id));
        }
        let patch = UpdateTask::soft_delete();
        self.engine
            .perform(
                &self.columns,
                id,
                "Failed to delete task",
                |board| {
                    let mut next = board.clone();
                    next.remove(id);
                    next
                },
                || self.entities.update::<Task, _>(id, &patch),
                |_, _| {},
            )
            .await?;
        info!(task_id = %id, "task deleted");
        self.engine
            .notifier()
            .notify(Toast::success("Success", "Task deleted"));
        Ok(())
    }

    pub fn subscribe(&self, realtime: &RealtimeChannel) -> SubscriptionHandle {
        let mut collections = vec![CollectionDescriptor::scoped(
            Task::COLLECTION,
            Filter::eq("organization_id", self.organization_id.to_string()),
        )];
        collections.extend(RELATED_COLLECTIONS.into_iter().map(CollectionDescriptor::all));
        realtime.subscribe(self.columns.name(), collections, Arc::new(self.clone()))
    }
}

#[async_trait]
impl SliceReconciler for KanbanBoard {
    async fn resync(&self) -> Result<(), SyncError> {
        self.load().await
    }

    /// Any task-related change re-fetches the joined board.
    async fn apply(&self, event: &ChangeEvent) -> Result<(), SyncError> {
        debug!(collection = %event.collection, kind = %event.kind, "board change");
        self.load().await
    }
}
