use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    checklist::ChecklistProgress,
    entity::{Entity, EntityId, null_as_default},
};

/// Kanban column a task sits in. Any status may move to any other status.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TS,
    EnumString,
    EnumIter,
    Display,
    Default,
)]
pub enum TaskStatus {
    #[serde(rename = "Backlog")]
    #[strum(serialize = "Backlog")]
    Backlog,
    #[default]
    #[serde(rename = "To Do")]
    #[strum(serialize = "To Do")]
    Todo,
    #[serde(rename = "In Progress")]
    #[strum(serialize = "In Progress")]
    InProgress,
    #[serde(rename = "Needs Review")]
    #[strum(serialize = "Needs Review")]
    NeedsReview,
    #[serde(rename = "Pending")]
    #[strum(serialize = "Pending")]
    Pending,
    #[serde(rename = "Blocked")]
    #[strum(serialize = "Blocked")]
    Blocked,
    #[serde(rename = "Completed")]
    #[strum(serialize = "Completed")]
    Completed,
}

impl TaskStatus {
    /// Board columns in display order, which is declaration order.
    pub fn columns() -> impl Iterator<Item = TaskStatus> {
        Self::iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: TaskStatus,
    pub created_by: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub sprint_id: Option<Uuid>,
    pub scope_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub deleted: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Task {
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &EntityId {
        &self.id
    }
}

/// Join row linking a task to an assigned profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct TaskAssignee {
    pub task_id: Uuid,
    pub user_id: Uuid,
}

impl TaskAssignee {
    pub const COLLECTION: &'static str = "task_assignees";
}

/// A task as rendered on the board: the row plus what is joined onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct BoardTask {
    #[serde(flatten)]
    #[ts(flatten)]
    pub task: Task,
    pub assignees: Vec<Uuid>,
    pub checklist: ChecklistProgress,
}

impl BoardTask {
    pub fn bare(task: Task) -> Self {
        Self {
            task,
            assignees: Vec::new(),
            checklist: ChecklistProgress::default(),
        }
    }
}

impl std::ops::Deref for BoardTask {
    type Target = Task;
    fn deref(&self) -> &Self::Target {
        &self.task
    }
}

impl std::ops::DerefMut for BoardTask {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.task
    }
}

impl Entity for BoardTask {
    const COLLECTION: &'static str = Task::COLLECTION;

    fn id(&self) -> &EntityId {
        &self.task.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub created_by: Uuid,
    pub organization_id: Uuid,
    pub deleted: bool,
}

impl CreateTask {
    /// Placeholder card created from a column's "add" button.
    pub fn placeholder(organization_id: Uuid, status: TaskStatus, created_by: Uuid) -> Self {
        Self {
            title: "New Task".to_string(),
            description: Some(String::new()),
            status,
            created_by,
            organization_id,
            deleted: false,
        }
    }

    /// The local stand-in shown until the backend returns the real row.
    pub fn provisional_task(&self, id: EntityId) -> Task {
        let now = Utc::now();
        Task {
            id,
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            created_by: Some(self.created_by),
            organization_id: Some(self.organization_id),
            sprint_id: None,
            scope_id: None,
            start_date: None,
            end_date: None,
            deleted: false,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateTask {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            updated_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn soft_delete() -> Self {
        Self {
            deleted: Some(true),
            updated_at: Utc::now(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;
    use crate::models::entity::{decode_row, encode_row};

    #[test]
    fn status_uses_column_labels() {
        assert_eq!(TaskStatus::InProgress.to_string(), "In Progress");
        assert_eq!(TaskStatus::from_str("Needs Review").unwrap(), TaskStatus::NeedsReview);
        assert_eq!(json!(TaskStatus::Todo), json!("To Do"));
        assert!(TaskStatus::from_str("in_progress").is_err());
    }

    #[test]
    fn columns_run_from_backlog_to_completed() {
        let labels: Vec<String> = TaskStatus::columns().map(|s| s.to_string()).collect();
        assert_eq!(
            labels,
            [
                "Backlog",
                "To Do",
                "In Progress",
                "Needs Review",
                "Pending",
                "Blocked",
                "Completed"
            ]
        );
    }

    #[test]
    fn task_row_with_nulls_decodes() {
        let row = json!({
            "id": "7b0c4f6e-1b7c-4d0e-9a43-0d5f7c1e2a11",
            "title": "Write docs",
            "description": null,
            "status": "Blocked",
            "deleted": null,
            "organization_id": "0f3c3b7e-8b0f-4c59-9d1c-7e1b2d3c4a55",
            "created_at": "2026-03-01T10:00:00Z"
        });
        let task: Task = decode_row("tasks", row.as_object().cloned().unwrap()).unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(!task.deleted);
        assert!(task.sprint_id.is_none());
    }

    #[test]
    fn update_task_omits_untouched_fields() {
        let row = encode_row(&UpdateTask::status(TaskStatus::Completed)).unwrap();
        assert_eq!(row.get("status"), Some(&json!("Completed")));
        assert!(row.contains_key("updated_at"));
        assert!(!row.contains_key("title"));
    }

    #[test]
    fn board_task_derefs_to_task() {
        let create = CreateTask::placeholder(Uuid::new_v4(), TaskStatus::Pending, Uuid::new_v4());
        let card = BoardTask::bare(create.provisional_task(EntityId::provisional()));
        assert_eq!(card.title, "New Task");
        assert_eq!(card.status, TaskStatus::Pending);
        assert!(card.id().is_provisional());
    }
}
