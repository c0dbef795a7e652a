use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::entity::{Entity, EntityId, null_as_default};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct ChecklistItem {
    pub id: EntityId,
    pub task_id: Uuid,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed: bool,
    pub created_by: Option<Uuid>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mentions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub position: i32,
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for ChecklistItem {
    const COLLECTION: &'static str = "checklist_items";

    fn id(&self) -> &EntityId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateChecklistItem {
    pub task_id: Uuid,
    pub title: String,
    pub completed: bool,
    pub created_by: Option<Uuid>,
    pub mentions: Vec<String>,
    pub position: i32,
}

impl CreateChecklistItem {
    pub fn provisional_item(&self, id: EntityId) -> ChecklistItem {
        ChecklistItem {
            id,
            task_id: self.task_id,
            title: self.title.clone(),
            completed: self.completed,
            created_by: self.created_by,
            mentions: self.mentions.clone(),
            position: self.position,
            created_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateChecklistItem {
    pub completed: bool,
}

/// Completion summary rendered as a progress bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ChecklistProgress {
    pub completed: usize,
    pub total: usize,
    /// Rounded percentage, 0 for an empty checklist.
    pub percent: u8,
}

impl ChecklistProgress {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a ChecklistItem>) -> Self {
        let (completed, total) = items
            .into_iter()
            .fold((0, 0), |(done, total), item| {
                (done + usize::from(item.completed), total + 1)
            });
        Self::from_counts(completed, total)
    }

    pub fn from_counts(completed: usize, total: usize) -> Self {
        if total == 0 {
            return Self::default();
        }
        let percent = ((completed as f64 / total as f64) * 100.0).round() as u8;
        Self {
            completed,
            total,
            percent,
        }
    }
}
