use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::entity::{Entity, EntityId, null_as_default};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct CommentMetadata {
    #[serde(default)]
    pub thumbnails: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct TaskComment {
    pub id: EntityId,
    pub task_id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: CommentMetadata,
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for TaskComment {
    const COLLECTION: &'static str = "task_comments";

    fn id(&self) -> &EntityId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTaskComment {
    pub task_id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub metadata: CommentMetadata,
}

impl CreateTaskComment {
    pub fn provisional_comment(&self, id: EntityId) -> TaskComment {
        TaskComment {
            id,
            task_id: self.task_id,
            organization_id: self.organization_id,
            user_id: Some(self.user_id),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            created_at: Some(Utc::now()),
        }
    }
}
