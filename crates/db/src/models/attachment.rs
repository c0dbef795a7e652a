use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use super::entity::{Entity, EntityId, null_as_default};

/// Metadata row for a file stored in the attachments bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Attachment {
    pub id: EntityId,
    pub task_id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub deleted: bool,
}

impl Entity for Attachment {
    const COLLECTION: &'static str = "attachments";

    fn id(&self) -> &EntityId {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateAttachment {
    pub task_id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub file_size: i64,
    pub uploaded_by: Option<Uuid>,
}

impl CreateAttachment {
    /// Object key for an upload: `<task_id>/<random>.<ext>`.
    pub fn object_path(task_id: Uuid, file_name: &str) -> String {
        match file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => format!("{task_id}/{}.{ext}", Uuid::new_v4()),
            _ => format!("{task_id}/{}", Uuid::new_v4()),
        }
    }

    pub fn provisional_attachment(&self, id: EntityId) -> Attachment {
        Attachment {
            id,
            task_id: self.task_id,
            file_name: self.file_name.clone(),
            file_path: self.file_path.clone(),
            file_type: self.file_type.clone(),
            file_size: Some(self.file_size),
            uploaded_by: self.uploaded_by,
            uploaded_at: Some(Utc::now()),
            deleted: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateAttachment {
    pub deleted: bool,
}
