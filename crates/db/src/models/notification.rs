use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::entity::{Entity, EntityId, null_as_default};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    Message,
    Group,
    Task,
    Run,
    Scope,
    Comment,
    Tag,
    Mention,
    Assignment,
    AccessRequestApproved,
    TicketAssignment,
    TicketUpdate,
}

impl NotificationType {
    /// Types that are loud enough to play the notification chime.
    pub fn plays_sound(&self) -> bool {
        matches!(
            self,
            NotificationType::Mention
                | NotificationType::Assignment
                | NotificationType::AccessRequestApproved
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct AttachmentPreview {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    pub attachment: Option<AttachmentPreview>,
    #[serde(default)]
    pub related_messages: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Notification {
    pub id: EntityId,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub read: bool,
    pub sender_id: Option<Uuid>,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub reference_name: Option<String>,
    pub metadata: Option<NotificationMetadata>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for Notification {
    const COLLECTION: &'static str = "notifications";

    fn id(&self) -> &EntityId {
        &self.id
    }
}

impl Notification {
    /// Title and body of the transient toast shown when the notification arrives.
    pub fn toast_text(&self) -> (String, String) {
        match self.kind {
            NotificationType::AccessRequestApproved => (
                "Application Request Approved".to_string(),
                format!(
                    "Your access request for {} has been approved",
                    self.reference_name.as_deref().unwrap_or("the application")
                ),
            ),
            _ => (self.title.clone(), self.message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateNotification {
    pub read: bool,
}
