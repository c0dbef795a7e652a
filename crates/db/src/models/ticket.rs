use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::entity::{Entity, EntityId};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

/// Help-desk ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Ticket {
    pub id: EntityId,
    pub organization_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_by: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub last_status_change: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Ticket {
    const COLLECTION: &'static str = "help_desk_tickets";

    fn id(&self) -> &EntityId {
        &self.id
    }
}

/// Form data entered in the new-ticket dialog.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: TicketPriority,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTicket {
    pub organization_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
}

impl CreateTicket {
    pub fn from_form(form: &NewTicket, organization_id: Uuid, created_by: Uuid) -> Self {
        let description = form.description.trim();
        Self {
            organization_id,
            title: form.title.trim().to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            category: form.category.trim().to_string(),
            priority: form.priority,
            status: TicketStatus::Open,
            created_by,
            assigned_to: form.assigned_to,
        }
    }

    pub fn provisional_ticket(&self, id: EntityId) -> Ticket {
        let now = Utc::now();
        Ticket {
            id,
            organization_id: Some(self.organization_id),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            priority: self.priority,
            status: self.status,
            created_by: Some(self.created_by),
            assigned_to: self.assigned_to,
            last_status_change: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateTicket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_change: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}
