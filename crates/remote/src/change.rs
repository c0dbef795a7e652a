use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::query::Row;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, EnumIter, Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change notification pushed by the change feed.
///
/// Delivery is at-least-once: the same `event_id` may arrive more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub collection: String,
    pub kind: ChangeKind,
    pub entity_id: String,
    /// New row for inserts and updates, the old row for deletes.
    pub row: Option<Row>,
}
