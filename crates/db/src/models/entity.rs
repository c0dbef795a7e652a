//! Identifiers and row mapping shared by every entity collection.
//!
//! Rows cross the gateway boundary as loose JSON objects. They are mapped into
//! the typed models in this crate before anything else looks at them, so code
//! downstream never has to ask whether a field is present.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use thiserror::Error;
use ts_rs::TS;

/// A row as exchanged with the backend.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Prefix of identifiers minted locally before the backend assigns one.
pub const PROVISIONAL_PREFIX: &str = "temp-";

static PROVISIONAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of an entity inside a slice. Either assigned by the backend or
/// provisional (`temp-<millis>-<n>`) while an optimistic create is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh provisional identifier, unique within this process.
    pub fn provisional() -> Self {
        let n = PROVISIONAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{PROVISIONAL_PREFIX}{}-{n}",
            Utc::now().timestamp_millis()
        ))
    }

    pub fn is_provisional(&self) -> bool {
        is_provisional_str(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<uuid::Uuid> for EntityId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

pub fn is_provisional_str(id: &str) -> bool {
    id.starts_with(PROVISIONAL_PREFIX)
}

/// An entity that lives in a projection slice.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Backend collection (table) the entity is stored in.
    const COLLECTION: &'static str;

    fn id(&self) -> &EntityId;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {collection} row: {message}")]
pub struct DecodeError {
    pub collection: String,
    pub message: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("serialization failed: {0}")]
    Serde(String),
    #[error("value did not serialize to an object")]
    NotAnObject,
}

/// Map a backend row into a typed entity, rejecting rows that do not match.
pub fn decode_row<T: DeserializeOwned>(collection: &str, row: Row) -> Result<T, DecodeError> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| DecodeError {
        collection: collection.to_string(),
        message: e.to_string(),
    })
}

/// Serialize a DTO into a backend row.
pub fn encode_row<T: Serialize + ?Sized>(value: &T) -> Result<Row, EncodeError> {
    match serde_json::to_value(value).map_err(|e| EncodeError::Serde(e.to_string()))? {
        serde_json::Value::Object(row) => Ok(row),
        _ => Err(EncodeError::NotAnObject),
    }
}

/// Whether `column` holds an identifier (`id` or a `*_id` foreign key).
fn is_identifier_column(column: &str) -> bool {
    column == "id" || column.ends_with("_id")
}

/// Find a provisional identifier in a row's identifier columns. Free-text
/// columns are not inspected, so a title may start with the prefix.
pub fn find_provisional(row: &Row) -> Option<&str> {
    row.iter()
        .filter(|(column, _)| is_identifier_column(column))
        .find_map(|(_, value)| match value {
            serde_json::Value::String(s) if is_provisional_str(s) => Some(s.as_str()),
            _ => None,
        })
}

/// Nullable backend columns (`boolean | null`, `text[] | null`) map to the
/// type's default instead of an `Option`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
