//! Deferred local-to-remote writes for edit forms.
//!
//! Edits land in the buffer and mark it dirty; a flush writes the latest
//! value. Flushing is a no-op while clean or while another flush is running.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::{
    entity::EntityId,
    task::{Task, TaskStatus, UpdateTask},
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{entities::EntityGateway, error::SyncError};

#[async_trait]
pub trait DirtyWriter<T>: Send + Sync {
    async fn write(&self, value: &T) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Clean,
    AlreadySyncing,
    Flushed,
}

struct BufferState<T> {
    value: T,
    dirty: bool,
    syncing: bool,
    revision: u64,
}

pub struct DirtyBuffer<T> {
    state: Arc<Mutex<BufferState<T>>>,
    writer: Arc<dyn DirtyWriter<T>>,
}

impl<T> Clone for DirtyBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            writer: self.writer.clone(),
        }
    }
}

/// Clears `syncing` when a flush ends, including when it is cancelled.
struct SyncingGuard<'a, T> {
    state: &'a Mutex<BufferState<T>>,
}

impl<T> Drop for SyncingGuard<'_, T> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .syncing = false;
    }
}

impl<T: Clone + Send + Sync + 'static> DirtyBuffer<T> {
    /// Start clean from the value last read from the backend.
    pub fn new(initial: T, writer: Arc<dyn DirtyWriter<T>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState {
                value: initial,
                dirty: false,
                syncing: false,
                revision: 0,
            })),
            writer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update_local(&self, value: T) {
        let mut state = self.lock();
        state.value = value;
        state.dirty = true;
        state.revision += 1;
    }

    /// Edit the current value in place.
    pub fn edit(&self, f: impl FnOnce(&mut T)) {
        let mut state = self.lock();
        f(&mut state.value);
        state.dirty = true;
        state.revision += 1;
    }

    pub fn current(&self) -> T {
        self.lock().value.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn is_syncing(&self) -> bool {
        self.lock().syncing
    }

    /// Write the current value if it has unsaved edits.
    ///
    /// The buffer only becomes clean if nothing was edited while the write was
    /// in flight. A failed write leaves it dirty.
    pub async fn flush(&self) -> Result<FlushOutcome, SyncError> {
        let (value, revision) = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(FlushOutcome::Clean);
            }
            if state.syncing {
                return Ok(FlushOutcome::AlreadySyncing);
            }
            state.syncing = true;
            (state.value.clone(), state.revision)
        };
        let _syncing = SyncingGuard { state: &self.state };

        if let Err(e) = self.writer.write(&value).await {
            warn!(revision, error = %e, "flush failed, keeping local edits");
            return Err(e);
        }

        let mut state = self.lock();
        if state.revision == revision {
            state.dirty = false;
        } else {
            debug!(
                flushed = revision,
                current = state.revision,
                "edited during flush, still dirty"
            );
        }
        Ok(FlushOutcome::Flushed)
    }

    /// Flush every `period` until the returned task is aborted.
    pub fn spawn_autoflush(&self, period: Duration) -> JoinHandle<()> {
        let buffer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = buffer.flush().await {
                    debug!(error = %e, "autoflush attempt failed");
                }
            }
        })
    }
}

/// Editable fields of a task in the detail dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            start_date: task.start_date,
            end_date: task.end_date,
        }
    }
}

pub struct TaskDraftWriter {
    entities: EntityGateway,
    task_id: EntityId,
}

impl TaskDraftWriter {
    pub fn new(entities: EntityGateway, task_id: EntityId) -> Self {
        Self { entities, task_id }
    }
}

#[async_trait]
impl DirtyWriter<TaskDraft> for TaskDraftWriter {
    async fn write(&self, draft: &TaskDraft) -> Result<(), SyncError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(SyncError::validation("Title is required"));
        }
        let patch = UpdateTask {
            title: Some(title.to_string()),
            description: draft.description.clone(),
            status: Some(draft.status),
            start_date: draft.start_date,
            end_date: draft.end_date,
            deleted: None,
            updated_at: Utc::now(),
        };
        self.entities
            .update::<Task, _>(&self.task_id, &patch)
            .await?;
        Ok(())
    }
}
