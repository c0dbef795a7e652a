//! Everything one signed-in user's sync layer shares.
//!
//! A [`SyncSession`] is built once after sign-in. It owns the gateway facade,
//! the mutation engine, the realtime channel with its dedup set, the sound
//! service and the toast queue, and hands out feature slices wired to them.
//! [`SyncSession::logout`] tears all of it down.

use std::sync::{Arc, Mutex};

use db::models::task::Task;
use remote::Gateway;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    attachments::AttachmentList,
    checklist::Checklist,
    comments::CommentThread,
    config::SyncConfig,
    dedup::DedupSet,
    dirty_buffer::{DirtyBuffer, TaskDraft, TaskDraftWriter},
    entities::EntityGateway,
    error::SyncError,
    kanban::KanbanBoard,
    notification::NotificationInbox,
    optimistic::MutationEngine,
    realtime::{RealtimeChannel, ResubscribePolicy},
    sound::NotificationSound,
    tickets::TicketBoard,
    toast::ToastQueue,
};

pub struct SyncSession {
    config: SyncConfig,
    entities: EntityGateway,
    engine: Arc<MutationEngine>,
    realtime: RealtimeChannel,
    sound: NotificationSound,
    toasts: Arc<ToastQueue>,
    autoflush: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncSession {
    pub fn new(gateway: Gateway, config: SyncConfig, sound: NotificationSound) -> Self {
        let toasts = Arc::new(ToastQueue::new());
        let engine = Arc::new(MutationEngine::new(toasts.clone()));
        let realtime = RealtimeChannel::new(
            gateway.changes.clone(),
            Arc::new(DedupSet::new(config.dedup_capacity)),
            ResubscribePolicy::from_config(&config),
        )
        .with_notifier(toasts.clone());
        info!(
            timeout = ?config.remote_timeout(),
            dedup_capacity = config.dedup_capacity,
            "sync session started"
        );
        Self {
            entities: EntityGateway::new(gateway, config.remote_timeout()),
            engine,
            realtime,
            sound,
            toasts,
            autoflush: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityGateway {
        &self.entities
    }

    pub fn engine(&self) -> &Arc<MutationEngine> {
        &self.engine
    }

    pub fn realtime(&self) -> &RealtimeChannel {
        &self.realtime
    }

    pub fn sound(&self) -> &NotificationSound {
        &self.sound
    }

    pub fn toasts(&self) -> &Arc<ToastQueue> {
        &self.toasts
    }

    pub fn kanban(&self, organization_id: Uuid) -> KanbanBoard {
        KanbanBoard::new(organization_id, self.entities.clone(), self.engine.clone())
    }

    pub fn checklist(&self, task_id: Uuid) -> Checklist {
        Checklist::new(task_id, self.entities.clone(), self.engine.clone())
    }

    pub fn comments(&self, task_id: Uuid, organization_id: Uuid) -> CommentThread {
        CommentThread::new(
            task_id,
            organization_id,
            self.entities.clone(),
            self.engine.clone(),
        )
    }

    pub fn tickets(&self, organization_id: Uuid) -> TicketBoard {
        TicketBoard::new(organization_id, self.entities.clone(), self.engine.clone())
    }

    pub fn attachments(&self, task_id: Uuid) -> AttachmentList {
        AttachmentList::new(
            task_id,
            self.config.attachment_bucket.clone(),
            self.entities.clone(),
            self.engine.clone(),
        )
    }

    /// Inbox of the signed-in user.
    pub async fn notifications(&self) -> Result<NotificationInbox, SyncError> {
        let user_id = self.entities.require_user().await?;
        Ok(NotificationInbox::new(
            user_id,
            self.entities.clone(),
            self.engine.clone(),
            self.sound.clone(),
            self.realtime.dedup().clone(),
        ))
    }

    /// Edit buffer for `task`. Flushed periodically when
    /// `draft_autoflush_ms` is configured, until logout.
    pub fn task_draft(&self, task: &Task) -> DirtyBuffer<TaskDraft> {
        let writer = TaskDraftWriter::new(self.entities.clone(), task.id.clone());
        let buffer = DirtyBuffer::new(TaskDraft::from(task), Arc::new(writer));
        if let Some(period) = self.config.draft_autoflush() {
            debug!(task_id = %task.id, period = ?period, "draft autoflush enabled");
            let handle = buffer.spawn_autoflush(period);
            self.lock_autoflush().push(handle);
        }
        buffer
    }

    fn lock_autoflush(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.autoflush
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop every subscription and background flush and forget every applied
    /// change event. Slices built from this session stop receiving updates.
    pub fn logout(&self) {
        self.realtime.shutdown();
        let flushers: Vec<_> = self.lock_autoflush().drain(..).collect();
        for handle in &flushers {
            handle.abort();
        }
        info!(
            pending = self.engine.pending_count(),
            flushers = flushers.len(),
            "sync session logged out"
        );
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.realtime.shutdown();
        for handle in self.lock_autoflush().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use db::models::task::TaskStatus;
    use remote::memory::InMemoryBackend;

    use super::*;
    use crate::services::test_support::wait_until;

    fn session(config: SyncConfig) -> (Arc<InMemoryBackend>, SyncSession, Uuid) {
        let backend = Arc::new(InMemoryBackend::new());
        let user = Uuid::new_v4();
        backend.set_current_user(Some(user));
        let session = SyncSession::new(
            Gateway::from_backend(backend.clone()),
            config,
            NotificationSound::default(),
        );
        (backend, session, user)
    }

    #[tokio::test]
    async fn slices_share_one_engine_and_toast_queue() {
        let (_backend, session, _) = session(SyncConfig::default());
        let org = Uuid::new_v4();
        let board = session.kanban(org);
        board.create_task(TaskStatus::Backlog).await.unwrap();

        let checklist = session.checklist(Uuid::new_v4());
        assert!(checklist.add_item(" ", Vec::new()).await.is_err());

        let toasts = session.toasts().drain();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].description, "Checklist item cannot be empty");
        assert_eq!(session.engine().pending_count(), 0);
    }

    #[tokio::test]
    async fn notifications_need_a_signed_in_user() {
        let (backend, session, user) = session(SyncConfig::default());
        let inbox = session.notifications().await.unwrap();
        assert_eq!(inbox.notifications().name(), format!("notifications:{user}"));

        backend.set_current_user(None);
        assert!(matches!(
            session.notifications().await,
            Err(SyncError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn attachments_use_configured_bucket() {
        let config = SyncConfig {
            attachment_bucket: "files".to_string(),
            ..SyncConfig::default()
        };
        let (backend, session, _) = session(config);
        let list = session.attachments(Uuid::new_v4());
        let attachment = list
            .upload(crate::services::attachments::Upload {
                file_name: "a.txt".to_string(),
                content_type: None,
                bytes: b"hi".to_vec(),
            })
            .await
            .unwrap();
        assert!(backend.object("files", &attachment.file_path).is_some());
    }

    #[tokio::test]
    async fn logout_tears_down_subscriptions_and_dedup() {
        let (backend, session, _) = session(SyncConfig::default());
        let board = session.kanban(Uuid::new_v4());
        let inbox = session.notifications().await.unwrap();
        let _board_sub = board.subscribe(session.realtime());
        let _inbox_sub = inbox.subscribe(session.realtime());
        wait_until(|| backend.subscriber_count() == 6).await;

        session.realtime().dedup().first_sighting("seen");
        session.logout();

        assert_eq!(session.realtime().active_count(), 0);
        assert!(session.realtime().dedup().is_empty());
        wait_until(|| backend.subscriber_count() == 0).await;
    }

    #[tokio::test]
    async fn autoflushed_drafts_stop_at_logout() {
        let config = SyncConfig {
            draft_autoflush_ms: Some(5),
            ..SyncConfig::default()
        };
        let (backend, session, _) = session(config);
        let board = session.kanban(Uuid::new_v4());
        let task = board.create_task(TaskStatus::Backlog).await.unwrap();

        let draft = session.task_draft(&task);
        draft.edit(|d| d.title = "Renamed".to_string());
        wait_until(|| !draft.is_dirty()).await;
        assert_eq!(backend.rows("tasks")[0]["title"], "Renamed");

        session.logout();
        tokio::time::sleep(Duration::from_millis(10)).await;
        draft.edit(|d| d.title = "After logout".to_string());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(draft.is_dirty());
        assert_eq!(backend.rows("tasks")[0]["title"], "Renamed");
    }
}
