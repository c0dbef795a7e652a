//! Per-user notification inbox.
//!
//! Unlike the other slices the inbox merges change events incrementally
//! instead of refetching: inserts are prepended (and announced with a toast
//! and, for direct notifications, the chime), updates are merged in place and
//! deletes drop the row. Inserts are deduplicated by notification id through
//! the session's [`DedupSet`], so a notification is announced at most once no
//! matter how often the feed delivers it.

use std::sync::Arc;

use async_trait::async_trait;
use db::models::{
    entity::{Entity, EntityId, decode_row},
    notification::{Notification, UpdateNotification},
};
use remote::{ChangeEvent, ChangeKind, CollectionDescriptor, Filter, Query, UserId};
use tracing::{debug, info, warn};

use super::{
    dedup::DedupSet,
    entities::EntityGateway,
    error::SyncError,
    optimistic::MutationEngine,
    projection::{ListSlice, Projection},
    realtime::{RealtimeChannel, SliceReconciler, SubscriptionHandle},
    sound::NotificationSound,
    toast::Toast,
};

#[derive(Clone)]
pub struct NotificationInbox {
    user_id: UserId,
    notifications: Projection<ListSlice<Notification>>,
    entities: EntityGateway,
    engine: Arc<MutationEngine>,
    sound: NotificationSound,
    seen: Arc<DedupSet>,
}

impl NotificationInbox {
    pub fn new(
        user_id: UserId,
        entities: EntityGateway,
        engine: Arc<MutationEngine>,
        sound: NotificationSound,
        seen: Arc<DedupSet>,
    ) -> Self {
        Self {
            user_id,
            notifications: Projection::new(format!("notifications:{user_id}"), ListSlice::new()),
            entities,
            engine,
            sound,
            seen,
        }
    }

    pub fn notifications(&self) -> &Projection<ListSlice<Notification>> {
        &self.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.notifications
            .read(|list| list.iter().filter(|n| !n.read).count())
    }

    fn seen_key(&self, id: &EntityId) -> String {
        format!("notification:{}:{id}", self.user_id)
    }

    pub async fn load(&self) -> Result<(), SyncError> {
        let notifications: Vec<Notification> = self
            .entities
            .query(
                &Query::new(Notification::COLLECTION)
                    .eq("user_id", self.user_id.to_string())
                    .order_by("created_at", false),
            )
            .await?;
        // Already listed, so a late insert event must not announce them again.
        for notification in &notifications {
            self.seen.first_sighting(&self.seen_key(&notification.id));
        }
        debug!(user_id = %self.user_id, count = notifications.len(), "notifications loaded");
        self.notifications
            .replace(ListSlice::from_items(notifications));
        Ok(())
    }

    fn receive(&self, notification: Notification) {
        if !self.seen.first_sighting(&self.seen_key(&notification.id)) {
            debug!(notification_id = %notification.id, "notification already announced");
            return;
        }
        let added = self.notifications.update_if(|list| {
            if list.contains(&notification.id) {
                return false;
            }
            list.prepend(notification.clone());
            true
        });
        if !added {
            return;
        }

        let (title, description) = notification.toast_text();
        self.engine
            .notifier()
            .notify(Toast::success(title, description));
        if notification.kind.plays_sound() {
            self.sound.play();
        }
        info!(
            notification_id = %notification.id,
            kind = %notification.kind,
            "notification received"
        );
    }

    pub async fn mark_as_read(&self, id: &EntityId) -> Result<(), SyncError> {
        let Some(read) = self.notifications.read(|list| list.get(id).map(|n| n.read)) else {
            return Err(SyncError::not_found(Notification::COLLECTION, id));
        };
        if read {
            return Ok(());
        }
        let patch = UpdateNotification { read: true };
        self.engine
            .perform(
                &self.notifications,
                id,
                "Failed to mark notification as read",
                |list| {
                    let mut next = list.clone();
                    next.update(id, |n| n.read = true);
                    next
                },
                || self.entities.update::<Notification, _>(id, &patch),
                |list, updated: &Notification| {
                    list.update(id, |n| *n = updated.clone());
                },
            )
            .await?;
        Ok(())
    }

    /// Mark every unread notification as read. The writes go out one by one;
    /// if any fails the whole list is restored.
    pub async fn mark_all_as_read(&self) -> Result<usize, SyncError> {
        let unread: Vec<EntityId> = self.notifications.read(|list| {
            list.iter()
                .filter(|n| !n.read)
                .map(|n| n.id.clone())
                .collect()
        });
        if unread.is_empty() {
            return Ok(0);
        }
        let patch = UpdateNotification { read: true };
        let count = self
            .engine
            .perform(
                &self.notifications,
                &EntityId::new("*"),
                "Failed to mark all notifications as read",
                |list| {
                    let mut next = list.clone();
                    next.update_all(|n| n.read = true);
                    next
                },
                || async move {
                    for id in &unread {
                        self.entities
                            .update::<Notification, _>(id, &patch)
                            .await?;
                    }
                    Ok::<_, SyncError>(unread.len())
                },
                |_, _| {},
            )
            .await?;
        info!(user_id = %self.user_id, count, "notifications marked as read");
        Ok(count)
    }

    pub fn subscribe(&self, realtime: &RealtimeChannel) -> SubscriptionHandle {
        realtime.subscribe(
            self.notifications.name(),
            vec![CollectionDescriptor::scoped(
                Notification::COLLECTION,
                Filter::eq("user_id", self.user_id.to_string()),
            )],
            Arc::new(self.clone()),
        )
    }
}

#[async_trait]
impl SliceReconciler for NotificationInbox {
    async fn resync(&self) -> Result<(), SyncError> {
        self.load().await
    }

    async fn apply(&self, event: &ChangeEvent) -> Result<(), SyncError> {
        if event.kind == ChangeKind::Delete {
            let id = EntityId::from(event.entity_id.as_str());
            self.notifications.update_if(|list| list.remove(&id).is_some());
            return Ok(());
        }
        let Some(row) = event.row.clone() else {
            warn!(event_id = %event.event_id, "notification event without a row");
            return Ok(());
        };
        let notification: Notification = match decode_row(Notification::COLLECTION, row) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "skipping undecodable notification");
                return Ok(());
            }
        };
        match event.kind {
            ChangeKind::Insert => self.receive(notification),
            _ => {
                let id = notification.id.clone();
                self.notifications
                    .update_if(|list| list.update(&id, |n| *n = notification));
            }
        }
        Ok(())
    }
}
