//! Help-desk tickets of one organization.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use db::models::{
    entity::{Entity, EntityId},
    ticket::{CreateTicket, NewTicket, Ticket, TicketStatus, UpdateTicket},
};
use remote::{ChangeEvent, CollectionDescriptor, Filter, Query};
use tracing::info;
use uuid::Uuid;

use super::{
    entities::EntityGateway,
    error::SyncError,
    optimistic::MutationEngine,
    projection::{ListSlice, Projection},
    realtime::{RealtimeChannel, SliceReconciler, SubscriptionHandle},
    toast::Toast,
};

#[derive(Clone)]
pub struct TicketBoard {
    organization_id: Uuid,
    tickets: Projection<ListSlice<Ticket>>,
    entities: EntityGateway,
    engine: Arc<MutationEngine>,
}

impl TicketBoard {
    pub fn new(organization_id: Uuid, entities: EntityGateway, engine: Arc<MutationEngine>) -> Self {
        Self {
            organization_id,
            tickets: Projection::new(format!("tickets:{organization_id}"), ListSlice::new()),
            entities,
            engine,
        }
    }

    pub fn tickets(&self) -> &Projection<ListSlice<Ticket>> {
        &self.tickets
    }

    pub async fn load(&self) -> Result<(), SyncError> {
        let tickets: Vec<Ticket> = self
            .entities
            .query(
                &Query::new(Ticket::COLLECTION)
                    .eq("organization_id", self.organization_id.to_string())
                    .order_by("created_at", false),
            )
            .await?;
        self.tickets.replace(ListSlice::from_items(tickets));
        Ok(())
    }

    pub async fn create_ticket(&self, form: &NewTicket) -> Result<Ticket, SyncError> {
        if form.title.trim().is_empty() || form.category.trim().is_empty() {
            return Err(self.engine.reject("Please fill in all required fields"));
        }
        let Some(user) = self.entities.current_user().await? else {
            return Err(self.engine.reject("You must be logged in to create tickets"));
        };
        let create = CreateTicket::from_form(form, self.organization_id, user);
        let provisional = EntityId::provisional();
        let placeholder = create.provisional_ticket(provisional.clone());

        let ticket = self
            .engine
            .perform(
                &self.tickets,
                &provisional,
                "Failed to create ticket",
                |tickets| {
                    let mut next = tickets.clone();
                    next.prepend(placeholder);
                    next
                },
                || self.entities.create::<Ticket, _>(&create),
                |tickets, created: &Ticket| {
                    tickets.replace_provisional(&provisional, created.clone());
                },
            )
            .await?;
        info!(ticket_id = %ticket.id, priority = %ticket.priority, "ticket created");
        self.engine
            .notifier()
            .notify(Toast::success("Success", "Ticket created successfully"));
        Ok(ticket)
    }

    pub async fn update_status(
        &self,
        id: &EntityId,
        status: TicketStatus,
    ) -> Result<Ticket, SyncError> {
        if !self.tickets.read(|tickets| tickets.contains(id)) {
            return Err(SyncError::not_found(Ticket::COLLECTION, id));
        }
        let now = Utc::now();
        let patch = UpdateTicket {
            status: Some(status),
            last_status_change: Some(now),
            updated_by: self.entities.current_user().await?,
            updated_at: now,
            ..Default::default()
        };
        self.apply_update(id, patch, "Failed to update ticket status", move |ticket| {
            ticket.status = status;
            ticket.last_status_change = Some(now);
            ticket.updated_at = Some(now);
        })
        .await
    }

    pub async fn assign(&self, id: &EntityId, assignee: Uuid) -> Result<Ticket, SyncError> {
        if !self.tickets.read(|tickets| tickets.contains(id)) {
            return Err(SyncError::not_found(Ticket::COLLECTION, id));
        }
        let now = Utc::now();
        let patch = UpdateTicket {
            assigned_to: Some(assignee),
            updated_by: self.entities.current_user().await?,
            updated_at: now,
            ..Default::default()
        };
        self.apply_update(id, patch, "Failed to assign ticket", move |ticket| {
            ticket.assigned_to = Some(assignee);
            ticket.updated_at = Some(now);
        })
        .await
    }

    async fn apply_update(
        &self,
        id: &EntityId,
        patch: UpdateTicket,
        failure: &str,
        edit: impl FnOnce(&mut Ticket),
    ) -> Result<Ticket, SyncError> {
        self.engine
            .perform(
                &self.tickets,
                id,
                failure,
                |tickets| {
                    let mut next = tickets.clone();
                    next.update(id, edit);
                    next
                },
                || self.entities.update::<Ticket, _>(id, &patch),
                |tickets, updated: &Ticket| {
                    tickets.update(id, |ticket| *ticket = updated.clone());
                },
            )
            .await
    }

    pub fn subscribe(&self, realtime: &RealtimeChannel) -> SubscriptionHandle {
        realtime.subscribe(
            self.tickets.name(),
            vec![CollectionDescriptor::scoped(
                Ticket::COLLECTION,
                Filter::eq("organization_id", self.organization_id.to_string()),
            )],
            Arc::new(self.clone()),
        )
    }
}

#[async_trait]
impl SliceReconciler for TicketBoard {
    async fn resync(&self) -> Result<(), SyncError> {
        self.load().await
    }

    async fn apply(&self, _event: &ChangeEvent) -> Result<(), SyncError> {
        self.load().await
    }
}
