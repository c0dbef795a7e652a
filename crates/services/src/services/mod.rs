pub mod attachments;
pub mod checklist;
pub mod comments;
pub mod config;
pub mod dedup;
pub mod dirty_buffer;
pub mod entities;
pub mod error;
pub mod kanban;
pub mod notification;
pub mod optimistic;
pub mod projection;
pub mod realtime;
pub mod session;
pub mod sound;
pub mod tickets;
pub mod toast;

#[cfg(test)]
pub(crate) mod test_support;
