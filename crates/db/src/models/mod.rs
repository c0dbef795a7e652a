pub mod attachment;
pub mod checklist;
pub mod comment;
pub mod entity;
pub mod notification;
pub mod task;
pub mod ticket;
