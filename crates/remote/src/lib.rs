//! Contracts of the hosted backend the sync core talks to, plus an in-memory
//! backend that implements all of them.

pub mod change;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod query;

pub use change::{ChangeEvent, ChangeKind};
pub use error::RemoteError;
pub use gateway::{
    ChangeFeed, EntityStore, Gateway, ObjectStore, SessionProvider, Subscription, UserId,
};
pub use query::{CollectionDescriptor, Filter, Order, Query, Row, RowRange};
