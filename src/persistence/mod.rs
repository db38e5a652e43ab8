//! Persistence layer modules.

pub mod ticket_store;

pub use ticket_store::{file_key, TicketStore};
