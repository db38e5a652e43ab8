//! Domain model module declarations.

pub mod message;
pub mod permission;
pub mod ticket;
