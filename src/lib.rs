#![forbid(unsafe_code)]

//! `ticket-warden`: support-ticket channel lifecycle for chat communities.
//!
//! The [`engine::TicketEngine`] drives every ticket transition against a
//! [`platform::ChatPlatform`], persisting records through
//! [`persistence::TicketStore`] and queueing channel renames on a
//! [`rename_limiter::RenameLimiter`].

pub mod access;
pub mod audit;
pub mod config;
pub mod config_watcher;
pub mod engine;
pub mod errors;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod platform;
pub mod rename_limiter;
pub mod replay;
pub mod transcript;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
