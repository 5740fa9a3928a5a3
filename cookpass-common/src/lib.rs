//! # cookpass common library
//!
//! Shared code for the cookpass workspace:
//! - Error and result types
//! - TOML configuration loading and config path resolution
//! - Session event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, SessionEvent};
