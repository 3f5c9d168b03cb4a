//! # relay-core
//!
//! Core types, wire protocol, and error handling for taskrelay.
//!
//! This crate provides the notification data model, the display-text
//! templates for task events, and the message types shared between the
//! relay server and the client agent.

pub mod error;
pub mod model;
pub mod templates;
pub mod wire;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use model::{Notification, NotificationKind};
pub use wire::{ClientMessage, MarkReadRequest, NotificationList, ServerMessage, TaskEvent};
