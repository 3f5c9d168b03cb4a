//! Wire protocol shared by the relay server and the client agent.
//!
//! WebSocket frames carry internally-tagged JSON messages, e.g.:
//!
//! ```text
//! client → server  {"type":"Join","recipient":"alice@example.com"}
//! server → client  {"type":"Joined","recipient":"alice@example.com"}
//! server → client  {"type":"Notification","payload":{...}}
//! ```
//!
//! HTTP request/response bodies for the notification gateway live here as
//! well so that both sides agree on field names.

use serde::{Deserialize, Serialize};

use crate::model::{Notification, NotificationKind};

/// Messages a client may send over the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Register this connection in the recipient's room. A connection is a
    /// member of at most one room; a second Join moves it.
    Join { recipient: String },
}

/// Messages the server pushes over the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Acknowledges a [`ClientMessage::Join`].
    Joined { recipient: String },
    /// A notification delivered to every member of the recipient's room.
    Notification { payload: Notification },
}

/// Response body of `GET /api/v1/notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
}

/// Request body of `PUT /api/v1/notifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadRequest {
    /// Id of the notification to mark as read. Absent or empty → 400.
    #[serde(default)]
    pub notification_id: Option<String>,
}

/// Request body of `POST /api/v1/events/task`.
///
/// The contract with task-domain callers: they supply only the kind, the
/// subject, and optionally an explicit recipient and a task id for deep
/// linking. Title/message text generation is entirely the template table's
/// responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: NotificationKind,
    /// Subject embedded into the templated text, typically the task title.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Target recipient; defaults to the caller's identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}
