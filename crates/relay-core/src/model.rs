//! Notification data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of notification kinds produced by the task domain.
///
/// The kind determines the display icon and the templated title/message
/// text (see [`crate::templates`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskCompleted,
    TaskAdded,
    DeadlineWarning,
    AiSuggestion,
    TaskAssigned,
}

impl NotificationKind {
    /// Wire name of the kind (snake_case, matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TaskCompleted => "task_completed",
            NotificationKind::TaskAdded => "task_added",
            NotificationKind::DeadlineWarning => "deadline_warning",
            NotificationKind::AiSuggestion => "ai_suggestion",
            NotificationKind::TaskAssigned => "task_assigned",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single notification record.
///
/// Immutable after creation except for the `read` flag, which flips
/// false → true at most once. Retrieval order is always `created_at`
/// descending; the UUIDv7 id breaks ties in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier (UUIDv7 for temporal ordering). Set once.
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Opaque identity that owns this notification (tenant key, e.g. an
    /// email address). Never reassigned.
    pub recipient: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    /// Free-form payload for client-side deep linking (e.g. a task id).
    /// Opaque to the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Notification {
    /// Build a new unread notification stamped with the current time.
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        recipient: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            title: title.into(),
            message: message.into(),
            recipient: recipient.into(),
            created_at: Utc::now(),
            read: false,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(NotificationKind::TaskCompleted.as_str(), "task_completed");
        assert_eq!(NotificationKind::TaskAdded.as_str(), "task_added");
        assert_eq!(
            NotificationKind::DeadlineWarning.as_str(),
            "deadline_warning"
        );
        assert_eq!(NotificationKind::AiSuggestion.as_str(), "ai_suggestion");
        assert_eq!(NotificationKind::TaskAssigned.as_str(), "task_assigned");
    }

    #[test]
    fn test_kind_serde_round_trip() {
        let json = serde_json::to_string(&NotificationKind::TaskAdded).unwrap();
        assert_eq!(json, r#""task_added""#);
        let kind: NotificationKind = serde_json::from_str(r#""deadline_warning""#).unwrap();
        assert_eq!(kind, NotificationKind::DeadlineWarning);
    }

    #[test]
    fn test_new_notification_is_unread() {
        let n = Notification::new(
            NotificationKind::TaskAdded,
            "title",
            "message",
            "alice@example.com",
            None,
        );
        assert!(!n.read);
        assert_eq!(n.recipient, "alice@example.com");
        assert!(n.data.is_none());
    }

    #[test]
    fn test_notification_json_skips_absent_data() {
        let n = Notification::new(NotificationKind::TaskCompleted, "t", "m", "r", None);
        let json = serde_json::to_string(&n).unwrap();
        assert!(!json.contains("\"data\""));

        let with_data = Notification::new(
            NotificationKind::TaskCompleted,
            "t",
            "m",
            "r",
            Some(serde_json::json!({ "task_id": "42" })),
        );
        let json = serde_json::to_string(&with_data).unwrap();
        assert!(json.contains(r#""task_id":"42""#));
    }

    #[test]
    fn test_notification_deserializes_without_data() {
        let json = r#"{
            "id": "01920000-0000-7000-8000-000000000000",
            "kind": "task_added",
            "title": "t",
            "message": "m",
            "recipient": "alice@example.com",
            "created_at": "2026-08-30T12:00:00Z",
            "read": false
        }"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, NotificationKind::TaskAdded);
        assert!(n.data.is_none());
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let a = Notification::new(NotificationKind::TaskAdded, "t", "m", "r", None);
        let b = Notification::new(NotificationKind::TaskAdded, "t", "m", "r", None);
        // UUIDv7 ids sort chronologically
        assert!(b.id > a.id);
    }
}
