//! # relay-store
//!
//! In-memory notification store for taskrelay.
//!
//! Holds all notification records for the lifetime of the server process.
//! There is no persistence: each server instance owns an independent store,
//! and single-instance semantics are an explicit architectural property, not
//! a bug. The store is a plain owned service object — construct it once at
//! startup and clone the handle into every consumer.
//!
//! Unbounded growth in the source design is replaced by an optional
//! per-recipient retention cap: when a recipient exceeds the cap, their
//! oldest records are evicted on create.

use std::sync::{Arc, PoisonError, RwLock};

use relay_core::{Notification, NotificationKind};
use uuid::Uuid;

/// Default per-recipient retention cap. `0` disables eviction.
pub const DEFAULT_RETENTION_PER_RECIPIENT: usize = 500;

/// Result of a recipient-scoped mark-as-read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// The flag flipped false → true.
    Updated,
    /// The record was already read; still a success (idempotence).
    AlreadyRead,
    /// The record exists but belongs to a different recipient.
    WrongRecipient,
    /// No record with this id.
    Missing,
}

impl MarkReadOutcome {
    /// True when the desired end state ("read") holds for the caller.
    pub fn is_read(&self) -> bool {
        matches!(self, MarkReadOutcome::Updated | MarkReadOutcome::AlreadyRead)
    }
}

/// Process-local notification store.
///
/// Cheap to clone; all clones share the same records. Interior locking uses
/// a `std::sync::RwLock` — operations are quick scans and never hold the
/// lock across an await point.
#[derive(Clone)]
pub struct NotificationStore {
    records: Arc<RwLock<Vec<Notification>>>,
    retention_per_recipient: usize,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    /// Create a store with the default per-recipient retention cap.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION_PER_RECIPIENT)
    }

    /// Create a store with an explicit per-recipient retention cap.
    /// `0` disables eviction entirely (faithful unbounded mode).
    pub fn with_retention(retention_per_recipient: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            retention_per_recipient,
        }
    }

    /// Allocate a new unread notification and append it to the store.
    ///
    /// Always succeeds; input validation is the caller's concern. Returns
    /// the created record.
    pub fn create(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        recipient: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Notification {
        let notification = Notification::new(kind, title, message, recipient, data);
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        records.push(notification.clone());
        self.evict_locked(&mut records, &notification.recipient);
        tracing::debug!(
            notification_id = %notification.id,
            kind = %notification.kind,
            recipient = %notification.recipient,
            "notification created"
        );
        notification
    }

    /// All records for `recipient`, ordered by `created_at` descending.
    ///
    /// O(n) scan over the full store; fine at this scale, no indexing.
    pub fn list_for_recipient(&self, recipient: &str) -> Vec<Notification> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<Notification> = records
            .iter()
            .filter(|n| n.recipient == recipient)
            .cloned()
            .collect();
        // Newest first; the UUIDv7 id breaks created_at ties in creation order.
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        matching
    }

    /// Mark a record as read regardless of recipient.
    ///
    /// Returns whether a record with this id exists. Idempotent: marking an
    /// already-read record succeeds and returns true.
    pub fn mark_read(&self, id: Uuid) -> bool {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    /// Mark a record as read, enforcing that `recipient` owns it.
    pub fn mark_read_for(&self, id: Uuid, recipient: &str) -> MarkReadOutcome {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|n| n.id == id) {
            Some(n) if n.recipient != recipient => MarkReadOutcome::WrongRecipient,
            Some(n) if n.read => MarkReadOutcome::AlreadyRead,
            Some(n) => {
                n.read = true;
                MarkReadOutcome::Updated
            }
            None => MarkReadOutcome::Missing,
        }
    }

    /// Count of unread records for `recipient`.
    pub fn unread_count(&self, recipient: &str) -> usize {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .filter(|n| n.recipient == recipient && !n.read)
            .count()
    }

    /// Empty the entire store. Testing/reset utility; not exposed on any
    /// production route.
    pub fn clear_all(&self) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        records.clear();
    }

    /// Total number of records across all recipients.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict the recipient's oldest records past the retention cap. The
    /// vector is append-ordered, so the first matching entries are oldest.
    fn evict_locked(&self, records: &mut Vec<Notification>, recipient: &str) {
        if self.retention_per_recipient == 0 {
            return;
        }
        let count = records.iter().filter(|n| n.recipient == recipient).count();
        if count <= self.retention_per_recipient {
            return;
        }
        let mut excess = count - self.retention_per_recipient;
        records.retain(|n| {
            if excess > 0 && n.recipient == recipient {
                excess -= 1;
                return false;
            }
            true
        });
        tracing::debug!(
            recipient = %recipient,
            cap = self.retention_per_recipient,
            "evicted oldest notifications past retention cap"
        );
    }
}
