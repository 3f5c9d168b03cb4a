//! Display-text templates for task notifications.
//!
//! Translates a notification kind plus a subject string (typically the task
//! title) into the user-facing `(title, message)` pair. Pure and total; text
//! generation lives entirely here so that event producers only ever supply
//! `(kind, subject, recipient, payload)`.

use crate::model::NotificationKind;

/// Render the `(title, message)` pair for a task notification.
pub fn render(kind: NotificationKind, subject: &str) -> (String, String) {
    match kind {
        NotificationKind::TaskCompleted => (
            "✅ Görev Tamamlandı!".to_string(),
            format!("\"{}\" başarıyla tamamlandı", subject),
        ),
        NotificationKind::TaskAdded => (
            "📝 Yeni Görev Eklendi".to_string(),
            format!("\"{}\" görev listenize eklendi", subject),
        ),
        NotificationKind::DeadlineWarning => (
            "⏰ Deadline Uyarısı".to_string(),
            format!("\"{}\" görevi için son tarih yaklaşıyor", subject),
        ),
        NotificationKind::AiSuggestion => (
            "🤖 AI Önerisi Hazır".to_string(),
            format!("\"{}\" için AI önerileri oluşturuldu", subject),
        ),
        NotificationKind::TaskAssigned => (
            "👥 Görev Atandı".to_string(),
            format!("\"{}\" görevi size atandı", subject),
        ),
    }
}
