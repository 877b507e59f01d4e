use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use warranty_core::{CollaboratorError, CollaboratorResult, NotificationPayload, Notifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub recipient: String,
    pub template_id: String,
    pub payload: NotificationPayload,
}

/// Notifier that keeps every message it is handed.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `notify` call fail after recording the attempt.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    pub fn sent_with_template(&self, template_id: &str) -> Vec<SentNotification> {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.template_id == template_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient: &str,
        template_id: &str,
        payload: NotificationPayload,
    ) -> CollaboratorResult<()> {
        self.sent.lock().push(SentNotification {
            recipient: recipient.to_string(),
            template_id: template_id.to_string(),
            payload,
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("notifier", "smtp down"));
        }
        Ok(())
    }
}
