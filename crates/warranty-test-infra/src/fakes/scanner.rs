use async_trait::async_trait;
use parking_lot::Mutex;
use warranty_core::{AttachmentId, AttachmentScanner, CollaboratorResult};

/// Scanner that accepts every submission and remembers it. Tests deliver
/// verdicts through the attachment service themselves.
#[derive(Debug, Default)]
pub struct RecordingScanner {
    submitted: Mutex<Vec<(AttachmentId, String)>>,
}

impl RecordingScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<(AttachmentId, String)> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl AttachmentScanner for RecordingScanner {
    async fn submit(&self, attachment_id: AttachmentId, storage_ref: &str) -> CollaboratorResult<()> {
        self.submitted
            .lock()
            .push((attachment_id, storage_ref.to_string()));
        Ok(())
    }
}
