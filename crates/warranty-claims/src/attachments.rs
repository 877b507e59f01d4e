use crate::claims::authorize_read;
use crate::settings::AttachmentPolicy;
use crate::workflow::{event, Workflow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use warranty_core::deadline::within;
use warranty_core::{
    Actor, AttachmentId, AttachmentType, Claim, ClaimAttachment, ClaimId, ClaimStore,
    NewAttachment, Result, Role, ScanOutcome, TimelineEventType, Violations, WarrantyError,
};

/// Metadata of a file already placed in attachment storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAttachment {
    pub filename: String,
    /// Where the payload lives; handed to the scanner as is.
    pub storage_ref: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub attachment_type: AttachmentType,
}

/// Checks an upload against `policy`. Oversized payloads are reported as
/// `payload_too_large` once every other field is fine.
pub(crate) fn check_upload(policy: &AttachmentPolicy, upload: &UploadAttachment) -> Result<()> {
    let filename = upload.filename.trim();
    let mut violations = Violations::new();
    violations
        .check(!filename.is_empty(), "filename", "is required", || None)
        .check(
            filename.chars().count() <= policy.max_filename_len,
            "filename",
            format!("at most {} characters", policy.max_filename_len),
            || None,
        )
        .check(
            !filename.contains(['/', '\\']),
            "filename",
            "must not contain path separators",
            || Some(filename.to_string()),
        )
        .check(
            !upload.storage_ref.trim().is_empty(),
            "storage_ref",
            "is required",
            || None,
        )
        .check(upload.size_bytes > 0, "size_bytes", "must not be empty", || None)
        .check(
            policy.allows_mime(&upload.mime_type),
            "mime_type",
            "is not an accepted file type",
            || Some(upload.mime_type.clone()),
        );
    violations.finish()?;

    if upload.size_bytes > policy.max_size_bytes {
        return Err(WarrantyError::PayloadTooLarge {
            size: upload.size_bytes,
            limit: policy.max_size_bytes,
        });
    }
    Ok(())
}

impl<S: ClaimStore> Workflow<S> {
    /// Records an attachment as `pending` and hands it to the scanner.
    pub(crate) async fn attach(
        &self,
        actor: &Actor,
        claim: &Claim,
        upload: UploadAttachment,
    ) -> Result<ClaimAttachment> {
        let now = self.now();
        let attachment = self
            .store
            .create_attachment(NewAttachment {
                claim_id: claim.id,
                filename: upload.filename.trim().to_string(),
                storage_ref: upload.storage_ref,
                size_bytes: upload.size_bytes,
                mime_type: upload.mime_type.trim().to_ascii_lowercase(),
                attachment_type: upload.attachment_type,
                uploaded_by: actor.id,
                uploaded_at: now,
            })
            .await?;

        let entry = event(
            actor,
            TimelineEventType::AttachmentUploaded,
            format!("{} {} uploaded", attachment.attachment_type, attachment.filename),
            actor.customer_id().is_some(),
            now,
        );
        self.append_event(claim.id, entry).await?;
        info!(claim = %claim.claim_number, attachment_id = %attachment.id, size = attachment.size_bytes, "attachment stored");

        // A failed hand-off leaves the attachment pending and hidden.
        if let Err(err) = self.scanner.submit(attachment.id, &attachment.storage_ref).await {
            warn!(attachment_id = %attachment.id, error = %err, "scanner submission failed");
        }
        Ok(attachment)
    }
}

/// Claim evidence gated by the scanner verdict.
pub struct AttachmentService<S> {
    workflow: Arc<Workflow<S>>,
}

impl<S> Clone for AttachmentService<S> {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
        }
    }
}

impl<S: ClaimStore> AttachmentService<S> {
    pub fn new(workflow: Arc<Workflow<S>>) -> Self {
        Self { workflow }
    }

    fn timeout(&self) -> std::time::Duration {
        self.workflow.settings.request_timeout
    }

    #[instrument(skip_all, fields(actor = %actor.id, claim_id = %claim_id, filename = %upload.filename))]
    pub async fn upload(&self, actor: &Actor, claim_id: ClaimId, upload: UploadAttachment) -> Result<ClaimAttachment> {
        check_upload(&self.workflow.policy, &upload)?;
        within(self.timeout(), "attachment.upload", async {
            let claim = self.workflow.require_claim(claim_id).await?;
            authorize_read(actor, &claim)?;
            self.workflow.attach(actor, &claim, upload).await
        })
        .await
    }

    /// Stores the scanner's verdict on a pending attachment.
    pub async fn record_scan(
        &self,
        actor: &Actor,
        id: AttachmentId,
        passed: bool,
        detail: Option<String>,
    ) -> Result<ClaimAttachment> {
        actor.require_agent("record scan results")?;
        let outcome = ScanOutcome {
            passed,
            detail,
            scanned_at: self.workflow.now(),
        };
        let attachment = within(self.timeout(), "attachment.scan", async {
            Ok(self.workflow.store.set_scan_result(id, outcome).await?)
        })
        .await?;
        info!(attachment_id = %id, status = %attachment.scan_status, "scan result recorded");
        Ok(attachment)
    }

    /// Attachments of a claim that passed the scan.
    pub async fn customer_view(&self, actor: &Actor, claim_id: ClaimId) -> Result<Vec<ClaimAttachment>> {
        within(self.timeout(), "attachment.list", async {
            let claim = self.workflow.require_claim(claim_id).await?;
            authorize_read(actor, &claim)?;
            let mut attachments = self.workflow.store.list_attachments(claim_id).await?;
            attachments.retain(ClaimAttachment::is_customer_visible);
            Ok(attachments)
        })
        .await
    }

    /// Every attachment of a claim whatever its scan status.
    pub async fn staff_view(&self, actor: &Actor, claim_id: ClaimId) -> Result<Vec<ClaimAttachment>> {
        actor.require_any(&[Role::Agent, Role::Admin, Role::Technician], "read unscanned attachments")?;
        within(self.timeout(), "attachment.list", async {
            self.workflow.require_claim(claim_id).await?;
            Ok(self.workflow.store.list_attachments(claim_id).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warranty_core::ErrorKind;

    fn photo(size: u64) -> UploadAttachment {
        UploadAttachment {
            filename: "crack.jpg".into(),
            storage_ref: "s3://claims/crack.jpg".into(),
            size_bytes: size,
            mime_type: "IMAGE/JPEG".into(),
            attachment_type: AttachmentType::Photo,
        }
    }

    #[test]
    fn accepts_whitelisted_types() {
        let policy = AttachmentPolicy::default();
        assert!(check_upload(&policy, &photo(2048)).is_ok());
    }

    #[test]
    fn size_limit_is_its_own_error() {
        let policy = AttachmentPolicy::builder().max_size_bytes(1024).build();
        let err = check_upload(&policy, &photo(1025)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);

        let mut bad = photo(1025);
        bad.mime_type = "application/x-msdownload".into();
        let err = check_upload(&policy, &bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn filenames_are_plain() {
        let policy = AttachmentPolicy::default();
        let mut upload = photo(10);
        upload.filename = "../etc/passwd".into();
        assert_eq!(check_upload(&policy, &upload).unwrap_err().kind(), ErrorKind::InvalidArgument);

        upload.filename = "x".repeat(256);
        assert_eq!(check_upload(&policy, &upload).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }
}
