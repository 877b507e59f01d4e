use crate::ids::{ActorId, AttachmentId, ClaimId};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Receipt,
    Photo,
    Video,
    Document,
    Other,
}

impl AttachmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentType::Receipt => "receipt",
            AttachmentType::Photo => "photo",
            AttachmentType::Video => "video",
            AttachmentType::Document => "document",
            AttachmentType::Other => "other",
        }
    }
}

impl fmt::Display for AttachmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Passed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Passed => "passed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File evidence attached to a claim. Only `passed` attachments are ever
/// shown to customers; `failed` ones are kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAttachment {
    pub id: AttachmentId,
    pub claim_id: ClaimId,
    pub filename: String,
    pub storage_ref: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub attachment_type: AttachmentType,
    pub scan_status: ScanStatus,
    pub scan_detail: Option<String>,
    pub scanned_at: Option<Timestamp>,
    pub uploaded_by: ActorId,
    pub uploaded_at: Timestamp,
}

impl ClaimAttachment {
    pub fn is_customer_visible(&self) -> bool {
        self.scan_status == ScanStatus::Passed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub claim_id: ClaimId,
    pub filename: String,
    pub storage_ref: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub attachment_type: AttachmentType,
    pub uploaded_by: ActorId,
    pub uploaded_at: Timestamp,
}

impl NewAttachment {
    pub fn into_attachment(self, id: AttachmentId) -> ClaimAttachment {
        ClaimAttachment {
            id,
            claim_id: self.claim_id,
            filename: self.filename,
            storage_ref: self.storage_ref,
            size_bytes: self.size_bytes,
            mime_type: self.mime_type,
            attachment_type: self.attachment_type,
            scan_status: ScanStatus::Pending,
            scan_detail: None,
            scanned_at: None,
            uploaded_by: self.uploaded_by,
            uploaded_at: self.uploaded_at,
        }
    }
}

/// Verdict reported by the scanning collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub passed: bool,
    pub detail: Option<String>,
    pub scanned_at: Timestamp,
}

impl ScanOutcome {
    pub fn status(&self) -> ScanStatus {
        if self.passed {
            ScanStatus::Passed
        } else {
            ScanStatus::Failed
        }
    }
}
