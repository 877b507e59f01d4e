use std::time::Duration;
use typed_builder::TypedBuilder;

/// Knobs of the claim workflow.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ClaimSettings {
    /// A completed repair costing more than `estimate × (100 + tolerance)%`
    /// needs the customer's approval before the claim can be resolved.
    #[builder(default = 20)]
    pub overrun_tolerance_percent: u32,

    /// Deadline for each service call.
    #[builder(default = Duration::from_secs(10))]
    pub request_timeout: Duration,

    /// Largest accepted bulk status update.
    #[builder(default = 100)]
    pub max_bulk: usize,

    /// Attempts at appending a timeline entry when the claim keeps changing
    /// underneath.
    #[builder(default = 3)]
    pub commit_retries: usize,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

fn default_mime_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/webp",
        "image/heic",
        "video/mp4",
        "video/quicktime",
        "application/pdf",
        "text/plain",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Upload limits for claim attachments.
#[derive(Debug, Clone, TypedBuilder)]
pub struct AttachmentPolicy {
    #[builder(default = DEFAULT_MAX_ATTACHMENT_BYTES)]
    pub max_size_bytes: u64,

    /// Accepted mime types, compared case-insensitively.
    #[builder(default = default_mime_types())]
    pub allowed_mime_types: Vec<String>,

    #[builder(default = 255)]
    pub max_filename_len: usize,
}

impl AttachmentPolicy {
    pub fn allows_mime(&self, mime: &str) -> bool {
        let mime = mime.trim();
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime))
    }
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ClaimSettings::default();
        assert_eq!(settings.overrun_tolerance_percent, 20);
        assert_eq!(settings.max_bulk, 100);

        let policy = AttachmentPolicy::default();
        assert_eq!(policy.max_size_bytes, 10 * 1024 * 1024);
        assert!(policy.allows_mime("application/pdf"));
        assert!(policy.allows_mime("IMAGE/JPEG"));
        assert!(!policy.allows_mime("application/x-msdownload"));
    }

    #[test]
    fn custom_whitelist() {
        let policy = AttachmentPolicy::builder()
            .allowed_mime_types(vec!["image/png".into()])
            .build();
        assert!(policy.allows_mime("image/png"));
        assert!(!policy.allows_mime("application/pdf"));
    }
}
