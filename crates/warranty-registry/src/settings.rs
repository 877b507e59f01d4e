use std::time::Duration;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct RegistrySettings {
    /// Deadline for each service call.
    #[builder(default = Duration::from_secs(5))]
    pub request_timeout: Duration,

    /// Longest accepted retailer, invoice or serial number.
    #[builder(default = 200)]
    pub max_field_len: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::builder().build()
    }
}
