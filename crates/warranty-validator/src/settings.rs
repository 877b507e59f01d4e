use std::time::Duration;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ValidatorSettings {
    /// Barcodes kept in the read-through cache.
    #[builder(default = 10_000)]
    pub cache_capacity: u64,

    /// How long a cached barcode, or a cached miss, is served before the
    /// store is read again.
    #[builder(default = Duration::from_secs(30))]
    pub cache_ttl: Duration,

    /// Prefixes the storefront issues. Empty accepts any well-formed code.
    #[builder(default)]
    pub accepted_prefixes: Vec<String>,

    /// Upper bound on warranties returned by a product lookup.
    #[builder(default = 50)]
    pub max_lookup_results: u32,

    #[builder(default = 2000)]
    pub max_description_len: usize,

    #[builder(default = Duration::from_secs(3))]
    pub request_timeout: Duration,
}

impl ValidatorSettings {
    pub fn accepts_prefix(&self, prefix: &str) -> bool {
        self.accepted_prefixes.is_empty() || self.accepted_prefixes.iter().any(|p| p == prefix)
    }
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prefix_list_accepts_everything() {
        let open = ValidatorSettings::default();
        assert!(open.accepts_prefix("WB"));

        let narrow = ValidatorSettings::builder()
            .accepted_prefixes(vec!["WB".into()])
            .build();
        assert!(narrow.accepts_prefix("WB"));
        assert!(!narrow.accepts_prefix("XX"));
    }
}
