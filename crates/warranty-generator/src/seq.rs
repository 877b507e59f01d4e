use crate::{GenerationRequest, Generator};
use warranty_core::BarcodeCode;

/// Readable, predictable codes: four hex digits of the source followed by
/// the zero-padded counter, e.g. `WB-2024-000300000007`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeqGenerator;

impl Generator for SeqGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> BarcodeCode {
        let body = format!("{:04X}{:08}", request.source, request.counter);
        BarcodeCode::from_parts(request.prefix, request.year, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warranty_core::BarcodePrefix;

    #[test]
    fn seq_generator_produces_sequential_codes() {
        let prefix = BarcodePrefix::new("WB").unwrap();
        let codes: Vec<_> = (0..3)
            .map(|counter| {
                SeqGenerator.generate(&GenerationRequest {
                    prefix: &prefix,
                    year: 2024,
                    source: 3,
                    counter,
                })
            })
            .collect();

        assert_eq!(codes[0].as_str(), "WB-2024-000300000000");
        assert_eq!(codes[1].as_str(), "WB-2024-000300000001");
        assert_eq!(codes[2].as_str(), "WB-2024-000300000002");
        assert!(codes.iter().all(|c| BarcodeCode::is_valid(c.as_str())));
    }
}
