use crate::base36::{self, PAYLOAD_WIDTH};
use crate::error::Error;
use crate::payload::{Payload, PAYLOAD_MASK};
use crate::{GenerationRequest, Generator};
use typed_builder::TypedBuilder;
use warranty_core::BarcodeCode;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ObfuscatorSettings {
    /// Odd multiplier; odd numbers are invertible modulo 2^48.
    #[builder(default = 0x5_DEEC_E66D)]
    pub multiplier: u64,
    #[builder(default = 0xDEAD_BEEF_CAFE_BABE)]
    pub mask: u64,
}

impl Default for ObfuscatorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Scrambles a 48-bit payload with a multiply and an XOR.
///
/// Both steps are bijections in 48-bit space, so distinct payloads always
/// produce distinct scrambled values.
#[derive(Debug, Clone, Copy)]
pub struct Obfuscator {
    multiplier: u64,
    inverse: u64,
    mask: u64,
}

impl Obfuscator {
    pub fn new(settings: ObfuscatorSettings) -> Result<Self, Error> {
        let multiplier = settings.multiplier & PAYLOAD_MASK;
        if multiplier == 0 {
            return Err(Error::ZeroMultiplier);
        }
        if multiplier % 2 == 0 {
            return Err(Error::EvenMultiplier(settings.multiplier));
        }
        Ok(Self {
            multiplier,
            inverse: inverse_mod_2_48(multiplier),
            mask: settings.mask & PAYLOAD_MASK,
        })
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn obfuscate(&self, payload: Payload) -> u64 {
        (payload.to_u64().wrapping_mul(self.multiplier) ^ self.mask) & PAYLOAD_MASK
    }

    /// Recovers the payload behind a scrambled value.
    pub fn reveal(&self, scrambled: u64) -> Payload {
        let unmasked = (scrambled ^ self.mask) & PAYLOAD_MASK;
        Payload::from_u64(unmasked.wrapping_mul(self.inverse) & PAYLOAD_MASK)
    }
}

impl Default for Obfuscator {
    fn default() -> Self {
        let settings = ObfuscatorSettings::default();
        let multiplier = settings.multiplier & PAYLOAD_MASK;
        Self {
            multiplier,
            inverse: inverse_mod_2_48(multiplier),
            mask: settings.mask & PAYLOAD_MASK,
        }
    }
}

/// Newton iteration; each round doubles the number of correct low bits.
fn inverse_mod_2_48(odd: u64) -> u64 {
    let mut inverse = odd;
    for _ in 0..6 {
        inverse = inverse.wrapping_mul(2_u64.wrapping_sub(odd.wrapping_mul(inverse)));
    }
    inverse & PAYLOAD_MASK
}

/// Production generator: `<prefix>-<year>-<base36 of the scrambled payload>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObfuscatedGenerator {
    obfuscator: Obfuscator,
}

impl ObfuscatedGenerator {
    pub fn new(obfuscator: Obfuscator) -> Self {
        Self { obfuscator }
    }

    pub fn obfuscator(&self) -> &Obfuscator {
        &self.obfuscator
    }

    /// Decodes the payload of a code this generator produced.
    pub fn reveal(&self, code: &BarcodeCode) -> Option<Payload> {
        let body = code.as_str().rsplit('-').next()?;
        base36::decode(body)
            .filter(|value| *value <= PAYLOAD_MASK)
            .map(|value| self.obfuscator.reveal(value))
    }
}

impl Generator for ObfuscatedGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> BarcodeCode {
        let payload = Payload::from_parts(request.source, request.counter);
        let body = base36::encode(self.obfuscator.obfuscate(payload), PAYLOAD_WIDTH);
        BarcodeCode::from_parts(request.prefix, request.year, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use warranty_core::BarcodePrefix;

    fn request(prefix: &BarcodePrefix, source: u16, counter: u32) -> GenerationRequest<'_> {
        GenerationRequest {
            prefix,
            year: 2024,
            source,
            counter,
        }
    }

    #[test]
    fn obfuscate_applies_multiplication_xor_in_u48_space() {
        let obfuscator = Obfuscator::default();
        let payload = Payload::from_parts(0xA5A5, 0x3FFF_FFFF);

        let expected =
            (payload.to_u64().wrapping_mul(obfuscator.multiplier()) ^ obfuscator.mask()) & PAYLOAD_MASK;
        assert_eq!(obfuscator.obfuscate(payload), expected);
    }

    #[test]
    fn reveal_inverts_obfuscate() {
        let obfuscator = Obfuscator::default();
        for (source, counter) in [(0, 0), (1, 7), (0xFFFF, u32::MAX), (513, 99_999)] {
            let payload = Payload::from_parts(source, counter);
            assert_eq!(obfuscator.reveal(obfuscator.obfuscate(payload)), payload);
        }
    }

    #[test]
    fn even_multiplier_is_rejected() {
        let settings = ObfuscatorSettings::builder().multiplier(4).build();
        assert_eq!(Obfuscator::new(settings).unwrap_err(), Error::EvenMultiplier(4));

        let settings = ObfuscatorSettings::builder().multiplier(1 << 48).build();
        assert_eq!(Obfuscator::new(settings).unwrap_err(), Error::ZeroMultiplier);
    }

    #[test]
    fn codes_match_the_barcode_format() {
        let generator = ObfuscatedGenerator::default();
        let prefix = BarcodePrefix::new("WB").unwrap();

        let code = generator.generate(&request(&prefix, 3, 0));
        assert!(BarcodeCode::is_valid(code.as_str()), "{code}");
        assert!(code.as_str().starts_with("WB-2024-"));
        assert_eq!(code.as_str().len(), "WB-2024-".len() + PAYLOAD_WIDTH);
    }

    #[test]
    fn generation_is_deterministic() {
        let generator = ObfuscatedGenerator::default();
        let prefix = BarcodePrefix::new("WB").unwrap();
        assert_eq!(
            generator.generate(&request(&prefix, 9, 41)),
            generator.generate(&request(&prefix, 9, 41))
        );
    }

    #[test]
    fn sources_sharing_a_counter_space_do_not_collide() {
        let generator = ObfuscatedGenerator::default();
        let prefix = BarcodePrefix::new("WB").unwrap();

        let mut seen = HashSet::new();
        for source in 0..4 {
            for counter in 0..2_000 {
                assert!(seen.insert(generator.generate(&request(&prefix, source, counter))));
            }
        }
    }

    #[test]
    fn reveal_recovers_source_and_counter_from_a_code() {
        let generator = ObfuscatedGenerator::default();
        let prefix = BarcodePrefix::new("SMART").unwrap();
        let code = generator.generate(&request(&prefix, 77, 12_345));

        let payload = generator.reveal(&code).unwrap();
        assert_eq!(payload.source(), 77);
        assert_eq!(payload.counter(), 12_345);
    }
}
