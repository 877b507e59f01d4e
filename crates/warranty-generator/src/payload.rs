use modular_bitfield::prelude::*;
use std::fmt;

pub const PAYLOAD_BITS: u32 = 48;
pub const PAYLOAD_MASK: u64 = (1_u64 << PAYLOAD_BITS) - 1;

/// The 48 bits behind the random-looking part of a barcode.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Payload {
    /// Per-batch draw counter.
    pub counter: B32,
    /// Entropy source, unique per concurrent producer.
    pub source: B16,
}

impl Payload {
    pub fn from_parts(source: u16, counter: u32) -> Self {
        Payload::new().with_source(source).with_counter(counter)
    }

    pub fn to_u64(self) -> u64 {
        let raw = self.into_bytes();
        u64::from_le_bytes([raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], 0, 0])
    }

    pub fn from_u64(value: u64) -> Self {
        let raw = (value & PAYLOAD_MASK).to_le_bytes();
        Payload::from_bytes([raw[0], raw[1], raw[2], raw[3], raw[4], raw[5]])
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("counter", &self.counter())
            .field("source", &self.source())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_survive_u64_packing() {
        let payload = Payload::from_parts(0xBEEF, 0xDEAD_0001);
        let packed = payload.to_u64();
        assert!(packed <= PAYLOAD_MASK);

        let back = Payload::from_u64(packed);
        assert_eq!(back.source(), 0xBEEF);
        assert_eq!(back.counter(), 0xDEAD_0001);
    }

    #[test]
    fn different_sources_never_share_a_payload() {
        let a = Payload::from_parts(1, 42).to_u64();
        let b = Payload::from_parts(2, 42).to_u64();
        assert_ne!(a, b);
    }
}
