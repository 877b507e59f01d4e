const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Characters needed for any 48-bit value.
pub const PAYLOAD_WIDTH: usize = 10;

/// Uppercase base36, left padded with `0` to at least `width` characters.
pub fn encode(mut value: u64, width: usize) -> String {
    let mut digits = Vec::with_capacity(width.max(13));
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    while digits.len() < width {
        digits.push(b'0');
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

pub fn decode(input: &str) -> Option<u64> {
    input.bytes().try_fold(0_u64, |acc, byte| {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'A'..=b'Z' => byte - b'A' + 10,
            _ => return None,
        };
        acc.checked_mul(36)?.checked_add(u64::from(digit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PAYLOAD_MASK;

    #[test]
    fn pads_to_width() {
        assert_eq!(encode(0, 10), "0000000000");
        assert_eq!(encode(35, 4), "000Z");
        assert_eq!(encode(36, 2), "10");
    }

    #[test]
    fn max_payload_fits_width() {
        let encoded = encode(PAYLOAD_MASK, PAYLOAD_WIDTH);
        assert_eq!(encoded.len(), PAYLOAD_WIDTH);
        assert_eq!(decode(&encoded), Some(PAYLOAD_MASK));
    }

    #[test]
    fn rejects_lowercase_and_overflow() {
        assert_eq!(decode("abc"), None);
        assert_eq!(decode("ZZZZZZZZZZZZZZZ"), None);
    }
}
