use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }

            /// Prefix used in the display form, e.g. `clm-42`.
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .strip_prefix(concat!($prefix, "-"))
                    .unwrap_or(s);
                raw.parse().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identity of a persisted warranty barcode.
    BarcodeId,
    "bc"
);
define_id!(
    /// Identity of a barcode issuance batch.
    BatchId,
    "bat"
);
define_id!(CollisionId, "col");
define_id!(
    /// Identity of a warranty claim.
    ClaimId,
    "clm"
);
define_id!(TicketId, "rpr");
define_id!(AttachmentId, "att");
define_id!(TimelineEventId, "evt");
define_id!(ProductId, "prd");
define_id!(StorefrontId, "sto");
define_id!(CustomerId, "cus");
define_id!(
    /// Identity of an authenticated caller. Technicians and agents are
    /// referenced by their actor id.
    ActorId,
    "act"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        assert_eq!(ClaimId::new(42).to_string(), "clm-42");
        assert_eq!(BatchId::new(7).to_string(), "bat-7");
    }

    #[test]
    fn parse_accepts_prefixed_and_bare_forms() {
        assert_eq!("clm-42".parse::<ClaimId>().unwrap(), ClaimId::new(42));
        assert_eq!("42".parse::<ClaimId>().unwrap(), ClaimId::new(42));
        assert!("clm-x".parse::<ClaimId>().is_err());
    }
}
