use crate::calendar;
use crate::error::WarrantyError;
use crate::ids::{ActorId, BarcodeId, BatchId, CustomerId, ProductId, StorefrontId};
use crate::money::Money;
use jiff::civil::Date;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

const PREFIX_MIN: usize = 2;
const PREFIX_MAX: usize = 10;
const BODY_MIN: usize = 8;
const BODY_MAX: usize = 16;

/// The configurable leading segment of a barcode: 2-10 ASCII uppercase letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BarcodePrefix(SmolStr);

impl BarcodePrefix {
    pub fn new(prefix: impl AsRef<str>) -> Result<Self, WarrantyError> {
        let prefix = prefix.as_ref();
        if !(PREFIX_MIN..=PREFIX_MAX).contains(&prefix.len())
            || !prefix.bytes().all(|b| b.is_ascii_uppercase())
        {
            return Err(WarrantyError::invalid(
                "prefix",
                format!("must be {PREFIX_MIN}-{PREFIX_MAX} uppercase letters"),
                Some(prefix.to_string()),
            ));
        }
        Ok(Self(SmolStr::new(prefix)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BarcodePrefix {
    type Error = WarrantyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BarcodePrefix> for String {
    fn from(value: BarcodePrefix) -> Self {
        value.0.to_string()
    }
}

impl fmt::Display for BarcodePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated warranty barcode string: `<PREFIX>-<YYYY>-<BODY>`.
///
/// The prefix is 2-10 uppercase letters, the year four digits and the body
/// 8-16 characters of `[0-9A-Z]`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BarcodeCode(SmolStr);

impl BarcodeCode {
    pub fn parse(code: impl AsRef<str>) -> Result<Self, WarrantyError> {
        let code = code.as_ref();
        Self::validate(code).map_err(|message| {
            WarrantyError::invalid("barcode", message, Some(code.to_string()))
        })?;
        Ok(Self(SmolStr::new(code)))
    }

    /// Assembles a code from already validated parts.
    ///
    /// Generators use this; the body is expected to be `[0-9A-Z]{8,16}`.
    pub fn from_parts(prefix: &BarcodePrefix, year: i16, body: &str) -> Self {
        debug_assert!(Self::validate_body(body));
        Self(SmolStr::new(format!("{}-{:04}-{}", prefix, year, body)))
    }

    /// Creates a code without validation, for trusted stored values.
    pub fn new_unchecked(code: impl AsRef<str>) -> Self {
        Self(SmolStr::new(code.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }

    pub fn is_valid(code: &str) -> bool {
        Self::validate(code).is_ok()
    }

    fn validate_body(body: &str) -> bool {
        (BODY_MIN..=BODY_MAX).contains(&body.len())
            && body
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
    }

    fn validate(code: &str) -> Result<(), &'static str> {
        let mut parts = code.splitn(3, '-');
        let (Some(prefix), Some(year), Some(body)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err("expected <PREFIX>-<YYYY>-<BODY>");
        };
        if !(PREFIX_MIN..=PREFIX_MAX).contains(&prefix.len())
            || !prefix.bytes().all(|b| b.is_ascii_uppercase())
        {
            return Err("prefix must be 2-10 uppercase letters");
        }
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err("year must be four digits");
        }
        if !Self::validate_body(body) {
            return Err("body must be 8-16 characters of [0-9A-Z]");
        }
        Ok(())
    }
}

impl TryFrom<String> for BarcodeCode {
    type Error = WarrantyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<BarcodeCode> for String {
    fn from(value: BarcodeCode) -> Self {
        value.0.to_string()
    }
}

impl fmt::Debug for BarcodeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BarcodeCode").field(&self.0).finish()
    }
}

impl fmt::Display for BarcodeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeStatus {
    Generated,
    Active,
    Claimed,
    /// Projection only. The store never writes it; see [`WarrantyBarcode::projected_status`].
    Expired,
    Revoked,
}

impl BarcodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BarcodeStatus::Generated => "generated",
            BarcodeStatus::Active => "active",
            BarcodeStatus::Claimed => "claimed",
            BarcodeStatus::Expired => "expired",
            BarcodeStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "generated" => BarcodeStatus::Generated,
            "active" => BarcodeStatus::Active,
            "claimed" => BarcodeStatus::Claimed,
            "expired" => BarcodeStatus::Expired,
            "revoked" => BarcodeStatus::Revoked,
            _ => return None,
        })
    }

    /// Stored status changes the store accepts. Activation has its own
    /// operation; `expired` is never written.
    pub fn can_become(self, next: BarcodeStatus) -> bool {
        matches!(
            (self, next),
            (BarcodeStatus::Active, BarcodeStatus::Claimed)
                | (BarcodeStatus::Generated, BarcodeStatus::Revoked)
                | (BarcodeStatus::Active, BarcodeStatus::Revoked)
                | (BarcodeStatus::Claimed, BarcodeStatus::Revoked)
        )
    }
}

impl fmt::Display for BarcodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purchase details captured when a customer registers a barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseInfo {
    pub retailer: String,
    pub invoice_number: Option<String>,
    pub serial_number: Option<String>,
    pub purchase_date: Date,
    pub price: Option<Money>,
}

/// A persisted warranty barcode.
///
/// Stored truth is `activated_at` plus `warranty_period_months`; everything
/// else about the warranty window is derived at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarrantyBarcode {
    pub id: BarcodeId,
    pub code: BarcodeCode,
    pub product_id: ProductId,
    pub storefront_id: Option<StorefrontId>,
    pub batch_id: Option<BatchId>,
    pub status: BarcodeStatus,
    pub warranty_period_months: u32,
    pub activated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub customer_id: Option<CustomerId>,
    pub purchase: Option<PurchaseInfo>,
    pub revoked_at: Option<Timestamp>,
    pub revoked_reason: Option<String>,
    pub created_at: Timestamp,
}

impl WarrantyBarcode {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expiry| expiry < now)
    }

    pub fn days_remaining(&self, now: Timestamp) -> u32 {
        self.expires_at
            .map(|expiry| calendar::days_until(now, expiry))
            .unwrap_or(0)
    }

    pub fn can_claim(&self, now: Timestamp) -> bool {
        self.status == BarcodeStatus::Active && !self.is_expired(now)
    }

    pub fn warranty_period(&self) -> String {
        calendar::describe_months(self.warranty_period_months)
    }

    /// Status as seen at `now`: an active or claimed barcode past its expiry
    /// reads as `expired`.
    pub fn projected_status(&self, now: Timestamp) -> BarcodeStatus {
        match self.status {
            BarcodeStatus::Active | BarcodeStatus::Claimed if self.is_expired(now) => {
                BarcodeStatus::Expired
            }
            status => status,
        }
    }

    /// Snapshot of the derived warranty fields at `now`.
    pub fn view(&self, now: Timestamp) -> WarrantyWindow {
        WarrantyWindow {
            status: self.projected_status(now),
            activated_at: self.activated_at,
            expires_at: self.expires_at,
            is_expired: self.is_expired(now),
            days_remaining: self.days_remaining(now),
            can_claim: self.can_claim(now),
            warranty_period: self.warranty_period(),
            warranty_period_months: self.warranty_period_months,
        }
    }
}

/// Derived warranty fields, computed on read and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarrantyWindow {
    pub status: BarcodeStatus,
    pub activated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub is_expired: bool,
    pub days_remaining: u32,
    pub can_claim: bool,
    pub warranty_period: String,
    pub warranty_period_months: u32,
}

/// Insert payload for a new barcode in state `generated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBarcode {
    pub code: BarcodeCode,
    pub product_id: ProductId,
    pub storefront_id: Option<StorefrontId>,
    pub batch_id: Option<BatchId>,
    pub warranty_period_months: u32,
    pub created_at: Timestamp,
}

/// Binding written by a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub customer_id: CustomerId,
    pub activated_at: Timestamp,
    pub expires_at: Timestamp,
    pub purchase: PurchaseInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeEventKind {
    Activated,
    Revoked,
    Claimed,
    StatusChanged,
}

/// One entry in a barcode's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeEvent {
    pub barcode_id: BarcodeId,
    pub kind: BarcodeEventKind,
    pub actor_id: ActorId,
    pub at: Timestamp,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn active(activated: &str, months: u32) -> WarrantyBarcode {
        let activated_at = ts(activated);
        WarrantyBarcode {
            id: BarcodeId::new(1),
            code: BarcodeCode::parse("WB-2024-00000001").unwrap(),
            product_id: ProductId::new(1),
            storefront_id: None,
            batch_id: None,
            status: BarcodeStatus::Active,
            warranty_period_months: months,
            activated_at: Some(activated_at),
            expires_at: calendar::add_months(activated_at, months),
            customer_id: Some(CustomerId::new(9)),
            purchase: None,
            revoked_at: None,
            revoked_reason: None,
            created_at: activated_at,
        }
    }

    #[test]
    fn barcode_format() {
        assert!(BarcodeCode::is_valid("WB-2024-00000001"));
        assert!(BarcodeCode::is_valid("WB-2024-COLLIDE01"));
        assert!(BarcodeCode::is_valid("ABCDEFGHIJ-2024-0123456789ABCDEF"));
        assert!(!BarcodeCode::is_valid("W-2024-00000001"));
        assert!(!BarcodeCode::is_valid("ABCDEFGHIJK-2024-00000001"));
        assert!(!BarcodeCode::is_valid("wb-2024-00000001"));
        assert!(!BarcodeCode::is_valid("WB-24-00000001"));
        assert!(!BarcodeCode::is_valid("WB-2024-0000001"));
        assert!(!BarcodeCode::is_valid("WB-2024-0123456789ABCDEFG"));
        assert!(!BarcodeCode::is_valid("WB-2024-0000000a"));
        assert!(!BarcodeCode::is_valid("WB-2024"));
    }

    #[test]
    fn prefix_bounds() {
        assert!(BarcodePrefix::new("WB").is_ok());
        assert!(BarcodePrefix::new("ABCDEFGHIJ").is_ok());
        assert!(BarcodePrefix::new("W").is_err());
        assert!(BarcodePrefix::new("ABCDEFGHIJK").is_err());
        assert!(BarcodePrefix::new("W1").is_err());
    }

    #[test]
    fn derived_fields_follow_the_clock() {
        let barcode = active("2024-01-10T00:00:00Z", 24);
        let now = ts("2024-03-01T00:00:00Z");
        assert_eq!(barcode.expires_at, Some(ts("2026-01-10T00:00:00Z")));
        assert!(!barcode.is_expired(now));
        assert!(barcode.can_claim(now));
        assert_eq!(barcode.days_remaining(now), 680);
        assert_eq!(barcode.warranty_period(), "2 years");
        assert_eq!(barcode.projected_status(now), BarcodeStatus::Active);
    }

    #[test]
    fn expired_is_projected_not_stored() {
        let barcode = active("2023-01-10T00:00:00Z", 1);
        let now = ts("2023-06-01T00:00:00Z");
        assert!(barcode.is_expired(now));
        assert!(!barcode.can_claim(now));
        assert_eq!(barcode.days_remaining(now), 0);
        assert_eq!(barcode.status, BarcodeStatus::Active);
        assert_eq!(barcode.projected_status(now), BarcodeStatus::Expired);
    }

    #[test]
    fn stored_status_changes() {
        assert!(BarcodeStatus::Active.can_become(BarcodeStatus::Claimed));
        assert!(BarcodeStatus::Generated.can_become(BarcodeStatus::Revoked));
        assert!(!BarcodeStatus::Generated.can_become(BarcodeStatus::Active));
        assert!(!BarcodeStatus::Active.can_become(BarcodeStatus::Expired));
        assert!(!BarcodeStatus::Revoked.can_become(BarcodeStatus::Active));
    }
}
