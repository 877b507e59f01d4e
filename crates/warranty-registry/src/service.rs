use crate::settings::RegistrySettings;
use jiff::civil::Date;
use jiff::tz::TimeZone;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use warranty_core::calendar::add_months;
use warranty_core::deadline::within;
use warranty_core::{
    Activation, Actor, BarcodeCode, BarcodeEvent, BarcodeFilter, BarcodeRepository,
    BarcodeStatus, Clock, CustomerId, Money, Page, Paged, PurchaseInfo, Result, Violations,
    WarrantyBarcode, WarrantyError, WarrantyWindow,
};

/// Registration request for a generated barcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateWarranty {
    pub barcode: String,
    pub customer_id: CustomerId,
    pub retailer: String,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    pub purchase_date: Date,
    #[serde(default)]
    pub price: Option<Money>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeWarranty {
    pub barcode: String,
    pub reason: String,
}

/// A barcode with its warranty fields derived at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarrantyDetail {
    pub barcode: WarrantyBarcode,
    pub warranty: WarrantyWindow,
}

impl WarrantyDetail {
    pub fn at(barcode: WarrantyBarcode, now: Timestamp) -> Self {
        let warranty = barcode.view(now);
        Self { barcode, warranty }
    }
}

pub struct RegistryService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    settings: RegistrySettings,
}

impl<S> Clone for RegistryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S: BarcodeRepository> RegistryService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: RegistrySettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    async fn require_barcode(&self, code: &BarcodeCode) -> Result<WarrantyBarcode> {
        self.store
            .get_by_code(code)
            .await?
            .ok_or_else(|| WarrantyError::not_found("barcode", code))
    }

    fn parse_code(raw: &str) -> Result<BarcodeCode> {
        BarcodeCode::parse(raw)
    }

    /// Binds a generated barcode to a customer and starts its warranty.
    ///
    /// Customers may only register for themselves; staff may register on a
    /// customer's behalf.
    #[instrument(skip_all, fields(actor = %actor.id, barcode = %request.barcode))]
    pub async fn activate(&self, actor: &Actor, request: ActivateWarranty) -> Result<WarrantyDetail> {
        match actor.customer_id() {
            Some(own) if own != request.customer_id => {
                return Err(WarrantyError::Forbidden(format!(
                    "{} may not register warranties for {}",
                    actor.id, request.customer_id
                )));
            }
            Some(_) => {}
            None => actor.require_agent("register warranties")?,
        }

        let now = self.clock.now();
        let today = now.to_zoned(TimeZone::UTC).date();
        let code = validate_activation(&request, today, self.settings.max_field_len)?;

        within(self.settings.request_timeout, "barcode.activate", async {
            let barcode = self.require_barcode(&code).await?;
            match barcode.status {
                BarcodeStatus::Generated => {}
                BarcodeStatus::Revoked => {
                    return Err(WarrantyError::invalid_state("barcode", barcode.status, "activate"));
                }
                status => {
                    return Err(WarrantyError::Conflict(format!(
                        "barcode {code} is already {status}"
                    )));
                }
            }

            let expires_at = add_months(now, barcode.warranty_period_months).ok_or_else(|| {
                WarrantyError::internal(format!(
                    "expiry of {code} overflows: {now} + {} months",
                    barcode.warranty_period_months
                ))
            })?;
            let activation = Activation {
                customer_id: request.customer_id,
                activated_at: now,
                expires_at,
                purchase: PurchaseInfo {
                    retailer: request.retailer.trim().to_string(),
                    invoice_number: request.invoice_number,
                    serial_number: request.serial_number,
                    purchase_date: request.purchase_date,
                    price: request.price,
                },
            };

            // The store guards on `generated`; a concurrent activation loses
            // with a conflict.
            let activated = self.store.activate(barcode.id, activation, actor.id).await?;
            info!(
                barcode_id = %activated.id,
                customer_id = %request.customer_id,
                %expires_at,
                "warranty activated"
            );
            Ok(WarrantyDetail::at(activated, now))
        })
        .await
    }

    /// Withdraws a barcode. Admin only; a reason is required.
    #[instrument(skip_all, fields(actor = %actor.id, barcode = %request.barcode))]
    pub async fn revoke(&self, actor: &Actor, request: RevokeWarranty) -> Result<WarrantyDetail> {
        actor.require_admin("revoke warranties")?;
        let code = Self::parse_code(&request.barcode)?;
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(WarrantyError::invalid("reason", "is required", None));
        }

        within(self.settings.request_timeout, "barcode.revoke", async {
            let barcode = self.require_barcode(&code).await?;
            if barcode.status == BarcodeStatus::Revoked {
                return Err(WarrantyError::invalid_state("barcode", barcode.status, "revoke"));
            }

            let now = self.clock.now();
            let revoked = self
                .store
                .revoke(barcode.id, barcode.status, reason.to_string(), actor.id, now)
                .await?;
            info!(barcode_id = %revoked.id, from = %barcode.status, "warranty revoked");
            Ok(WarrantyDetail::at(revoked, now))
        })
        .await
    }

    /// Warranty detail for a barcode. Customers only see their own.
    pub async fn warranty(&self, actor: &Actor, barcode: &str) -> Result<WarrantyDetail> {
        let code = Self::parse_code(barcode)?;
        let found = within(
            self.settings.request_timeout,
            "barcode.get",
            self.require_barcode(&code),
        )
        .await?;

        match actor.customer_id() {
            Some(own) if found.customer_id != Some(own) => {
                debug!(barcode = %code, "customer asked for a barcode bound to someone else");
                Err(WarrantyError::Forbidden(format!(
                    "barcode {code} is not registered to {own}"
                )))
            }
            Some(_) => Ok(WarrantyDetail::at(found, self.clock.now())),
            None => {
                actor.require_agent("read warranties")?;
                Ok(WarrantyDetail::at(found, self.clock.now()))
            }
        }
    }

    /// Lists barcodes. A customer's listing is always narrowed to their own.
    pub async fn list(
        &self,
        actor: &Actor,
        mut filter: BarcodeFilter,
        page: Page,
    ) -> Result<Paged<WarrantyDetail>> {
        match actor.customer_id() {
            Some(own) => filter.customer_id = Some(own),
            None => actor.require_agent("list warranties")?,
        }

        let now = self.clock.now();
        within(self.settings.request_timeout, "barcode.list", async {
            let paged = self.store.list_barcodes(&filter, page).await?;
            Ok(paged.map(|barcode| WarrantyDetail::at(barcode, now)))
        })
        .await
    }

    /// Activation, claim and revocation history of a barcode, oldest first.
    pub async fn audit_log(&self, actor: &Actor, barcode: &str) -> Result<Vec<BarcodeEvent>> {
        actor.require_agent("read barcode history")?;
        let code = Self::parse_code(barcode)?;

        within(self.settings.request_timeout, "barcode.events", async {
            let found = self.require_barcode(&code).await?;
            Ok(self.store.barcode_events(found.id).await?)
        })
        .await
    }
}

fn validate_activation(request: &ActivateWarranty, today: Date, max: usize) -> Result<BarcodeCode> {
    let too_long = |value: &Option<String>| value.as_ref().is_some_and(|v| v.len() > max);

    let mut violations = Violations::new();
    violations
        .check(
            !request.retailer.trim().is_empty(),
            "retailer",
            "is required",
            || None,
        )
        .check(
            request.retailer.len() <= max,
            "retailer",
            format!("at most {max} characters"),
            || None,
        )
        .check(
            !too_long(&request.invoice_number),
            "invoice_number",
            format!("at most {max} characters"),
            || None,
        )
        .check(
            !too_long(&request.serial_number),
            "serial_number",
            format!("at most {max} characters"),
            || None,
        )
        .check(
            request.purchase_date <= today,
            "purchase_date",
            "cannot be in the future",
            || Some(request.purchase_date.to_string()),
        );

    let code = match BarcodeCode::parse(&request.barcode) {
        Ok(code) => Some(code),
        Err(WarrantyError::InvalidArgument(fields)) => {
            fields.into_iter().for_each(|f| violations.push(f));
            None
        }
        Err(other) => return Err(other),
    };

    violations.finish()?;
    code.ok_or_else(|| WarrantyError::invalid("barcode", "is required", None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warranty_core::{ErrorKind, FieldViolation};

    fn request() -> ActivateWarranty {
        ActivateWarranty {
            barcode: "WB-2024-00000001".into(),
            customer_id: CustomerId::new(5),
            retailer: "Corner Shop".into(),
            invoice_number: Some("INV-1".into()),
            serial_number: Some("SN-1".into()),
            purchase_date: Date::constant(2024, 1, 8),
            price: Some(Money::from_major(250)),
        }
    }

    fn fields(err: WarrantyError) -> Vec<String> {
        match err {
            WarrantyError::InvalidArgument(fields) => {
                fields.into_iter().map(|FieldViolation { field, .. }| field).collect()
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn validate(req: &ActivateWarranty) -> Result<BarcodeCode> {
        validate_activation(req, Date::constant(2024, 1, 10), 200)
    }

    #[test]
    fn accepts_well_formed_metadata() {
        let code = validate(&request()).unwrap();
        assert_eq!(code.as_str(), "WB-2024-00000001");
    }

    #[test]
    fn reports_every_bad_field() {
        let mut req = request();
        req.barcode = "wb-2024-1".into();
        req.retailer = "  ".into();
        req.purchase_date = Date::constant(2024, 2, 1);

        let err = validate(&req).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(fields(err), vec!["retailer", "purchase_date", "barcode"]);
    }

    #[test]
    fn long_serial_is_rejected() {
        let mut req = request();
        req.serial_number = Some("X".repeat(201));
        let err = validate(&req).unwrap_err();
        assert_eq!(fields(err), vec!["serial_number"]);
    }
}
