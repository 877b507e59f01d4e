use jiff::civil::Date;
use jiff::Timestamp;
use std::sync::Arc;
use warranty_core::{
    Actor, ActorId, BarcodeCode, BarcodeRepository, CustomerId, ErrorKind, ManualClock, Money,
    NewBarcode, ProductId,
};
use warranty_registry::{ActivateWarranty, RegistryService, RegistrySettings, RevokeWarranty};
use warranty_storage::InMemoryStore;
use warranty_test_infra::fakes::{StaticCatalog, StaticCustomers};
use warranty_validator::{
    CoverageCheck, CoverageDecision, ProductLookup, ValidationStatus, ValidatorService,
};

const ACTIVE: &str = "WB-2024-00000001";
const UNREGISTERED: &str = "WB-2024-00000002";
const REVOKED: &str = "WB-2024-00000003";
const UNKNOWN: &str = "WB-2024-99999999";

fn ts(s: &str) -> Timestamp {
    s.parse().unwrap()
}

struct Fixture {
    clock: Arc<ManualClock>,
    catalog: Arc<StaticCatalog>,
    registry: RegistryService<InMemoryStore>,
    validator: ValidatorService<InMemoryStore>,
}

fn activation(code: &str, serial: &str) -> ActivateWarranty {
    ActivateWarranty {
        barcode: code.to_string(),
        customer_id: CustomerId::new(5),
        retailer: "Corner Shop".into(),
        invoice_number: Some("INV-77".into()),
        serial_number: Some(serial.into()),
        purchase_date: Date::constant(2024, 1, 8),
        price: Some(Money::from_major(250)),
    }
}

impl Fixture {
    /// Three 24-month barcodes for the kettle: one active, one never
    /// registered, one registered and then revoked. The clock reads
    /// 2024-03-01 afterwards.
    async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        for code in [ACTIVE, UNREGISTERED, REVOKED] {
            store
                .create_barcode(NewBarcode {
                    code: BarcodeCode::parse(code).unwrap(),
                    product_id: ProductId::new(7),
                    storefront_id: None,
                    batch_id: None,
                    warranty_period_months: 24,
                    created_at: ts("2023-12-01T00:00:00Z"),
                })
                .await
                .unwrap();
        }

        let clock = Arc::new(ManualClock::new(ts("2024-01-10T00:00:00Z")));
        let registry = RegistryService::new(store.clone(), clock.clone(), RegistrySettings::default());
        let customer = Actor::customer(CustomerId::new(5));
        registry.activate(&customer, activation(ACTIVE, "SN-0001")).await.unwrap();
        registry.activate(&customer, activation(REVOKED, "SN-0003")).await.unwrap();
        registry
            .revoke(
                &Actor::admin(ActorId::new(1)),
                RevokeWarranty {
                    barcode: REVOKED.into(),
                    reason: "reported stolen".into(),
                },
            )
            .await
            .unwrap();
        clock.set(ts("2024-03-01T00:00:00Z"));

        let catalog = Arc::new(StaticCatalog::new().with_product(StaticCatalog::product(7, "Kettle", "KT-100")));
        let customers = Arc::new(StaticCustomers::new().with_customer("ana@example.com", CustomerId::new(5)));
        let validator = ValidatorService::builder()
            .store(store)
            .catalog(catalog.clone())
            .customers(customers)
            .clock(clock.clone())
            .build();

        Self {
            clock,
            catalog,
            registry,
            validator,
        }
    }
}

#[tokio::test]
async fn active_barcodes_validate_without_leaking_the_owner() {
    let fx = Fixture::new().await;

    let response = fx.validator.validate(ACTIVE, None).await;
    assert!(response.valid);
    assert_eq!(response.status, ValidationStatus::Active);
    assert_eq!(response.product.as_ref().unwrap().name, "Kettle");
    assert_eq!(response.product.as_ref().unwrap().brand.as_deref(), Some("Acme"));

    let warranty = response.warranty.as_ref().unwrap();
    assert!(warranty.can_claim);
    assert_eq!(warranty.days_remaining, 680);
    assert_eq!(warranty.warranty_period, "2 years");
    assert!(response.coverage.as_ref().unwrap().active);

    let json = serde_json::to_string(&response).unwrap();
    for private in ["customer", "purchase", "Corner Shop", "INV-77", "SN-0001", "retailer"] {
        assert!(!json.contains(private), "{private} leaked in {json}");
    }
}

#[tokio::test]
async fn revoked_unknown_and_malformed_codes_look_the_same() {
    let fx = Fixture::new().await;

    let mut answers = Vec::new();
    for code in [REVOKED, UNKNOWN, "not-a-barcode"] {
        let response = fx.validator.validate(code, None).await;
        assert!(!response.valid);
        assert_eq!(response.status, ValidationStatus::NotFound);

        let mut json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["barcode"], code);
        json.as_object_mut().unwrap().remove("barcode");
        answers.push(json);
    }
    assert_eq!(answers[0], answers[1]);
    assert_eq!(answers[1], answers[2]);
    assert!(answers[0]["warranty"].is_null());
    assert!(answers[0]["product"].is_null());
}

#[tokio::test]
async fn unregistered_barcodes_are_genuine_but_not_claimable() {
    let fx = Fixture::new().await;

    let response = fx.validator.validate(UNREGISTERED, None).await;
    assert!(!response.valid);
    assert_eq!(response.status, ValidationStatus::Generated);
    assert!(response.product.is_some());
    let warranty = response.warranty.unwrap();
    assert!(warranty.activated_at.is_none());
    assert!(!warranty.can_claim);
    assert!(!response.coverage.unwrap().active);
}

#[tokio::test]
async fn sku_must_match_the_barcode_product() {
    let fx = Fixture::new().await;

    let response = fx.validator.validate(ACTIVE, Some("TOASTER-9")).await;
    assert!(!response.valid);
    assert_eq!(response.status, ValidationStatus::ProductMismatch);
    assert!(response.product.is_none());
    assert!(response.warranty.is_none());

    let response = fx.validator.validate(ACTIVE, Some("kt-100")).await;
    assert_eq!(response.status, ValidationStatus::Active);
}

#[tokio::test]
async fn warranty_fields_are_derived_at_read_time() {
    let fx = Fixture::new().await;

    let before = fx.validator.validate(ACTIVE, None).await;
    assert!(before.valid);

    // The cached record is reused; the expiry is computed against the clock.
    fx.clock.set(ts("2026-02-01T00:00:00Z"));
    let after = fx.validator.validate(ACTIVE, None).await;
    assert!(!after.valid);
    assert_eq!(after.status, ValidationStatus::Expired);
    let warranty = after.warranty.unwrap();
    assert!(warranty.is_expired);
    assert_eq!(warranty.days_remaining, 0);
    assert!(!after.coverage.unwrap().active);
}

#[tokio::test]
async fn revocation_is_visible_after_the_cache_entry_is_dropped() {
    let fx = Fixture::new().await;
    assert!(fx.validator.validate(ACTIVE, None).await.valid);

    fx.registry
        .revoke(
            &Actor::admin(ActorId::new(1)),
            RevokeWarranty {
                barcode: ACTIVE.into(),
                reason: "counterfeit".into(),
            },
        )
        .await
        .unwrap();
    fx.validator.forget(&BarcodeCode::parse(ACTIVE).unwrap()).await;

    let response = fx.validator.validate(ACTIVE, None).await;
    assert_eq!(response.status, ValidationStatus::NotFound);
}

#[tokio::test]
async fn catalog_outages_degrade_to_unavailable() {
    let fx = Fixture::new().await;
    fx.catalog.set_offline(true);

    let response = fx.validator.validate(ACTIVE, None).await;
    assert!(!response.valid);
    assert_eq!(response.status, ValidationStatus::Unavailable);
    assert!(response.warranty.is_none());

    fx.catalog.set_offline(false);
    assert!(fx.validator.validate(ACTIVE, None).await.valid);
}

#[tokio::test]
async fn lookup_by_product_lists_registered_warranties() {
    let fx = Fixture::new().await;
    let lookup = |sku: &str| ProductLookup {
        sku: sku.to_string(),
        ..Default::default()
    };

    let found = fx.validator.lookup_by_product(lookup("KT-100")).await.unwrap();
    let codes: Vec<_> = found.iter().map(|w| w.barcode.as_str()).collect();
    assert_eq!(codes, vec![ACTIVE]);
    assert_eq!(found[0].product.sku, "KT-100");
    assert!(found[0].warranty.can_claim);

    let by_owner = ProductLookup {
        customer_email: Some("ANA@example.com".into()),
        ..lookup("KT-100")
    };
    assert_eq!(fx.validator.lookup_by_product(by_owner).await.unwrap().len(), 1);

    let stranger = ProductLookup {
        customer_email: Some("bob@example.com".into()),
        ..lookup("KT-100")
    };
    assert!(fx.validator.lookup_by_product(stranger).await.unwrap().is_empty());

    let serial = ProductLookup {
        serial_number: Some("SN-0001".into()),
        ..lookup("KT-100")
    };
    assert_eq!(fx.validator.lookup_by_product(serial).await.unwrap().len(), 1);

    let wrong_day = ProductLookup {
        purchase_date: Some(Date::constant(2024, 1, 9)),
        ..lookup("KT-100")
    };
    assert!(fx.validator.lookup_by_product(wrong_day).await.unwrap().is_empty());

    assert!(fx.validator.lookup_by_product(lookup("NOPE")).await.unwrap().is_empty());

    let err = fx.validator.lookup_by_product(lookup("  ")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn lookup_skips_unregistered_stock_before_paging() {
    let store = Arc::new(InMemoryStore::new());
    let mut last = String::new();
    for n in 1..=60 {
        last = format!("WB-2024-{n:08}");
        store
            .create_barcode(NewBarcode {
                code: BarcodeCode::parse(&last).unwrap(),
                product_id: ProductId::new(7),
                storefront_id: None,
                batch_id: None,
                warranty_period_months: 12,
                created_at: ts("2023-12-01T00:00:00Z"),
            })
            .await
            .unwrap();
    }
    let clock = Arc::new(ManualClock::new(ts("2024-01-10T00:00:00Z")));
    let registry = RegistryService::new(store.clone(), clock.clone(), RegistrySettings::default());
    registry
        .activate(&Actor::customer(CustomerId::new(5)), activation(&last, "SN-0060"))
        .await
        .unwrap();

    let validator = ValidatorService::builder()
        .store(store)
        .catalog(Arc::new(StaticCatalog::new().with_product(StaticCatalog::product(7, "Kettle", "KT-100"))))
        .customers(Arc::new(StaticCustomers::new()))
        .clock(clock)
        .build();

    let found = validator
        .lookup_by_product(ProductLookup {
            sku: "KT-100".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].barcode.as_str(), last);

    let on_the_day = validator
        .lookup_by_product(ProductLookup {
            sku: "KT-100".into(),
            purchase_date: Some(Date::constant(2024, 1, 8)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(on_the_day.len(), 1);
}

#[tokio::test]
async fn coverage_check_prices_uncovered_issues() {
    let fx = Fixture::new().await;
    let check = |barcode: &str, issue: &str| CoverageCheck {
        barcode: barcode.to_string(),
        issue_type: issue.to_string(),
        description: "Stopped working after a week".to_string(),
    };

    let battery = fx.validator.check_coverage(check(ACTIVE, "battery")).await.unwrap();
    assert!(battery.covered);
    assert_eq!(battery.status, CoverageDecision::Covered);
    assert_eq!(battery.estimated_cost, Money::ZERO);
    assert!(!battery.next_steps.is_empty());

    let water = fx.validator.check_coverage(check(ACTIVE, "water_damage")).await.unwrap();
    assert!(!water.covered);
    assert_eq!(water.status, CoverageDecision::Excluded);
    assert_eq!(water.estimated_cost, Money::from_major(60));

    fx.clock.set(ts("2026-06-01T00:00:00Z"));
    let lapsed = fx.validator.check_coverage(check(ACTIVE, "hardware")).await.unwrap();
    assert!(!lapsed.covered);
    assert_eq!(lapsed.status, CoverageDecision::WarrantyInactive);
}

#[tokio::test]
async fn coverage_check_rejects_bad_input() {
    let fx = Fixture::new().await;

    let err = fx
        .validator
        .check_coverage(CoverageCheck {
            barcode: ACTIVE.into(),
            issue_type: "alien_abduction".into(),
            description: "gone".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = fx
        .validator
        .check_coverage(CoverageCheck {
            barcode: ACTIVE.into(),
            issue_type: "display".into(),
            description: "   ".into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    for code in [REVOKED, UNKNOWN] {
        let err = fx
            .validator
            .check_coverage(CoverageCheck {
                barcode: code.into(),
                issue_type: "display".into(),
                description: "dead pixels".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
