use jiff::civil::Date;
use jiff::{SignedDuration, Timestamp};
use std::sync::Arc;
use warranty_core::{
    Actor, ActorId, BarcodeCode, BarcodeEventKind, BarcodeFilter, BarcodeReader, BarcodeRepository,
    BarcodeStatus, CustomerId, ErrorKind, ManualClock, Money, NewBarcode, Page, ProductId,
};
use warranty_registry::{ActivateWarranty, RegistryService, RegistrySettings, RevokeWarranty};
use warranty_storage::InMemoryStore;

const CODE: &str = "WB-2024-00000001";

fn ts(s: &str) -> Timestamp {
    s.parse().unwrap()
}

struct Fixture {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    registry: RegistryService<InMemoryStore>,
}

impl Fixture {
    async fn new(months: u32) -> Self {
        let store = Arc::new(InMemoryStore::new());
        for code in [CODE, "WB-2024-00000002"] {
            store
                .create_barcode(NewBarcode {
                    code: BarcodeCode::parse(code).unwrap(),
                    product_id: ProductId::new(7),
                    storefront_id: None,
                    batch_id: None,
                    warranty_period_months: months,
                    created_at: ts("2023-12-01T00:00:00Z"),
                })
                .await
                .unwrap();
        }
        let clock = Arc::new(ManualClock::new(ts("2024-01-10T00:00:00Z")));
        let registry = RegistryService::new(store.clone(), clock.clone(), RegistrySettings::default());
        Self {
            store,
            clock,
            registry,
        }
    }
}

fn customer() -> Actor {
    Actor::customer(CustomerId::new(5))
}

fn admin() -> Actor {
    Actor::admin(ActorId::new(1))
}

fn activation(code: &str) -> ActivateWarranty {
    ActivateWarranty {
        barcode: code.to_string(),
        customer_id: CustomerId::new(5),
        retailer: "Corner Shop".into(),
        invoice_number: Some("INV-77".into()),
        serial_number: Some("SN-0001".into()),
        purchase_date: Date::constant(2024, 1, 8),
        price: Some(Money::from_major(250)),
    }
}

#[tokio::test]
async fn activation_starts_the_warranty_clock() {
    let fx = Fixture::new(24).await;

    let detail = fx.registry.activate(&customer(), activation(CODE)).await.unwrap();
    assert_eq!(detail.barcode.status, BarcodeStatus::Active);
    assert_eq!(detail.barcode.customer_id, Some(CustomerId::new(5)));
    assert_eq!(detail.barcode.activated_at, Some(ts("2024-01-10T00:00:00Z")));
    assert_eq!(detail.barcode.expires_at, Some(ts("2026-01-10T00:00:00Z")));
    assert!(detail.warranty.can_claim);
    assert_eq!(detail.warranty.warranty_period, "2 years");
    assert_eq!(detail.warranty.days_remaining, 731);

    fx.clock.set(ts("2024-03-01T00:00:00Z"));
    let later = fx.registry.warranty(&customer(), CODE).await.unwrap();
    assert_eq!(later.warranty.days_remaining, 680);
}

#[tokio::test]
async fn second_activation_conflicts() {
    let fx = Fixture::new(24).await;
    fx.registry.activate(&customer(), activation(CODE)).await.unwrap();

    let err = fx
        .registry
        .activate(&customer(), activation(CODE))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activations_have_one_winner() {
    let fx = Fixture::new(12).await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let registry = fx.registry.clone();
            tokio::spawn(async move { registry.activate(&customer(), activation(CODE)).await })
        })
        .collect();

    let mut won = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => won += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::Conflict),
        }
    }
    assert_eq!(won, 1);

    let barcode = fx
        .store
        .get_by_code(&BarcodeCode::parse(CODE).unwrap())
        .await
        .unwrap()
        .unwrap();
    let events = fx.store.barcode_events(barcode.id).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn activation_errors() {
    let fx = Fixture::new(12).await;

    let err = fx
        .registry
        .activate(&customer(), activation("WB-2024-99999999"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut other = activation(CODE);
    other.customer_id = CustomerId::new(6);
    let err = fx.registry.activate(&customer(), other).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let mut future = activation(CODE);
    future.purchase_date = Date::constant(2024, 6, 1);
    let err = fx.registry.activate(&customer(), future).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Staff may register on the customer's behalf.
    let agent = Actor::agent(ActorId::new(3));
    let detail = fx.registry.activate(&agent, activation(CODE)).await.unwrap();
    assert_eq!(detail.barcode.customer_id, Some(CustomerId::new(5)));
}

#[tokio::test]
async fn revocation_is_audited_and_blocks_activation() {
    let fx = Fixture::new(12).await;
    fx.registry.activate(&customer(), activation(CODE)).await.unwrap();
    fx.clock.advance(SignedDuration::from_hours(1));

    let err = fx
        .registry
        .revoke(
            &customer(),
            RevokeWarranty {
                barcode: CODE.into(),
                reason: "fraud".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let revoked = fx
        .registry
        .revoke(
            &admin(),
            RevokeWarranty {
                barcode: CODE.into(),
                reason: "reported stolen".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(revoked.barcode.status, BarcodeStatus::Revoked);
    assert_eq!(revoked.barcode.revoked_reason.as_deref(), Some("reported stolen"));
    assert!(!revoked.warranty.can_claim);

    let log = fx.registry.audit_log(&admin(), CODE).await.unwrap();
    let kinds: Vec<_> = log.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![BarcodeEventKind::Activated, BarcodeEventKind::Revoked]);
    assert_eq!(log[1].actor_id, ActorId::new(1));

    let err = fx
        .registry
        .revoke(
            &admin(),
            RevokeWarranty {
                barcode: CODE.into(),
                reason: "again".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn customers_only_list_their_own_warranties() {
    let fx = Fixture::new(12).await;
    fx.registry.activate(&customer(), activation(CODE)).await.unwrap();

    let own = fx
        .registry
        .list(&customer(), BarcodeFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(own.total, 1);
    assert_eq!(own.items[0].barcode.code.as_str(), CODE);

    let all = fx
        .registry
        .list(&admin(), BarcodeFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(all.total, 2);

    let by_serial = fx
        .registry
        .list(
            &admin(),
            BarcodeFilter {
                serial_number: Some("SN-0001".into()),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_serial.total, 1);

    let stranger = Actor::customer(CustomerId::new(9));
    let err = fx.registry.warranty(&stranger, CODE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}
