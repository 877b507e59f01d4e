use std::time::Duration;

use jiff::civil::date;
use jiff::Timestamp;
use sqlx::mysql::MySqlPoolOptions;
use warranty_core::{
    Activation, ActorId, BarcodeCode, BarcodeEventKind, BarcodeFilter, BarcodePrefix,
    BarcodeReader, BarcodeRepository, BarcodeStatus, BatchRepository, BatchStatus,
    BatchTransition, ChunkCommit, CollisionResolution, CollisionType, CustomerId, NewBarcode,
    NewBatch, NewCollision, Page, Priority, ProductId, PurchaseInfo, SequenceKind,
    SequenceRepository, StorefrontId,
};
use warranty_storage::{MySqlStore, StorageError};
use warranty_test_infra::mysql::{MySqlServer, MySqlSettings};

struct Fixture {
    _mysql: MySqlServer,
    store: MySqlStore,
}

impl Fixture {
    async fn start() -> Self {
        let mysql = MySqlServer::start(MySqlSettings::default())
            .await
            .expect("start mysql");
        let url = mysql.dsn().await.expect("mysql dsn");
        let store = MySqlStore::new(connect_with_retry(&url).await);
        store.apply_schema().await.expect("create schema");

        Self {
            _mysql: mysql,
            store,
        }
    }
}

async fn connect_with_retry(url: &str) -> sqlx::MySqlPool {
    let mut last_error = None;

    for _ in 0..20 {
        match MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
        {
            Ok(pool) => return pool,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect mysql: {last_error:?}");
}

fn now() -> Timestamp {
    "2024-01-10T00:00:00Z".parse().unwrap()
}

fn barcode(code: &str) -> NewBarcode {
    NewBarcode {
        code: BarcodeCode::parse(code).unwrap(),
        product_id: ProductId::new(7),
        storefront_id: Some(StorefrontId::new(3)),
        batch_id: None,
        warranty_period_months: 24,
        created_at: now(),
    }
}

fn new_batch(number: &str, requested: u32) -> NewBatch {
    NewBatch {
        batch_number: number.to_string(),
        product_id: ProductId::new(7),
        storefront_id: StorefrontId::new(3),
        prefix: BarcodePrefix::new("WB").unwrap(),
        description: Some("spring run".to_string()),
        tags: vec!["retail".to_string()],
        requested,
        max_retries: 3,
        expiry_months: 24,
        priority: Priority::High,
        notify_on_complete: false,
        created_by: ActorId::new(1),
        created_at: now(),
    }
}

#[tokio::test]
async fn create_and_read_barcode() {
    let fixture = Fixture::start().await;

    let created = fixture
        .store
        .create_barcode(barcode("WB-2024-00000001"))
        .await
        .unwrap();
    assert_eq!(created.status, BarcodeStatus::Generated);

    let by_code = fixture
        .store
        .get_by_code(&created.code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_code, created);
    assert!(fixture.store.code_exists(&created.code).await.unwrap());
}

#[tokio::test]
async fn duplicate_code_is_reported_with_the_code() {
    let fixture = Fixture::start().await;
    fixture
        .store
        .create_barcode(barcode("WB-2024-00000001"))
        .await
        .unwrap();

    let err = fixture
        .store
        .create_barcode(barcode("WB-2024-00000001"))
        .await
        .unwrap_err();
    assert_eq!(err, StorageError::Duplicate("WB-2024-00000001".to_string()));
}

#[tokio::test]
async fn activation_is_guarded_and_audited() {
    let fixture = Fixture::start().await;
    let created = fixture
        .store
        .create_barcode(barcode("WB-2024-00000002"))
        .await
        .unwrap();

    let activation = Activation {
        customer_id: CustomerId::new(42),
        activated_at: now(),
        expires_at: "2026-01-10T00:00:00Z".parse().unwrap(),
        purchase: PurchaseInfo {
            retailer: "Acme".to_string(),
            invoice_number: Some("INV-1".to_string()),
            serial_number: Some("SN-1".to_string()),
            purchase_date: date(2024, 1, 5),
            price: None,
        },
    };

    let active = fixture
        .store
        .activate(created.id, activation.clone(), ActorId::new(42))
        .await
        .unwrap();
    assert_eq!(active.status, BarcodeStatus::Active);
    assert_eq!(active.customer_id, Some(CustomerId::new(42)));
    assert_eq!(active.purchase.unwrap().purchase_date, date(2024, 1, 5));

    let err = fixture
        .store
        .activate(created.id, activation, ActorId::new(42))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    let events = fixture.store.barcode_events(created.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, BarcodeEventKind::Activated);
}

#[tokio::test]
async fn serial_number_filter() {
    let fixture = Fixture::start().await;
    for code in ["WB-2024-00000010", "WB-2024-00000011"] {
        fixture.store.create_barcode(barcode(code)).await.unwrap();
    }

    let all = fixture
        .store
        .list_barcodes(&BarcodeFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(all.total, 2);

    let none = fixture
        .store
        .list_barcodes(
            &BarcodeFilter {
                serial_number: Some("SN-missing".to_string()),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(none.total, 0);
    assert!(none.items.is_empty());
}

#[tokio::test]
async fn chunk_commit_updates_counters_and_collisions() {
    let fixture = Fixture::start().await;
    let batch = fixture
        .store
        .create_batch(new_batch("BATCH-2024-000001", 3))
        .await
        .unwrap();
    assert_eq!(batch.tags, vec!["retail".to_string()]);

    fixture
        .store
        .transition_batch(
            batch.id,
            BatchTransition {
                from: BatchStatus::Pending,
                to: BatchStatus::InProgress,
                at: now(),
                actor: None,
                reason: None,
            },
        )
        .await
        .unwrap();

    let mut codes = Vec::new();
    for code in ["WB-2024-00000101", "WB-2024-00000102"] {
        let mut row = barcode(code);
        row.batch_id = Some(batch.id);
        codes.push(row);
    }
    let chunk = ChunkCommit {
        barcodes: codes,
        failed: 1,
        errors: 1,
        retries: 2,
        collisions: vec![NewCollision {
            slot: 1,
            candidate: BarcodeCode::parse("WB-2024-00000099").unwrap(),
            collision_type: CollisionType::DuplicateInStore,
            resolution: CollisionResolution::Regenerated,
            detected_at: now(),
            resolved_at: Some(now()),
        }],
        last_error: None,
        committed_at: Some(now()),
    };

    let updated = fixture.store.commit_chunk(batch.id, chunk).await.unwrap();
    assert_eq!(updated.generated, 3);
    assert_eq!(updated.successful, 2);
    assert_eq!(updated.failed, 1);
    assert_eq!(updated.collision_count, 1);
    assert_eq!(updated.retry_count, 2);

    let collisions = fixture
        .store
        .list_collisions(batch.id, Page::default())
        .await
        .unwrap();
    assert_eq!(collisions.total, 1);
    assert_eq!(collisions.items[0].slot, 1);

    let linked = fixture
        .store
        .list_barcodes(
            &BarcodeFilter {
                batch_id: Some(batch.id),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(linked.total, 2);
}

#[tokio::test]
async fn chunk_with_taken_code_is_rejected_whole() {
    let fixture = Fixture::start().await;
    fixture
        .store
        .create_barcode(barcode("WB-2024-00000201"))
        .await
        .unwrap();
    let batch = fixture
        .store
        .create_batch(new_batch("BATCH-2024-000002", 2))
        .await
        .unwrap();
    fixture
        .store
        .transition_batch(
            batch.id,
            BatchTransition {
                from: BatchStatus::Pending,
                to: BatchStatus::InProgress,
                at: now(),
                actor: None,
                reason: None,
            },
        )
        .await
        .unwrap();

    let chunk = ChunkCommit {
        barcodes: vec![barcode("WB-2024-00000200"), barcode("WB-2024-00000201")],
        ..Default::default()
    };
    let err = fixture.store.commit_chunk(batch.id, chunk).await.unwrap_err();
    assert_eq!(err, StorageError::Duplicate("WB-2024-00000201".to_string()));

    let unchanged = fixture.store.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(unchanged.generated, 0);
    assert!(!fixture
        .store
        .code_exists(&BarcodeCode::parse("WB-2024-00000200").unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn stale_transition_conflicts() {
    let fixture = Fixture::start().await;
    let batch = fixture
        .store
        .create_batch(new_batch("BATCH-2024-000003", 1))
        .await
        .unwrap();

    let err = fixture
        .store
        .transition_batch(
            batch.id,
            BatchTransition {
                from: BatchStatus::InProgress,
                to: BatchStatus::Completed,
                at: now(),
                actor: None,
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

#[tokio::test]
async fn sequences_count_per_kind_and_year() {
    let fixture = Fixture::start().await;

    assert_eq!(fixture.store.next_sequence(SequenceKind::Batch, 2024).await.unwrap(), 1);
    assert_eq!(fixture.store.next_sequence(SequenceKind::Batch, 2024).await.unwrap(), 2);
    assert_eq!(fixture.store.next_sequence(SequenceKind::Claim, 2024).await.unwrap(), 1);
    assert_eq!(fixture.store.next_sequence(SequenceKind::Batch, 2025).await.unwrap(), 1);
}
