mod cli;

use crate::cli::{Backend, Cli, LogFormatArg};
use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warranty_core::{
    Actor, ActorId, BatchId, CollaboratorResult, IssuanceStore, Money, NoopNotifier,
    ProductCatalog, ProductId, ProductInfo, StorefrontId, SystemClock,
};
use warranty_generator::ObfuscatedGenerator;
use warranty_issuance::{CreateBatch, EngineSettings, IssuanceService};
use warranty_storage::{InMemoryStore, MySqlStore};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The issuer runs outside the platform, so every product id is accepted.
struct AnyProduct;

#[async_trait]
impl ProductCatalog for AnyProduct {
    async fn lookup_product(&self, id: ProductId) -> CollaboratorResult<Option<ProductInfo>> {
        Ok(Some(ProductInfo {
            id,
            name: format!("product {id}"),
            sku: id.to_string(),
            brand: None,
            category: None,
            description: None,
            base_price: Money::ZERO,
            image_url: None,
        }))
    }

    async fn lookup_product_by_sku(&self, _: &str) -> CollaboratorResult<Option<ProductInfo>> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::try_parse()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormatArg::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormatArg::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!(
        storage_backend = ?config.storage,
        prefix = %config.prefix,
        quantity = config.quantity,
        "starting warranty issuer"
    );

    match config.storage {
        Backend::InMemory => run(&config, InMemoryStore::new()).await,
        Backend::Mysql => {
            let dsn = config
                .mysql_dsn
                .as_deref()
                .context("mysql dsn is required when storage backend is mysql")?;
            let store = MySqlStore::connect(dsn).await?;
            store.apply_schema().await?;
            run(&config, store).await
        }
    }
}

async fn run<S: IssuanceStore>(config: &Cli, store: S) -> anyhow::Result<()> {
    let settings = EngineSettings::builder()
        .workers(config.workers)
        .chunk_size(config.chunk_size)
        .build();
    let service = IssuanceService::new(
        Arc::new(store),
        ObfuscatedGenerator::default(),
        Arc::new(AnyProduct),
        Arc::new(NoopNotifier),
        Arc::new(SystemClock),
        settings,
    );
    let operator = config
        .operator
        .map(|id| Actor::admin(ActorId::new(id)))
        .unwrap_or_else(Actor::system);

    let batch = service
        .create_batch(
            &operator,
            CreateBatch {
                product_id: ProductId::new(config.product),
                storefront_id: StorefrontId::new(config.storefront),
                quantity: config.quantity,
                prefix: config.prefix.clone(),
                expiry_months: config.expiry_months,
                priority: Default::default(),
                description: None,
                tags: Vec::new(),
                max_retries: None,
                notify_on_complete: false,
            },
        )
        .await?;
    service.start_batch(&operator, batch.id).await?;

    wait_for_batch(&service, batch.id).await
}

async fn wait_for_batch<S: IssuanceStore>(
    service: &IssuanceService<S, ObfuscatedGenerator>,
    id: BatchId,
) -> anyhow::Result<()> {
    loop {
        let snapshot = service.progress(id).await?;
        info!(
            batch = %snapshot.batch_number,
            status = %snapshot.status,
            progress = snapshot.progress,
            processed = snapshot.processed,
            collisions = snapshot.collision_count,
            rate = snapshot.rate.unwrap_or_default(),
            "batch progress"
        );
        if snapshot.status.is_terminal() {
            info!(
                successful = snapshot.successful,
                failed = snapshot.failed,
                status = %snapshot.status,
                "batch finished"
            );
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
