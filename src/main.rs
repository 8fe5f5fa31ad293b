//! # IAP Engine Demo
//!
//! Drives one purchase end to end against a scripted store and validation
//! server:
//! 1.  Building a [`PurchaseManager`] from TOML configuration.
//! 2.  Fetching metadata and listing the cached products.
//! 3.  Purchasing a product and waiting for the unlock.
//! 4.  Resuming a record a previous session left outstanding.

use iap_engine::lifecycle::{setup_tracing, EngineConfig, PurchaseManager};
use iap_engine::mock::{purchased, MockStore, MockValidator, RecordingAnalytics, ServerBehavior};
use iap_engine::model::{RawProduct, TransactionType};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

const CONFIG: &str = r#"
verification_timeout_ms = 2000

[[validation_servers]]
endpoint = "https://backup.verify.example.com"
priority = 1

[[validation_servers]]
endpoint = "https://verify.example.com"
priority = 0
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing();

    info!("Starting purchase demo");

    let store = MockStore::new().with_outstanding([purchased(
        "store_0",
        "sku.coins",
        TransactionType::Purchase,
        b"left over from last session",
    )]);
    store.expect_metadata().return_ok([
        (
            "sku.pro".to_string(),
            RawProduct::new("Pro", "Every feature, forever", "$4.99", Decimal::new(499, 2)),
        ),
        (
            "sku.coins".to_string(),
            RawProduct::new("Coins", "A pouch of 100 coins", "$0.99", Decimal::new(99, 2)),
        ),
    ]);
    store.expect_purchase("sku.pro").return_ok(purchased(
        "store_1",
        "sku.pro",
        TransactionType::Purchase,
        b"signed receipt",
    ));

    // The primary server is down; the backup answers.
    let validator = MockValidator::new()
        .with("https://verify.example.com", ServerBehavior::Unreachable)
        .with("https://backup.verify.example.com", ServerBehavior::Accept);

    let config = EngineConfig::from_toml_str(CONFIG)?;
    let manager = PurchaseManager::new(config, Arc::new(store.clone()), Arc::new(validator))?;
    let analytics = Arc::new(RecordingAnalytics::new());
    manager.set_analytics_module(Some(analytics.clone()));

    let (unlocked_tx, mut unlocked) = mpsc::unbounded_channel();
    manager.add_handler_for_purchase_successfully_acquired(move |product, kind, _, solicited| {
        info!(product, ?kind, solicited, "Unlock");
        let _ = unlocked_tx.send(product.to_string());
    });
    manager.add_handler_for_purchase_failed_to_acquire(|product, _, state, _| {
        warn!(product, ?state, "Not acquired");
    });

    // Metadata
    let (fetched_tx, mut fetched) = mpsc::unbounded_channel();
    manager.fetch_metadata_for_products_with(["sku.pro", "sku.coins"], move |event| {
        let _ = fetched_tx.send(event.clone());
    });
    let end = fetched.recv().await.ok_or("metadata fetch never finished")?;
    info!(?end, "Metadata fetched");
    manager.enumerate_fetched_products_with_block(true, |id, title, _, price, _| {
        info!(id, title, price, "Product");
    });

    // Purchase
    async {
        manager.purchase_product_with_identifier("sku.pro");
        let product = unlocked.recv().await.ok_or("no unlock")?;
        info!(product = %product, "Purchase completed");
        Ok::<_, Box<dyn std::error::Error>>(())
    }
    .instrument(tracing::info_span!("purchase"))
    .await?;

    // Resume
    manager.resume_pending_transactions();
    let product = unlocked.recv().await.ok_or("no unlock after resume")?;
    info!(product = %product, "Resumed transaction completed");

    manager.shutdown().await?;
    info!(
        analytics_events = analytics.events().len(),
        finished = store.finished().len(),
        "Demo completed successfully"
    );
    Ok(())
}
