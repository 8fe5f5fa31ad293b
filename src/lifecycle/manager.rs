//! # Purchase Manager
//!
//! The public face of the engine. A `PurchaseManager` is constructed
//! explicitly with its collaborators and passed to whoever needs it; there
//! is no process-wide instance.
//!
//! Request operations (`purchase_product_with_identifier`,
//! `restore_purchases`, `fetch_metadata_for_products`,
//! `resume_pending_transactions`) return immediately and never fail. Their
//! progress, including every failure, is reported through the handlers
//! registered with the `add_handler_for_*` methods.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use iap_engine::lifecycle::{EngineConfig, PurchaseManager};
//! use iap_engine::mock::{MockStore, MockValidator};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = PurchaseManager::new(
//!     EngineConfig::default(),
//!     Arc::new(MockStore::new()),
//!     Arc::new(MockValidator::new()),
//! )?;
//!
//! manager.add_handler_for_purchase_successfully_acquired(|product, _, _, solicited| {
//!     println!("unlock {product} (solicited: {solicited})");
//! });
//! manager.resume_pending_transactions();
//! manager.purchase_product_with_identifier("sku.pro");
//!
//! manager.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::catalog::{MetadataCache, MetadataCallback};
use crate::events::{AnalyticsEvent, AnalyticsModule, EventKind, PurchaseEvent};
use crate::ledger::{LedgerActor, LedgerClient, LedgerContext, LedgerError, TransactionSeed};
use crate::model::{
    MetadataFetchState, Product, PurchaseState, Transaction, TransactionState, TransactionType,
    ValidationServer, VerificationState,
};
use crate::transport::{StoreTransport, ValidationTransport};

use super::config::{ConfigError, EngineConfig};
use super::engine::{Engine, SpawningRunner};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Ledger communication failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Ledger task failed: {0}")]
    Task(String),
}

pub struct PurchaseManager {
    engine: Arc<Engine>,
    ledger: LedgerClient,
    handle: JoinHandle<()>,
}

impl PurchaseManager {
    /// Validates `config`, registers its validation servers and starts the
    /// transaction ledger. Must be called from within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn StoreTransport>,
        validator: Arc<dyn ValidationTransport>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let servers = config.validation_servers.clone();
        let engine = Arc::new(Engine::new(config, store, validator));
        if !servers.is_empty() {
            engine.pool.register_servers(servers);
        }

        let (actor, ledger) = LedgerActor::new();
        let context = LedgerContext {
            runner: Arc::new(SpawningRunner {
                engine: engine.clone(),
            }),
            ledger: ledger.downgrade(),
        };
        let handle = tokio::spawn(actor.run(context));
        info!("Purchase manager started");

        Ok(Self {
            engine,
            ledger,
            handle,
        })
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Installs the analytics module, replacing any previous one. `None`
    /// removes it.
    pub fn set_analytics_module(&self, module: Option<Arc<dyn AnalyticsModule>>) {
        debug!(installed = module.is_some(), "Analytics module set");
        self.engine.dispatcher.set_analytics(module);
    }

    /// Replaces the validation pool. Transactions already verifying finish
    /// against the servers they started with.
    #[instrument(skip(self, servers), fields(count = servers.len()))]
    pub fn register_validation_servers(&self, servers: Vec<ValidationServer>) {
        let registered = self.engine.pool.register_servers(servers);
        self.engine
            .dispatcher
            .notify(&AnalyticsEvent::DidRegisterValidationServers {
                servers: registered.to_vec(),
            });
    }

    /// Registered servers in attempt order.
    pub fn validation_servers(&self) -> Vec<ValidationServer> {
        self.engine.pool.servers().to_vec()
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Picks up records earlier sessions left outstanding with the store.
    ///
    /// Purchased records re-enter at verification; failed or cancelled ones
    /// only report their outcome. Records this process already settled are
    /// never driven again, so calling this repeatedly is harmless.
    #[instrument(skip(self))]
    pub fn resume_pending_transactions(&self) {
        self.engine
            .dispatcher
            .notify(&AnalyticsEvent::DidResumeTransactions);

        let engine = self.engine.clone();
        let ledger = self.ledger.clone();
        tokio::spawn(
            async move {
                let records = match engine.store.list_outstanding_transactions().await {
                    Ok(records) => records,
                    Err(e) => {
                        warn!(error = %e, "Listing outstanding transactions failed");
                        return;
                    }
                };
                debug!(count = records.len(), "Outstanding records");

                let plan = match ledger.resume(records).await {
                    Ok(plan) => plan,
                    Err(e) => {
                        warn!(error = %e, "Ledger unavailable");
                        return;
                    }
                };
                for record in plan.to_finish {
                    match engine.store.finish_transaction(&record).await {
                        Ok(()) => {
                            let _ = ledger.confirm_finished(record.handle);
                        }
                        Err(e) => warn!(handle = %record.handle, error = %e, "Finish retry failed"),
                    }
                }
            }
            .instrument(info_span!("resume")),
        );
    }

    /// Fetches metadata for `identifiers` and caches the result.
    pub fn fetch_metadata_for_products<I, S>(&self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_metadata_fetch(identifiers.into_iter().map(Into::into).collect(), None);
    }

    /// Like [`fetch_metadata_for_products`](Self::fetch_metadata_for_products),
    /// with a callback that receives the `MetadataFetchEnd` event before the
    /// registered handlers do.
    pub fn fetch_metadata_for_products_with<I, S, F>(&self, identifiers: I, callback: F)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(&PurchaseEvent) + Send + 'static,
    {
        self.start_metadata_fetch(
            identifiers.into_iter().map(Into::into).collect(),
            Some(Box::new(callback)),
        );
    }

    #[instrument(skip(self, callback))]
    fn start_metadata_fetch(&self, identifiers: Vec<String>, callback: Option<MetadataCallback>) {
        MetadataCache::announce(&self.engine.dispatcher, &identifiers);
        let engine = self.engine.clone();
        tokio::spawn(
            async move {
                engine
                    .cache
                    .fetch(
                        engine.store.as_ref(),
                        &engine.dispatcher,
                        identifiers,
                        callback,
                    )
                    .await;
            }
            .instrument(info_span!("metadata")),
        );
    }

    /// Starts a purchase of `product_identifier`.
    ///
    /// `DidRequestPurchase` is published before this returns. If another
    /// attempt for the same product is in flight, this one waits for it.
    #[instrument(skip(self, product_identifier), fields(product))]
    pub fn purchase_product_with_identifier(&self, product_identifier: impl Into<String>) {
        let product_identifier = product_identifier.into();
        tracing::Span::current().record("product", product_identifier.as_str());

        self.engine
            .dispatcher
            .publish(&PurchaseEvent::DidRequestPurchase {
                product_identifier: product_identifier.clone(),
            });
        if let Err(e) = self
            .ledger
            .enqueue(TransactionSeed::purchase(product_identifier))
        {
            warn!(error = %e, "Purchase not queued");
        }
    }

    /// Asks the store to restore earlier purchases. Each restored record is
    /// driven as its own transaction.
    ///
    /// `DidRequestRestore` is published before this returns.
    #[instrument(skip(self))]
    pub fn restore_purchases(&self) {
        self.engine
            .dispatcher
            .publish(&PurchaseEvent::DidRequestRestore);

        let engine = self.engine.clone();
        let ledger = self.ledger.clone();
        tokio::spawn(
            async move {
                let records = match engine.store.initiate_restore().await {
                    Ok(records) => records,
                    Err(e) => {
                        warn!(error = %e, "Restore failed");
                        return;
                    }
                };
                info!(count = records.len(), "Restore returned records");
                for record in records {
                    if let Err(e) = ledger.enqueue(TransactionSeed::restored(record)) {
                        warn!(error = %e, "Restored record not queued");
                    }
                }
            }
            .instrument(info_span!("restore")),
        );
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Calls `handler` for every cached product with
    /// `(identifier, title, description, formatted_price, raw_price)`.
    ///
    /// With `show_currency_symbol = false` the formatted price carries only
    /// the number.
    pub fn enumerate_fetched_products_with_block<F>(&self, show_currency_symbol: bool, mut handler: F)
    where
        F: FnMut(&str, &str, &str, &str, Decimal),
    {
        for product in self.engine.cache.enumerate(|_| true) {
            handler(
                &product.identifier,
                &product.title,
                &product.description,
                &product.price_display(show_currency_symbol),
                product.raw_price,
            );
        }
    }

    pub fn fetched_products(&self) -> Vec<Product> {
        self.engine.cache.enumerate(|_| true)
    }

    pub fn products_matching<P>(&self, predicate: P) -> Vec<Product>
    where
        P: Fn(&Product) -> bool,
    {
        self.engine.cache.enumerate(predicate)
    }

    pub fn product(&self, identifier: &str) -> Option<Product> {
        self.engine.cache.get(identifier)
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Subscribes `handler` to every event of `kind`.
    pub fn add_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&PurchaseEvent) + Send + Sync + 'static,
    {
        self.engine.dispatcher.registry().subscribe(kind, handler);
    }

    pub fn add_handler_for_did_request_purchase<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::DidRequestPurchase, move |event| {
            if let PurchaseEvent::DidRequestPurchase { product_identifier } = event {
                handler(product_identifier);
            }
        });
    }

    pub fn add_handler_for_did_request_restore<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_handler(EventKind::DidRequestRestore, move |_| handler());
    }

    pub fn add_handler_for_metadata_fetch_begin<F>(&self, handler: F)
    where
        F: Fn(&[String]) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::MetadataFetchBegin, move |event| {
            if let PurchaseEvent::MetadataFetchBegin {
                product_identifiers,
            } = event
            {
                handler(product_identifiers);
            }
        });
    }

    pub fn add_handler_for_metadata_fetch_end<F>(&self, handler: F)
    where
        F: Fn(&[String], MetadataFetchState) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::MetadataFetchEnd, move |event| {
            if let PurchaseEvent::MetadataFetchEnd {
                product_identifiers,
                state,
            } = event
            {
                handler(product_identifiers, *state);
            }
        });
    }

    pub fn add_handler_for_purchase_phase_begin<F>(&self, handler: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::PurchasePhaseBegin, move |event| {
            if let PurchaseEvent::PurchasePhaseBegin {
                product_identifier,
                solicited,
            } = event
            {
                handler(product_identifier, *solicited);
            }
        });
    }

    pub fn add_handler_for_purchase_phase_end<F>(&self, handler: F)
    where
        F: Fn(&str, PurchaseState, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::PurchasePhaseEnd, move |event| {
            if let PurchaseEvent::PurchasePhaseEnd {
                product_identifier,
                state,
                solicited,
            } = event
            {
                handler(product_identifier, *state, *solicited);
            }
        });
    }

    pub fn add_handler_for_restore_phase_begin<F>(&self, handler: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::RestorePhaseBegin, move |event| {
            if let PurchaseEvent::RestorePhaseBegin {
                product_identifier,
                solicited,
            } = event
            {
                handler(product_identifier, *solicited);
            }
        });
    }

    pub fn add_handler_for_restore_phase_end<F>(&self, handler: F)
    where
        F: Fn(&str, PurchaseState, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::RestorePhaseEnd, move |event| {
            if let PurchaseEvent::RestorePhaseEnd {
                product_identifier,
                state,
                solicited,
            } = event
            {
                handler(product_identifier, *state, *solicited);
            }
        });
    }

    pub fn add_handler_for_verification_phase_begin<F>(&self, handler: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::VerificationPhaseBegin, move |event| {
            if let PurchaseEvent::VerificationPhaseBegin {
                product_identifier,
                solicited,
            } = event
            {
                handler(product_identifier, *solicited);
            }
        });
    }

    pub fn add_handler_for_verification_phase_end<F>(&self, handler: F)
    where
        F: Fn(&str, VerificationState, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::VerificationPhaseEnd, move |event| {
            if let PurchaseEvent::VerificationPhaseEnd {
                product_identifier,
                state,
                solicited,
            } = event
            {
                handler(product_identifier, *state, *solicited);
            }
        });
    }

    /// The unlock signal: fires once per physical attempt whose receipt was
    /// accepted.
    pub fn add_handler_for_purchase_successfully_acquired<F>(&self, handler: F)
    where
        F: Fn(&str, TransactionType, TransactionState, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::PurchaseSuccessfullyAcquired, move |event| {
            if let PurchaseEvent::PurchaseSuccessfullyAcquired {
                product_identifier,
                transaction_type,
                transaction_state,
                solicited,
            } = event
            {
                handler(product_identifier, *transaction_type, *transaction_state, *solicited);
            }
        });
    }

    pub fn add_handler_for_purchase_failed_to_acquire<F>(&self, handler: F)
    where
        F: Fn(&str, TransactionType, TransactionState, bool) + Send + Sync + 'static,
    {
        self.add_handler(EventKind::PurchaseFailedToAcquire, move |event| {
            if let PurchaseEvent::PurchaseFailedToAcquire {
                product_identifier,
                transaction_type,
                transaction_state,
                solicited,
            } = event
            {
                handler(product_identifier, *transaction_type, *transaction_state, *solicited);
            }
        });
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Transactions currently in flight, oldest first.
    pub async fn pending_transactions(&self) -> Result<Vec<Transaction>, EngineError> {
        Ok(self.ledger.pending().await?)
    }

    /// Stops accepting requests and waits for every in-flight transaction to
    /// settle. Requests still queued behind them may be dropped.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        info!("Shutting down purchase manager...");
        drop(self.ledger);

        if let Err(e) = self.handle.await {
            tracing::error!("Ledger task failed: {:?}", e);
            return Err(EngineError::Task(e.to_string()));
        }

        info!("Purchase manager shutdown complete.");
        Ok(())
    }
}
