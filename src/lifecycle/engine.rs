//! Shared state of one [`PurchaseManager`](super::PurchaseManager): the
//! collaborators it drives and the components every transaction touches.

use std::sync::Arc;
use tracing::{error, Instrument};

use crate::catalog::MetadataCache;
use crate::events::Dispatcher;
use crate::ledger::{LedgerClient, Start, TransactionRunner};
use crate::model::Transaction;
use crate::transport::{StoreTransport, ValidationTransport};
use crate::verification::ValidationServerPool;

use super::config::EngineConfig;
use super::driver::TransactionDriver;

pub(crate) struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn StoreTransport>,
    pub(crate) pool: ValidationServerPool,
    pub(crate) cache: MetadataCache,
    pub(crate) dispatcher: Dispatcher,
}

impl Engine {
    pub(crate) fn new(
        config: EngineConfig,
        store: Arc<dyn StoreTransport>,
        validator: Arc<dyn ValidationTransport>,
    ) -> Self {
        let pool = ValidationServerPool::new(validator, config.verification_timeout());
        Self {
            config,
            store,
            pool,
            cache: MetadataCache::new(),
            dispatcher: Dispatcher::new(),
        }
    }
}

/// Spawns one driver task per transaction the ledger starts.
pub(crate) struct SpawningRunner {
    pub(crate) engine: Arc<Engine>,
}

impl TransactionRunner for SpawningRunner {
    fn launch(&self, transaction: Transaction, start: Start, ledger: LedgerClient) {
        let span = tracing::info_span!(
            "transaction",
            id = %transaction.id,
            product = %transaction.product_identifier
        );
        let driver = TransactionDriver::new(self.engine.clone(), ledger);
        tokio::spawn(
            async move {
                if let Err(e) = driver.drive(transaction, start).await {
                    error!(error = %e, "Transaction driver stopped");
                }
            }
            .instrument(span),
        );
    }
}
