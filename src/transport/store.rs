//! # Store Transport
//!
//! The platform store the engine drives purchases through. Implementations
//! wrap whatever native purchase API the host platform offers; the engine
//! only sees raw records.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::model::{PurchaseOutcome, RawProduct, StoreHandle, TransactionType};

/// Errors reported by a [`StoreTransport`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the request outright.
    #[error("Store rejected request: {0}")]
    Rejected(String),

    /// The store does not know the product.
    #[error("Unknown product: {0}")]
    UnknownProduct(String),
}

/// A transaction record as the store reports it.
///
/// Records stay outstanding on the store side until
/// [`StoreTransport::finish_transaction`] is called for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub handle: StoreHandle,
    pub product_identifier: String,
    pub transaction_type: TransactionType,
    pub outcome: PurchaseOutcome,
}

impl RawTransaction {
    pub fn new(
        handle: impl Into<String>,
        product_identifier: impl Into<String>,
        transaction_type: TransactionType,
        outcome: PurchaseOutcome,
    ) -> Self {
        Self {
            handle: StoreHandle::new(handle),
            product_identifier: product_identifier.into(),
            transaction_type,
            outcome,
        }
    }
}

#[async_trait]
pub trait StoreTransport: Send + Sync {
    /// Fetches raw product fields. Identifiers the store does not know are
    /// simply absent from the result.
    async fn request_metadata(
        &self,
        identifiers: &[String],
    ) -> Result<HashMap<String, RawProduct>, StoreError>;

    /// Runs the native purchase flow for one product.
    async fn initiate_purchase(&self, product_identifier: &str) -> Result<RawTransaction, StoreError>;

    /// Runs the native restore flow and returns one record per restored product.
    async fn initiate_restore(&self) -> Result<Vec<RawTransaction>, StoreError>;

    /// Records left unfinished by earlier sessions.
    async fn list_outstanding_transactions(&self) -> Result<Vec<RawTransaction>, StoreError>;

    /// Marks a record as handled so the store stops reporting it.
    async fn finish_transaction(&self, record: &RawTransaction) -> Result<(), StoreError>;
}
