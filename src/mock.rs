//! # Mock Transports
//!
//! Scripted collaborators for exercising the engine without a real store or
//! network.
//!
//! - [`MockStore`]: a [`StoreTransport`] driven by a queue of expectations,
//!   built with a fluent API and checked with [`MockStore::verify`].
//! - [`MockValidator`]: a [`ValidationTransport`] with one fixed behavior per
//!   endpoint and a call log.
//! - [`RecordingAnalytics`]: an [`AnalyticsModule`] that records what it was
//!   told, optionally implementing only a subset of kinds.
//!
//! ## Example
//! ```rust
//! use iap_engine::mock::MockStore;
//! use iap_engine::model::{PurchaseOutcome, Receipt, TransactionType};
//! use iap_engine::transport::RawTransaction;
//!
//! let store = MockStore::new();
//! store.expect_purchase("sku.pro").return_ok(RawTransaction::new(
//!     "store_1",
//!     "sku.pro",
//!     TransactionType::Purchase,
//!     PurchaseOutcome::Purchased { receipt: Receipt::new(b"r".to_vec()) },
//! ));
//! // ... hand `store` to a PurchaseManager ...
//! ```
//!
//! Unlike a panicking mock, an unexpected call is answered with an error and
//! remembered; `verify()` reports it. Panicking would only kill the spawned
//! task that made the call and leave the test waiting.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::events::{AnalyticsEvent, AnalyticsEventKind, AnalyticsModule};
use crate::model::{
    MetadataFetchState, PurchaseState, RawProduct, Receipt, StoreHandle, TransactionState,
    TransactionType, ValidationServer, VerificationState,
};
use crate::transport::{
    RawTransaction, StoreError, StoreTransport, TransportError, ValidationResponse,
    ValidationTransport,
};

// =============================================================================
// STORE
// =============================================================================

enum Expectation {
    Metadata {
        response: Result<HashMap<String, RawProduct>, StoreError>,
    },
    Purchase {
        product_identifier: String,
        delay: Option<Duration>,
        response: Result<RawTransaction, StoreError>,
    },
    Restore {
        response: Result<Vec<RawTransaction>, StoreError>,
    },
    Outstanding {
        response: Result<Vec<RawTransaction>, StoreError>,
    },
}

/// A call the store received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    RequestMetadata(Vec<String>),
    InitiatePurchase(String),
    InitiateRestore,
    ListOutstanding,
    Finish(StoreHandle),
}

#[derive(Default)]
struct StoreState {
    expectations: VecDeque<Expectation>,
    calls: Vec<StoreCall>,
    unexpected: Vec<String>,
    finished: Vec<StoreHandle>,
    failing_finishes: usize,
    /// Records `list_outstanding_transactions` reports when no expectation
    /// is queued for it.
    outstanding: Vec<RawTransaction>,
}

impl StoreState {
    fn unexpected(&mut self, call: &str) -> StoreError {
        self.unexpected.push(call.to_string());
        StoreError::Rejected(format!("unexpected call: {call}"))
    }
}

/// Scripted [`StoreTransport`].
///
/// Expectations are consumed in order per operation; purchase expectations
/// are matched by product so concurrent purchases of different products can
/// complete in any order. Finished records are removed from the standing
/// outstanding list, which makes the mock behave like a store across
/// repeated resumptions.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, expectation: Expectation) {
        self.lock().expectations.push_back(expectation);
    }

    /// Expects a `request_metadata` call.
    pub fn expect_metadata(&self) -> MetadataExpectationBuilder {
        MetadataExpectationBuilder { store: self.clone() }
    }

    /// Expects an `initiate_purchase` call for `product_identifier`.
    pub fn expect_purchase(&self, product_identifier: impl Into<String>) -> PurchaseExpectationBuilder {
        PurchaseExpectationBuilder {
            store: self.clone(),
            product_identifier: product_identifier.into(),
            delay: None,
        }
    }

    /// Expects an `initiate_restore` call.
    pub fn expect_restore(&self) -> RestoreExpectationBuilder {
        RestoreExpectationBuilder { store: self.clone() }
    }

    /// Expects a `list_outstanding_transactions` call with a one-off answer.
    pub fn expect_outstanding(&self) -> OutstandingExpectationBuilder {
        OutstandingExpectationBuilder { store: self.clone() }
    }

    /// Seeds records that stay outstanding until finished.
    pub fn with_outstanding(self, records: impl IntoIterator<Item = RawTransaction>) -> Self {
        self.lock().outstanding.extend(records);
        self
    }

    /// Makes the next `count` calls to `finish_transaction` fail.
    pub fn fail_next_finishes(&self, count: usize) {
        self.lock().failing_finishes = count;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn finished(&self) -> Vec<StoreHandle> {
        self.lock().finished.clone()
    }

    pub fn purchase_calls(&self, product_identifier: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, StoreCall::InitiatePurchase(id) if id == product_identifier))
            .count()
    }

    /// Panics if an expectation was left unused or an unexpected call came in.
    pub fn verify(&self) {
        let state = self.lock();
        if !state.unexpected.is_empty() {
            panic!("Unexpected store calls: {:?}", state.unexpected);
        }
        if !state.expectations.is_empty() {
            panic!(
                "Not all store expectations were met. {} remaining",
                state.expectations.len()
            );
        }
    }
}

#[async_trait]
impl StoreTransport for MockStore {
    async fn request_metadata(
        &self,
        identifiers: &[String],
    ) -> Result<HashMap<String, RawProduct>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::RequestMetadata(identifiers.to_vec()));
        let position = state
            .expectations
            .iter()
            .position(|e| matches!(e, Expectation::Metadata { .. }));
        match position.and_then(|i| state.expectations.remove(i)) {
            Some(Expectation::Metadata { response }) => response,
            _ => Err(state.unexpected("request_metadata")),
        }
    }

    async fn initiate_purchase(&self, product_identifier: &str) -> Result<RawTransaction, StoreError> {
        let (delay, response) = {
            let mut state = self.lock();
            state
                .calls
                .push(StoreCall::InitiatePurchase(product_identifier.to_string()));
            let position = state.expectations.iter().position(|e| {
                matches!(e, Expectation::Purchase { product_identifier: id, .. } if id == product_identifier)
            });
            match position.and_then(|i| state.expectations.remove(i)) {
                Some(Expectation::Purchase {
                    delay, response, ..
                }) => (delay, response),
                _ => {
                    let call = format!("initiate_purchase({product_identifier})");
                    (None, Err(state.unexpected(&call)))
                }
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        response
    }

    async fn initiate_restore(&self) -> Result<Vec<RawTransaction>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::InitiateRestore);
        let position = state
            .expectations
            .iter()
            .position(|e| matches!(e, Expectation::Restore { .. }));
        match position.and_then(|i| state.expectations.remove(i)) {
            Some(Expectation::Restore { response }) => response,
            _ => Err(state.unexpected("initiate_restore")),
        }
    }

    async fn list_outstanding_transactions(&self) -> Result<Vec<RawTransaction>, StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::ListOutstanding);
        let position = state
            .expectations
            .iter()
            .position(|e| matches!(e, Expectation::Outstanding { .. }));
        match position.and_then(|i| state.expectations.remove(i)) {
            Some(Expectation::Outstanding { response }) => response,
            _ => Ok(state.outstanding.clone()),
        }
    }

    async fn finish_transaction(&self, record: &RawTransaction) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Finish(record.handle.clone()));
        if state.failing_finishes > 0 {
            state.failing_finishes -= 1;
            return Err(StoreError::Unavailable("finish failed".into()));
        }
        state.outstanding.retain(|r| r.handle != record.handle);
        state.finished.push(record.handle.clone());
        Ok(())
    }
}

/// Builder for `request_metadata` expectations.
pub struct MetadataExpectationBuilder {
    store: MockStore,
}

impl MetadataExpectationBuilder {
    pub fn return_ok(self, products: impl IntoIterator<Item = (String, RawProduct)>) {
        self.store.push(Expectation::Metadata {
            response: Ok(products.into_iter().collect()),
        });
    }

    pub fn return_err(self, error: StoreError) {
        self.store.push(Expectation::Metadata {
            response: Err(error),
        });
    }
}

/// Builder for `initiate_purchase` expectations.
pub struct PurchaseExpectationBuilder {
    store: MockStore,
    product_identifier: String,
    delay: Option<Duration>,
}

impl PurchaseExpectationBuilder {
    /// Holds the answer back for `delay`, keeping the purchase in flight.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn return_ok(self, record: RawTransaction) {
        self.finish(Ok(record));
    }

    pub fn return_err(self, error: StoreError) {
        self.finish(Err(error));
    }

    fn finish(self, response: Result<RawTransaction, StoreError>) {
        self.store.push(Expectation::Purchase {
            product_identifier: self.product_identifier,
            delay: self.delay,
            response,
        });
    }
}

/// Builder for `initiate_restore` expectations.
pub struct RestoreExpectationBuilder {
    store: MockStore,
}

impl RestoreExpectationBuilder {
    pub fn return_ok(self, records: Vec<RawTransaction>) {
        self.store.push(Expectation::Restore { response: Ok(records) });
    }

    pub fn return_err(self, error: StoreError) {
        self.store.push(Expectation::Restore {
            response: Err(error),
        });
    }
}

/// Builder for one-off `list_outstanding_transactions` answers.
pub struct OutstandingExpectationBuilder {
    store: MockStore,
}

impl OutstandingExpectationBuilder {
    pub fn return_ok(self, records: Vec<RawTransaction>) {
        self.store.push(Expectation::Outstanding { response: Ok(records) });
    }

    pub fn return_err(self, error: StoreError) {
        self.store.push(Expectation::Outstanding {
            response: Err(error),
        });
    }
}

/// A purchased record carrying `receipt` bytes.
pub fn purchased(
    handle: &str,
    product_identifier: &str,
    transaction_type: TransactionType,
    receipt: &[u8],
) -> RawTransaction {
    RawTransaction::new(
        handle,
        product_identifier,
        transaction_type,
        crate::model::PurchaseOutcome::Purchased {
            receipt: Receipt::new(receipt.to_vec()),
        },
    )
}

// =============================================================================
// VALIDATOR
// =============================================================================

/// How a scripted endpoint answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    Accept,
    Reject,
    Unreachable,
    /// Never answers; the pool's timeout has to cut it off.
    Hang,
}

/// Scripted [`ValidationTransport`]. Endpoints without a behavior are
/// unreachable.
#[derive(Clone, Default)]
pub struct MockValidator {
    behaviors: Arc<Mutex<HashMap<String, ServerBehavior>>>,
    calls: Arc<Mutex<Vec<String>>>,
    receipts: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, endpoint: impl Into<String>, behavior: ServerBehavior) -> Self {
        self.set(endpoint, behavior);
        self
    }

    pub fn set(&self, endpoint: impl Into<String>, behavior: ServerBehavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.into(), behavior);
    }

    /// Endpoints contacted so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls().iter().filter(|e| *e == endpoint).count()
    }

    /// Receipt bytes posted so far, one entry per call.
    pub fn receipts(&self) -> Vec<Vec<u8>> {
        self.receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ValidationTransport for MockValidator {
    async fn post(&self, endpoint: &str, receipt: &Receipt) -> Result<ValidationResponse, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(endpoint.to_string());
        self.receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(receipt.as_bytes().to_vec());
        let behavior = self
            .behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .copied()
            .unwrap_or(ServerBehavior::Unreachable);

        match behavior {
            ServerBehavior::Accept => Ok(ValidationResponse { accepted: true }),
            ServerBehavior::Reject => Ok(ValidationResponse { accepted: false }),
            ServerBehavior::Unreachable => Err(TransportError::Unreachable(endpoint.to_string())),
            ServerBehavior::Hang => std::future::pending().await,
        }
    }
}

// =============================================================================
// ANALYTICS
// =============================================================================

/// Records every analytics call it implements.
#[derive(Default)]
pub struct RecordingAnalytics {
    capabilities: Option<HashSet<AnalyticsEventKind>>,
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Implements only `kinds`; everything else is declined.
    pub fn only(kinds: impl IntoIterator<Item = AnalyticsEventKind>) -> Self {
        Self {
            capabilities: Some(kinds.into_iter().collect()),
            events: Mutex::default(),
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<AnalyticsEventKind> {
        self.events().iter().map(AnalyticsEvent::kind).collect()
    }

    fn record(&self, event: AnalyticsEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl AnalyticsModule for RecordingAnalytics {
    fn implements(&self, kind: AnalyticsEventKind) -> bool {
        self.capabilities
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&kind))
    }

    fn did_resume_transactions(&self) {
        self.record(AnalyticsEvent::DidResumeTransactions);
    }

    fn did_register_validation_servers(&self, servers: &[ValidationServer]) {
        self.record(AnalyticsEvent::DidRegisterValidationServers {
            servers: servers.to_vec(),
        });
    }

    fn user_did_request_metadata(&self, product_identifiers: &[String]) {
        self.record(AnalyticsEvent::UserDidRequestMetadata {
            product_identifiers: product_identifiers.to_vec(),
        });
    }

    fn user_did_request_purchase(&self, product_identifier: &str) {
        self.record(AnalyticsEvent::UserDidRequestPurchase {
            product_identifier: product_identifier.to_string(),
        });
    }

    fn user_did_request_restore(&self) {
        self.record(AnalyticsEvent::UserDidRequestRestore);
    }

    fn did_begin_metadata_fetch(&self, product_identifiers: &[String]) {
        self.record(AnalyticsEvent::DidBeginMetadataFetch {
            product_identifiers: product_identifiers.to_vec(),
        });
    }

    fn did_end_metadata_fetch(&self, product_identifiers: &[String], state: MetadataFetchState) {
        self.record(AnalyticsEvent::DidEndMetadataFetch {
            product_identifiers: product_identifiers.to_vec(),
            state,
        });
    }

    fn did_begin_purchase(&self, product_identifier: &str, solicited: bool) {
        self.record(AnalyticsEvent::DidBeginPurchase {
            product_identifier: product_identifier.to_string(),
            solicited,
        });
    }

    fn did_end_purchase(&self, product_identifier: &str, state: PurchaseState, solicited: bool) {
        self.record(AnalyticsEvent::DidEndPurchase {
            product_identifier: product_identifier.to_string(),
            state,
            solicited,
        });
    }

    fn did_begin_restore(&self, product_identifier: &str, solicited: bool) {
        self.record(AnalyticsEvent::DidBeginRestore {
            product_identifier: product_identifier.to_string(),
            solicited,
        });
    }

    fn did_end_restore(&self, product_identifier: &str, state: PurchaseState, solicited: bool) {
        self.record(AnalyticsEvent::DidEndRestore {
            product_identifier: product_identifier.to_string(),
            state,
            solicited,
        });
    }

    fn did_begin_verification_phase(&self, product_identifier: &str, solicited: bool) {
        self.record(AnalyticsEvent::DidBeginVerificationPhase {
            product_identifier: product_identifier.to_string(),
            solicited,
        });
    }

    fn did_end_verification_phase(
        &self,
        product_identifier: &str,
        state: VerificationState,
        solicited: bool,
    ) {
        self.record(AnalyticsEvent::DidEndVerificationPhase {
            product_identifier: product_identifier.to_string(),
            state,
            solicited,
        });
    }

    fn did_begin_verification(&self, product_identifier: &str, server: &str) {
        self.record(AnalyticsEvent::DidBeginVerification {
            product_identifier: product_identifier.to_string(),
            server: server.to_string(),
        });
    }

    fn did_end_verification(&self, product_identifier: &str, server: &str, state: VerificationState) {
        self.record(AnalyticsEvent::DidEndVerification {
            product_identifier: product_identifier.to_string(),
            server: server.to_string(),
            state,
        });
    }

    fn did_successfully_acquire_product(
        &self,
        product_identifier: &str,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    ) {
        self.record(AnalyticsEvent::DidSuccessfullyAcquireProduct {
            product_identifier: product_identifier.to_string(),
            transaction_type,
            transaction_state,
            solicited,
        });
    }

    fn did_fail_to_acquire_product(
        &self,
        product_identifier: &str,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    ) {
        self.record(AnalyticsEvent::DidFailToAcquireProduct {
            product_identifier: product_identifier.to_string(),
            transaction_type,
            transaction_state,
            solicited,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PurchaseOutcome;

    #[tokio::test]
    async fn test_mock_store_with_expectations() {
        let store = MockStore::new();
        store
            .expect_purchase("sku.pro")
            .return_ok(purchased("store_1", "sku.pro", TransactionType::Purchase, b"r"));
        store
            .expect_purchase("sku.gold")
            .return_err(StoreError::UnknownProduct("sku.gold".into()));

        let gold = store.initiate_purchase("sku.gold").await;
        assert_eq!(gold, Err(StoreError::UnknownProduct("sku.gold".into())));
        let pro = store.initiate_purchase("sku.pro").await.unwrap();
        assert_eq!(pro.handle, StoreHandle::new("store_1"));

        store.verify();
    }

    #[tokio::test]
    async fn test_unexpected_call_is_reported_not_panicked() {
        let store = MockStore::new();
        let result = store.initiate_restore().await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        let verify = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.verify()));
        assert!(verify.is_err());
    }

    #[tokio::test]
    async fn test_finished_records_leave_outstanding_list() {
        let record = RawTransaction::new("store_7", "sku.pro", TransactionType::Purchase, PurchaseOutcome::Cancelled);
        let store = MockStore::new().with_outstanding([record.clone()]);

        assert_eq!(store.list_outstanding_transactions().await.unwrap().len(), 1);
        store.fail_next_finishes(1);
        assert!(store.finish_transaction(&record).await.is_err());
        assert_eq!(store.list_outstanding_transactions().await.unwrap().len(), 1);
        store.finish_transaction(&record).await.unwrap();
        assert!(store.list_outstanding_transactions().await.unwrap().is_empty());
        assert_eq!(store.finished(), vec![StoreHandle::new("store_7")]);
    }

    #[tokio::test]
    async fn test_validator_scripts() {
        let validator = MockValidator::new()
            .with("https://a", ServerBehavior::Accept)
            .with("https://b", ServerBehavior::Reject);
        let receipt = Receipt::new(b"r".to_vec());

        assert!(validator.post("https://a", &receipt).await.unwrap().accepted);
        assert!(!validator.post("https://b", &receipt).await.unwrap().accepted);
        assert!(validator.post("https://c", &receipt).await.is_err());
        assert_eq!(validator.calls(), vec!["https://a", "https://b", "https://c"]);
    }
}
