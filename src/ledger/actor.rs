//! # Ledger Actor
//!
//! Single owner of every live [`Transaction`]. All transitions go through
//! this actor's mailbox, which gives each transaction a strict order of
//! moves without any lock around the records.
//!
//! The ledger also holds the per-product queues: a product has at most one
//! transaction in flight, later requests for it wait in FIFO order. Once a
//! transaction settles the next seed for its product is started.
//!
//! Store handles of settled transactions are remembered for the lifetime of
//! the process, so a record reported again by a later resumption or restore
//! is never driven twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::model::{StoreHandle, Transaction, TransactionId, Transition};

use super::client::LedgerClient;
use super::error::LedgerError;
use super::message::{LedgerRequest, ResumePlan, Settlement, Start, TransactionSeed};

/// Starts driving a transaction the ledger just created.
///
/// Implementations must not block: the ledger calls this from its message
/// loop.
pub trait TransactionRunner: Send + Sync + 'static {
    fn launch(&self, transaction: Transaction, start: Start, ledger: LedgerClient);
}

/// Dependencies injected into [`LedgerActor::run`].
pub struct LedgerContext {
    pub runner: Arc<dyn TransactionRunner>,
    /// Weak so that the ledger does not keep its own mailbox open.
    pub ledger: mpsc::WeakUnboundedSender<LedgerRequest>,
}

pub struct LedgerActor {
    receiver: mpsc::UnboundedReceiver<LedgerRequest>,
    transactions: HashMap<TransactionId, Transaction>,
    queues: HashMap<String, VecDeque<TransactionSeed>>,
    busy: HashMap<String, TransactionId>,
    /// Store handles of every transaction settled by this ledger. Never
    /// pruned: a store keeps reporting a record until it is finished, and a
    /// retained record is reported for as long as the process lives, so
    /// forgetting a handle would let a later resume drive it again.
    settled: HashSet<StoreHandle>,
    unfinished: HashSet<StoreHandle>,
    next_id: u64,
}

impl LedgerActor {
    pub fn new() -> (Self, LedgerClient) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = Self {
            receiver,
            transactions: HashMap::new(),
            queues: HashMap::new(),
            busy: HashMap::new(),
            settled: HashSet::new(),
            unfinished: HashSet::new(),
            next_id: 1,
        };
        (actor, LedgerClient::new(sender))
    }

    pub async fn run(mut self, context: LedgerContext) {
        info!("Ledger started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LedgerRequest::Enqueue { seed } => {
                    debug!(product = %seed.product_identifier, start = ?seed.start, "Enqueue");
                    if !self.enqueue(seed.clone()) {
                        debug!(product = %seed.product_identifier, "Store record already known; skipped");
                        continue;
                    }
                    self.pump(&seed.product_identifier, &context);
                }
                LedgerRequest::Resume {
                    records,
                    respond_to,
                } => {
                    let mut plan = ResumePlan::default();
                    let mut touched = Vec::new();
                    for record in records {
                        if self.settled.contains(&record.handle) {
                            if self.unfinished.contains(&record.handle) {
                                plan.to_finish.push(record);
                            } else {
                                plan.skipped += 1;
                            }
                            continue;
                        }
                        let product = record.product_identifier.clone();
                        if self.enqueue(TransactionSeed::resumed(record)) {
                            plan.enqueued += 1;
                            touched.push(product);
                        } else {
                            plan.skipped += 1;
                        }
                    }
                    for product in touched {
                        self.pump(&product, &context);
                    }
                    info!(
                        enqueued = plan.enqueued,
                        to_finish = plan.to_finish.len(),
                        skipped = plan.skipped,
                        "Resume"
                    );
                    let _ = respond_to.send(Ok(plan));
                }
                LedgerRequest::Advance {
                    id,
                    transition,
                    respond_to,
                } => {
                    let Some(txn) = self.transactions.get_mut(&id) else {
                        warn!(transaction = %id, "Not found");
                        let _ = respond_to.send(Err(LedgerError::NotFound(id)));
                        continue;
                    };
                    let name = transition.name();
                    let assigns_handle = matches!(transition, Transition::EndPurchase { .. });
                    match txn.apply(transition) {
                        Ok(()) => {
                            debug!(transaction = %id, transition = name, phase = txn.phase().name(), "Advanced");
                            let handle = txn.store_handle.clone().filter(|_| assigns_handle);
                            let _ = respond_to.send(Ok(txn.clone()));
                            // A resume or restore may have queued this record
                            // before the purchase learned its handle.
                            if let Some(handle) = handle {
                                self.drop_queued(&handle);
                            }
                        }
                        Err(e) => {
                            warn!(transaction = %id, error = %e, "Transition rejected");
                            let _ = respond_to.send(Err(e.into()));
                        }
                    }
                }
                LedgerRequest::Settle { id, settlement } => {
                    let Some(txn) = self.transactions.remove(&id) else {
                        warn!(transaction = %id, "Settle for unknown transaction");
                        continue;
                    };
                    if let Some(handle) = txn.store_handle.clone() {
                        if settlement == Settlement::FinishFailed {
                            self.unfinished.insert(handle.clone());
                        } else {
                            self.unfinished.remove(&handle);
                        }
                        self.settled.insert(handle);
                    }
                    if self.busy.get(&txn.product_identifier) == Some(&id) {
                        self.busy.remove(&txn.product_identifier);
                    }
                    info!(
                        transaction = %id,
                        product = %txn.product_identifier,
                        state = ?txn.transaction_state(),
                        ?settlement,
                        in_flight = self.transactions.len(),
                        "Settled"
                    );
                    self.pump(&txn.product_identifier, &context);
                }
                LedgerRequest::Finished { handle } => {
                    debug!(%handle, "Finish confirmed");
                    self.unfinished.remove(&handle);
                }
                LedgerRequest::Pending { respond_to } => {
                    let mut pending: Vec<Transaction> = self.transactions.values().cloned().collect();
                    pending.sort_by_key(|txn| txn.id);
                    debug!(count = pending.len(), "Pending");
                    let _ = respond_to.send(Ok(pending));
                }
            }
        }

        let queued: usize = self.queues.values().map(VecDeque::len).sum();
        info!(in_flight = self.transactions.len(), queued, "Shutdown");
    }

    /// Adds `seed` to its product's queue unless its store record is already
    /// queued, in flight or settled.
    fn enqueue(&mut self, seed: TransactionSeed) -> bool {
        if let Some(handle) = seed.store_handle() {
            if self.is_known(handle) {
                return false;
            }
        }
        self.queues
            .entry(seed.product_identifier.clone())
            .or_default()
            .push_back(seed);
        true
    }

    fn is_known(&self, handle: &StoreHandle) -> bool {
        self.is_driven(handle)
            || self
                .queues
                .values()
                .flatten()
                .any(|seed| seed.store_handle() == Some(handle))
    }

    /// Whether `handle` is settled or owned by a live transaction.
    fn is_driven(&self, handle: &StoreHandle) -> bool {
        self.settled.contains(handle)
            || self
                .transactions
                .values()
                .any(|txn| txn.store_handle.as_ref() == Some(handle))
    }

    /// Removes queued seeds built from `handle`.
    fn drop_queued(&mut self, handle: &StoreHandle) {
        let mut dropped = 0;
        for queue in self.queues.values_mut() {
            let before = queue.len();
            queue.retain(|seed| seed.store_handle() != Some(handle));
            dropped += before - queue.len();
        }
        if dropped > 0 {
            self.queues.retain(|_, queue| !queue.is_empty());
            debug!(%handle, dropped, "Queued duplicates of an in-flight record dropped");
        }
    }

    /// Pops the next seed for `product`, skipping seeds whose store record
    /// has already been driven.
    fn next_seed(&mut self, product: &str) -> Option<TransactionSeed> {
        loop {
            let queue = self.queues.get_mut(product)?;
            let seed = queue.pop_front();
            if queue.is_empty() {
                self.queues.remove(product);
            }
            let seed = seed?;
            match seed.store_handle() {
                Some(handle) if self.is_driven(handle) => {
                    debug!(product, %handle, "Store record already driven; seed skipped");
                }
                _ => return Some(seed),
            }
        }
    }

    /// Starts the next queued seed for `product` if nothing is in flight for it.
    fn pump(&mut self, product: &str, context: &LedgerContext) {
        if self.busy.contains_key(product) {
            return;
        }
        let Some(seed) = self.next_seed(product) else {
            return;
        };

        let Some(ledger) = LedgerClient::upgrade(&context.ledger) else {
            warn!(product, "Ledger shutting down; transaction dropped");
            return;
        };

        let id = TransactionId(self.next_id);
        self.next_id += 1;
        let txn = match &seed.start {
            Start::Purchase => Transaction::new(
                id,
                seed.product_identifier.as_str(),
                seed.transaction_type,
                seed.solicited,
            ),
            Start::Restored(record) => {
                let mut txn = Transaction::new(
                    id,
                    seed.product_identifier.as_str(),
                    seed.transaction_type,
                    seed.solicited,
                );
                txn.store_handle = Some(record.handle.clone());
                txn
            }
            Start::Resumed(record) => Transaction::resumed(
                id,
                seed.product_identifier.as_str(),
                record.transaction_type,
                record.handle.clone(),
                record.outcome.clone(),
            ),
        };

        self.busy.insert(seed.product_identifier.clone(), id);
        self.transactions.insert(id, txn.clone());
        info!(
            transaction = %id,
            product,
            solicited = seed.solicited,
            in_flight = self.transactions.len(),
            "Started"
        );
        context.runner.launch(txn, seed.start, ledger);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::purchased;
    use crate::model::{PurchaseOutcome, Receipt, TransactionType};
    use crate::transport::RawTransaction;

    /// Records launches instead of driving them.
    struct Recorder(mpsc::UnboundedSender<(Transaction, Start)>);

    impl TransactionRunner for Recorder {
        fn launch(&self, transaction: Transaction, start: Start, _ledger: LedgerClient) {
            let _ = self.0.send((transaction, start));
        }
    }

    fn start() -> (LedgerClient, mpsc::UnboundedReceiver<(Transaction, Start)>) {
        let (actor, client) = LedgerActor::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let context = LedgerContext {
            runner: Arc::new(Recorder(tx)),
            ledger: client.downgrade(),
        };
        tokio::spawn(actor.run(context));
        (client, rx)
    }

    fn record(handle: &str) -> RawTransaction {
        purchased(handle, "sku.pro", TransactionType::Purchase, b"r")
    }

    #[tokio::test]
    async fn test_same_product_is_serialized() {
        let (ledger, mut launched) = start();
        ledger.enqueue(TransactionSeed::purchase("sku.pro")).unwrap();
        ledger.enqueue(TransactionSeed::purchase("sku.pro")).unwrap();
        ledger.enqueue(TransactionSeed::purchase("sku.gold")).unwrap();

        let (first, _) = launched.recv().await.unwrap();
        let (other, _) = launched.recv().await.unwrap();
        assert_eq!(first.product_identifier, "sku.pro");
        assert_eq!(other.product_identifier, "sku.gold");

        let pending = ledger.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(launched.try_recv().is_err());

        ledger.settle(first.id, Settlement::Finished).unwrap();
        let (second, _) = launched.recv().await.unwrap();
        assert_eq!(second.product_identifier, "sku.pro");
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_resume_is_idempotent() {
        let (ledger, mut launched) = start();

        let plan = ledger.resume(vec![record("store_1")]).await.unwrap();
        assert_eq!(plan.enqueued, 1);
        let (txn, start) = launched.recv().await.unwrap();
        assert!(!txn.solicited);
        assert!(matches!(start, Start::Resumed(_)));

        // In flight: skipped.
        let plan = ledger.resume(vec![record("store_1")]).await.unwrap();
        assert_eq!((plan.enqueued, plan.skipped), (0, 1));

        // Settled: still skipped.
        ledger.settle(txn.id, Settlement::Finished).unwrap();
        let plan = ledger.resume(vec![record("store_1")]).await.unwrap();
        assert_eq!((plan.enqueued, plan.skipped), (0, 1));
        assert!(plan.to_finish.is_empty());
        assert!(launched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_finish_is_retried_not_redriven() {
        let (ledger, mut launched) = start();
        ledger.resume(vec![record("store_2")]).await.unwrap();
        let (txn, _) = launched.recv().await.unwrap();
        ledger.settle(txn.id, Settlement::FinishFailed).unwrap();

        let plan = ledger.resume(vec![record("store_2")]).await.unwrap();
        assert_eq!(plan.enqueued, 0);
        assert_eq!(plan.to_finish, vec![record("store_2")]);

        ledger
            .confirm_finished(StoreHandle::new("store_2"))
            .unwrap();
        let plan = ledger.resume(vec![record("store_2")]).await.unwrap();
        assert!(plan.to_finish.is_empty());
    }

    #[tokio::test]
    async fn test_restored_duplicate_handles_are_skipped() {
        let (ledger, mut launched) = start();
        let cancelled = RawTransaction::new(
            "store_3",
            "sku.pro",
            TransactionType::Restore,
            PurchaseOutcome::Cancelled,
        );
        ledger.enqueue(TransactionSeed::restored(cancelled.clone())).unwrap();
        ledger.enqueue(TransactionSeed::restored(cancelled)).unwrap();

        let (txn, _) = launched.recv().await.unwrap();
        assert_eq!(txn.store_handle, Some(StoreHandle::new("store_3")));
        assert_eq!(ledger.pending().await.unwrap().len(), 1);
        ledger.settle(txn.id, Settlement::Finished).unwrap();
        assert!(ledger.pending().await.unwrap().is_empty());
        assert!(launched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let (ledger, mut launched) = start();
        ledger.enqueue(TransactionSeed::purchase("sku.pro")).unwrap();
        let (txn, _) = launched.recv().await.unwrap();

        let err = ledger
            .advance(txn.id, Transition::BeginVerification)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Transition(_)));

        let missing = ledger
            .advance(TransactionId(99), Transition::BeginPurchase)
            .await
            .unwrap_err();
        assert_eq!(missing, LedgerError::NotFound(TransactionId(99)));
    }

    #[tokio::test]
    async fn test_resumed_record_of_in_flight_purchase_is_not_driven_again() {
        let (ledger, mut launched) = start();
        ledger.enqueue(TransactionSeed::purchase("sku.pro")).unwrap();
        let (txn, _) = launched.recv().await.unwrap();

        // The store reports the record before the purchase has its handle.
        let plan = ledger.resume(vec![record("store_1")]).await.unwrap();
        assert_eq!(plan.enqueued, 1);

        ledger.advance(txn.id, Transition::BeginPurchase).await.unwrap();
        ledger
            .advance(
                txn.id,
                Transition::EndPurchase {
                    outcome: PurchaseOutcome::Purchased {
                        receipt: Receipt::new(b"r".to_vec()),
                    },
                    store_handle: Some(StoreHandle::new("store_1")),
                    transaction_type: None,
                },
            )
            .await
            .unwrap();
        ledger.settle(txn.id, Settlement::Finished).unwrap();

        assert!(ledger.pending().await.unwrap().is_empty());
        assert!(launched.try_recv().is_err());

        let plan = ledger.resume(vec![record("store_1")]).await.unwrap();
        assert_eq!((plan.enqueued, plan.skipped), (0, 1));
    }

    #[tokio::test]
    async fn test_restored_record_runs_once_behind_purchases() {
        let (ledger, mut launched) = start();
        let restored = || {
            TransactionSeed::restored(RawTransaction::new(
                "store_4",
                "sku.pro",
                TransactionType::Restore,
                PurchaseOutcome::Cancelled,
            ))
        };
        ledger.enqueue(TransactionSeed::purchase("sku.pro")).unwrap();
        let (first, _) = launched.recv().await.unwrap();
        ledger.enqueue(restored()).unwrap();
        ledger.enqueue(TransactionSeed::purchase("sku.pro")).unwrap();

        // The purchase fails without a record, so the restored seed is fresh.
        ledger.settle(first.id, Settlement::Finished).unwrap();
        let (second, start) = launched.recv().await.unwrap();
        assert!(matches!(start, Start::Restored(_)));
        ledger.settle(second.id, Settlement::Finished).unwrap();

        // The restore reporting it again is ignored.
        let (third, start) = launched.recv().await.unwrap();
        assert_eq!(start, Start::Purchase);
        ledger.enqueue(restored()).unwrap();
        ledger.settle(third.id, Settlement::Finished).unwrap();

        assert!(ledger.pending().await.unwrap().is_empty());
        assert!(launched.try_recv().is_err());
    }
}
