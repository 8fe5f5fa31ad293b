//! # Transaction Driver
//!
//! Walks one transaction from where the ledger created it to a terminal
//! state, calling the store and the validation pool and publishing an event
//! at every step.
//!
//! ## Sequence
//!
//! ```text
//! Purchase:  PurchasePhaseBegin → initiate_purchase → PurchasePhaseEnd ┐
//! Restore:   RestorePhaseBegin  → (record)          → RestorePhaseEnd  ┤
//! Resumed:   ───────────────────────────────────────────────────────── ┤
//!                                                                      ▼
//!            purchase succeeded?  no ─▶ PurchaseFailedToAcquire
//!                                 yes ─▶ VerificationPhaseBegin → pool → VerificationPhaseEnd
//!                                        ─▶ PurchaseSuccessfullyAcquired | PurchaseFailedToAcquire
//!            finish_transaction → settle with the ledger
//! ```
//!
//! Every event is published on the driver's own task before the next step
//! starts, so a slow handler holds back its transaction and nothing else.
//! The terminal event goes out before the store record is finished: a crash
//! in between re-delivers the record on the next launch rather than losing
//! the unlock.

use std::sync::Arc;
use tracing::{info, warn};

use crate::events::{PhaseKind, PurchaseEvent};
use crate::ledger::{LedgerClient, LedgerError, Settlement, Start};
use crate::model::{Phase, PurchaseOutcome, Transaction, TransactionState, Transition};
use crate::transport::RawTransaction;

use super::engine::Engine;

pub(crate) struct TransactionDriver {
    engine: Arc<Engine>,
    ledger: LedgerClient,
}

impl TransactionDriver {
    pub(crate) fn new(engine: Arc<Engine>, ledger: LedgerClient) -> Self {
        Self { engine, ledger }
    }

    /// Drives `transaction` to completion and settles it with the ledger,
    /// also when driving failed, so later requests for the product are not
    /// stuck behind it.
    pub(crate) async fn drive(&self, transaction: Transaction, start: Start) -> Result<(), LedgerError> {
        let id = transaction.id;
        match self.run(transaction, start).await {
            Ok(settlement) => self.ledger.settle(id, settlement),
            Err(e) => {
                if let Err(settle_error) = self.ledger.settle(id, Settlement::FinishFailed) {
                    warn!(transaction = %id, error = %settle_error, "Settle after failure not delivered");
                }
                Err(e)
            }
        }
    }

    async fn run(&self, transaction: Transaction, start: Start) -> Result<Settlement, LedgerError> {
        let (txn, record) = match start {
            Start::Purchase => self.purchase_phase(transaction, None).await?,
            Start::Restored(record) => self.purchase_phase(transaction, Some(record)).await?,
            Start::Resumed(record) => {
                info!(phase = transaction.phase().name(), "Resuming outstanding record");
                (transaction, Some(record))
            }
        };

        if txn.is_terminal() {
            self.publish_outcome(&txn);
            return Ok(self.finish(record.as_ref(), false).await);
        }

        let txn = self.verification_phase(txn).await?;
        self.publish_outcome(&txn);
        let retain = *txn.phase() == Phase::Rejected && !self.engine.config.finish_rejected_transactions;
        Ok(self.finish(record.as_ref(), retain).await)
    }

    /// Purchase or restore phase. A restore already carries its store record;
    /// a purchase asks the store for one.
    async fn purchase_phase(
        &self,
        transaction: Transaction,
        restored: Option<RawTransaction>,
    ) -> Result<(Transaction, Option<RawTransaction>), LedgerError> {
        let kind = PhaseKind::for_purchase(transaction.transaction_type);
        let txn = self
            .ledger
            .advance(transaction.id, Transition::BeginPurchase)
            .await?;
        self.publish(PurchaseEvent::phase_begin(kind, &txn.product_identifier, txn.solicited));

        let reclassify = restored.is_none();
        let result = match restored {
            Some(record) => Ok(record),
            None => self.engine.store.initiate_purchase(&txn.product_identifier).await,
        };
        let (outcome, record) = match result {
            Ok(record) => (record.outcome.clone(), Some(record)),
            Err(e) => {
                warn!(error = %e, "Store purchase failed");
                (
                    PurchaseOutcome::Failed {
                        reason: e.to_string(),
                    },
                    None,
                )
            }
        };

        let transition = Transition::EndPurchase {
            outcome,
            store_handle: record.as_ref().map(|r| r.handle.clone()),
            transaction_type: record
                .as_ref()
                .filter(|_| reclassify)
                .map(|r| r.transaction_type),
        };
        let txn = self.ledger.advance(txn.id, transition).await?;
        info!(state = ?txn.purchase_state(), "Purchase phase ended");

        let product_identifier = txn.product_identifier.clone();
        let state = txn.purchase_state();
        let solicited = txn.solicited;
        self.publish(match kind {
            PhaseKind::Restore => PurchaseEvent::RestorePhaseEnd {
                product_identifier,
                state,
                solicited,
            },
            _ => PurchaseEvent::PurchasePhaseEnd {
                product_identifier,
                state,
                solicited,
            },
        });
        Ok((txn, record))
    }

    async fn verification_phase(&self, transaction: Transaction) -> Result<Transaction, LedgerError> {
        let txn = self
            .ledger
            .advance(transaction.id, Transition::BeginVerification)
            .await?;
        self.publish(PurchaseEvent::phase_begin(
            PhaseKind::Verification,
            &txn.product_identifier,
            txn.solicited,
        ));

        let receipt = txn
            .receipt()
            .cloned()
            .ok_or(LedgerError::MissingReceipt(txn.id))?;
        let verdict = self
            .engine
            .pool
            .verify(&txn.product_identifier, &receipt, &self.engine.dispatcher)
            .await;

        let txn = self
            .ledger
            .advance(txn.id, Transition::EndVerification(verdict))
            .await?;
        self.publish(PurchaseEvent::VerificationPhaseEnd {
            product_identifier: txn.product_identifier.clone(),
            state: txn.verification_state(),
            solicited: txn.solicited,
        });
        Ok(txn)
    }

    /// Publishes the single terminal event of a transaction.
    fn publish_outcome(&self, txn: &Transaction) {
        let product_identifier = txn.product_identifier.clone();
        let transaction_type = txn.transaction_type;
        let solicited = txn.solicited;
        let event = if *txn.phase() == Phase::Unlocked {
            info!(?transaction_type, solicited, "Product unlocked");
            PurchaseEvent::PurchaseSuccessfullyAcquired {
                product_identifier,
                transaction_type,
                transaction_state: TransactionState::Success,
                solicited,
            }
        } else {
            let transaction_state = txn.transaction_state();
            warn!(?transaction_type, ?transaction_state, solicited, "Product not acquired");
            PurchaseEvent::PurchaseFailedToAcquire {
                product_identifier,
                transaction_type,
                transaction_state,
                solicited,
            }
        };
        self.publish(event);
    }

    async fn finish(&self, record: Option<&RawTransaction>, retain: bool) -> Settlement {
        let Some(record) = record else {
            return Settlement::Finished;
        };
        if retain {
            info!(handle = %record.handle, "Rejected record left outstanding");
            return Settlement::Retained;
        }
        match self.engine.store.finish_transaction(record).await {
            Ok(()) => Settlement::Finished,
            Err(e) => {
                warn!(handle = %record.handle, error = %e, "Finish failed; will retry on resume");
                Settlement::FinishFailed
            }
        }
    }

    fn publish(&self, event: PurchaseEvent) {
        self.engine.dispatcher.publish(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::lifecycle::EngineConfig;
    use crate::mock::{MockStore, MockValidator};
    use crate::model::{TransactionId, TransactionType};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_closed_ledger_stops_driver_before_store() {
        let store = MockStore::new();
        let engine = Arc::new(Engine::new(
            EngineConfig::default(),
            Arc::new(store.clone()),
            Arc::new(MockValidator::new()),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine
            .dispatcher
            .registry()
            .subscribe(EventKind::PurchasePhaseBegin, move |event| {
                sink.lock().unwrap().push(event.clone());
            });

        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let driver = TransactionDriver::new(engine, LedgerClient::new(sender));
        let txn = Transaction::new(TransactionId(1), "sku.pro", TransactionType::Purchase, true);

        let result = driver.drive(txn, Start::Purchase).await;

        assert_eq!(result, Err(LedgerError::Closed));
        assert!(store.calls().is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }
}
