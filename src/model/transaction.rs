//! # Transaction Record & State Machine
//!
//! A [`Transaction`] tracks one physical purchase attempt from creation to a
//! terminal state. Its progress is an explicit [`Phase`] rather than a bag of
//! optional fields, so a cancelled purchase can never be verified and a
//! verified purchase can never be re-purchased.
//!
//! ```text
//! Created ──BeginPurchase──▶ Purchasing ──EndPurchase(Purchased)──▶ Purchased
//!                                 │                                    │
//!                                 └─EndPurchase(Cancelled|Failed)─▶ Aborted
//!                                                                      │
//!                Purchased ──BeginVerification──▶ Verifying ──EndVerification──▶ Unlocked | Rejected
//! ```
//!
//! Restores share the same phases; only the event kinds published for the
//! purchase phase differ (see [`TransactionType::is_restore`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

use super::receipt::{Receipt, StoreHandle};

/// Engine-local identifier of a transaction.
///
/// Product identifiers repeat across attempts, so the ledger hands out one of
/// these per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Purchase,
    /// The store reported the product as already owned and re-issued it.
    RePurchase,
    Restore,
}

impl TransactionType {
    pub fn is_restore(self) -> bool {
        matches!(self, TransactionType::Restore)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetadataFetchState {
    #[default]
    Unknown,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PurchaseState {
    #[default]
    Unknown,
    Success,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VerificationState {
    #[default]
    Unknown,
    Success,
    Failed,
}

/// Overall outcome reported with the acquire/fail-to-acquire events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionState {
    #[default]
    Unknown,
    Success,
    Cancelled,
    Failed,
}

/// What the store said about a purchase or restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOutcome {
    Purchased { receipt: Receipt },
    Cancelled,
    Failed { reason: String },
}

impl PurchaseOutcome {
    pub fn purchase_state(&self) -> PurchaseState {
        match self {
            PurchaseOutcome::Purchased { .. } => PurchaseState::Success,
            PurchaseOutcome::Cancelled => PurchaseState::Cancelled,
            PurchaseOutcome::Failed { .. } => PurchaseState::Failed,
        }
    }
}

/// Why a purchase phase ended without a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    Cancelled,
    Failed,
}

/// Position of a transaction in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Created,
    Purchasing,
    Purchased { receipt: Receipt },
    Verifying { receipt: Receipt },
    Unlocked,
    Rejected,
    Aborted(AbortReason),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Created => "Created",
            Phase::Purchasing => "Purchasing",
            Phase::Purchased { .. } => "Purchased",
            Phase::Verifying { .. } => "Verifying",
            Phase::Unlocked => "Unlocked",
            Phase::Rejected => "Rejected",
            Phase::Aborted(_) => "Aborted",
        }
    }
}

/// A requested move through the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    BeginPurchase,
    EndPurchase {
        outcome: PurchaseOutcome,
        /// Store record backing the attempt, once the store has produced one.
        store_handle: Option<StoreHandle>,
        /// Type the store reported for the record, e.g. `RePurchase` for a
        /// product that was already owned.
        transaction_type: Option<TransactionType>,
    },
    BeginVerification,
    EndVerification(VerificationState),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::BeginPurchase => "BeginPurchase",
            Transition::EndPurchase { .. } => "EndPurchase",
            Transition::BeginVerification => "BeginVerification",
            Transition::EndVerification(_) => "EndVerification",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition {transition} from phase {from}")]
    Illegal {
        from: &'static str,
        transition: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub product_identifier: String,
    pub transaction_type: TransactionType,
    pub solicited: bool,
    pub store_handle: Option<StoreHandle>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    phase: Phase,
}

impl Transaction {
    /// A fresh transaction that still has to go through the purchase phase.
    pub fn new(
        id: TransactionId,
        product_identifier: impl Into<String>,
        transaction_type: TransactionType,
        solicited: bool,
    ) -> Self {
        Self {
            id,
            product_identifier: product_identifier.into(),
            transaction_type,
            solicited,
            store_handle: None,
            created_at: Utc::now(),
            completed_at: None,
            phase: Phase::Created,
        }
    }

    /// Rebuilds a transaction from a store record left over by an earlier
    /// session. The purchase phase already completed there, so the
    /// transaction starts right after it and is never solicited.
    pub fn resumed(
        id: TransactionId,
        product_identifier: impl Into<String>,
        transaction_type: TransactionType,
        store_handle: StoreHandle,
        outcome: PurchaseOutcome,
    ) -> Self {
        let mut txn = Self::new(id, product_identifier, transaction_type, false);
        txn.store_handle = Some(store_handle);
        txn.phase = match outcome {
            PurchaseOutcome::Purchased { receipt } => Phase::Purchased { receipt },
            PurchaseOutcome::Cancelled => Phase::Aborted(AbortReason::Cancelled),
            PurchaseOutcome::Failed { .. } => Phase::Aborted(AbortReason::Failed),
        };
        if txn.is_terminal() {
            txn.completed_at = Some(Utc::now());
        }
        txn
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Applies `transition`, leaving the transaction untouched on error.
    pub fn apply(&mut self, transition: Transition) -> Result<(), TransitionError> {
        let next = match (&self.phase, transition) {
            (Phase::Created, Transition::BeginPurchase) => Phase::Purchasing,
            (
                Phase::Purchasing,
                Transition::EndPurchase {
                    outcome,
                    store_handle,
                    transaction_type,
                },
            ) => {
                if store_handle.is_some() {
                    self.store_handle = store_handle;
                }
                if let Some(transaction_type) = transaction_type {
                    self.transaction_type = transaction_type;
                }
                match outcome {
                    PurchaseOutcome::Purchased { receipt } => Phase::Purchased { receipt },
                    PurchaseOutcome::Cancelled => Phase::Aborted(AbortReason::Cancelled),
                    PurchaseOutcome::Failed { .. } => Phase::Aborted(AbortReason::Failed),
                }
            }
            (Phase::Purchased { receipt }, Transition::BeginVerification) => Phase::Verifying {
                receipt: receipt.clone(),
            },
            (Phase::Verifying { .. }, Transition::EndVerification(VerificationState::Success)) => {
                Phase::Unlocked
            }
            // Anything short of an explicit success is a rejection.
            (Phase::Verifying { .. }, Transition::EndVerification(_)) => Phase::Rejected,
            (phase, transition) => {
                return Err(TransitionError::Illegal {
                    from: phase.name(),
                    transition: transition.name(),
                })
            }
        };
        self.phase = next;
        if self.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            Phase::Unlocked | Phase::Rejected | Phase::Aborted(_)
        )
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match &self.phase {
            Phase::Purchased { receipt } | Phase::Verifying { receipt } => Some(receipt),
            _ => None,
        }
    }

    pub fn purchase_state(&self) -> PurchaseState {
        match self.phase {
            Phase::Created | Phase::Purchasing => PurchaseState::Unknown,
            Phase::Purchased { .. } | Phase::Verifying { .. } | Phase::Unlocked | Phase::Rejected => {
                PurchaseState::Success
            }
            Phase::Aborted(AbortReason::Cancelled) => PurchaseState::Cancelled,
            Phase::Aborted(AbortReason::Failed) => PurchaseState::Failed,
        }
    }

    pub fn verification_state(&self) -> VerificationState {
        match self.phase {
            Phase::Unlocked => VerificationState::Success,
            Phase::Rejected => VerificationState::Failed,
            _ => VerificationState::Unknown,
        }
    }

    pub fn transaction_state(&self) -> TransactionState {
        match self.phase {
            Phase::Unlocked => TransactionState::Success,
            Phase::Rejected | Phase::Aborted(AbortReason::Failed) => TransactionState::Failed,
            Phase::Aborted(AbortReason::Cancelled) => TransactionState::Cancelled,
            _ => TransactionState::Unknown,
        }
    }
}
