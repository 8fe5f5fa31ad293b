//! # Ledger Errors
//!
//! Failures talking to the ledger actor, plus transitions it refused.

use thiserror::Error;

use crate::model::{TransactionId, TransitionError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger closed")]
    Closed,
    #[error("Ledger dropped response channel")]
    Dropped,
    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),
    #[error("Transaction {0} has no receipt to verify")]
    MissingReceipt(TransactionId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}
