//! # Ledger Messages
//!
//! Requests the [`LedgerClient`](super::LedgerClient) sends to the
//! [`LedgerActor`](super::LedgerActor), and the payloads they carry.

use tokio::sync::oneshot;

use crate::model::{StoreHandle, Transaction, TransactionId, TransactionType, Transition};
use crate::transport::RawTransaction;

use super::error::LedgerError;

/// One-shot response channel used by the ledger.
pub type Response<T> = oneshot::Sender<Result<T, LedgerError>>;

/// Where a new transaction enters the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Start {
    /// A purchase the store has not seen yet.
    Purchase,
    /// A record returned by a restore requested in this session.
    Restored(RawTransaction),
    /// A record left outstanding by an earlier session. Its purchase phase
    /// already ran there.
    Resumed(RawTransaction),
}

/// Everything needed to create a transaction once its product is free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSeed {
    pub product_identifier: String,
    pub transaction_type: TransactionType,
    pub solicited: bool,
    pub start: Start,
}

impl TransactionSeed {
    pub fn purchase(product_identifier: impl Into<String>) -> Self {
        Self {
            product_identifier: product_identifier.into(),
            transaction_type: TransactionType::Purchase,
            solicited: true,
            start: Start::Purchase,
        }
    }

    pub fn restored(record: RawTransaction) -> Self {
        Self {
            product_identifier: record.product_identifier.clone(),
            transaction_type: TransactionType::Restore,
            solicited: true,
            start: Start::Restored(record),
        }
    }

    pub fn resumed(record: RawTransaction) -> Self {
        Self {
            product_identifier: record.product_identifier.clone(),
            transaction_type: record.transaction_type,
            solicited: false,
            start: Start::Resumed(record),
        }
    }

    /// Store record the seed is built from, if the store already has one.
    pub fn store_handle(&self) -> Option<&StoreHandle> {
        match &self.start {
            Start::Purchase => None,
            Start::Restored(record) | Start::Resumed(record) => Some(&record.handle),
        }
    }
}

/// How a terminal transaction left the store record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Finished with the store, or there was no record to finish.
    Finished,
    /// `finish_transaction` failed; the next resumption retries it.
    FinishFailed,
    /// Deliberately left outstanding for a later session.
    Retained,
}

/// What the ledger made of a batch of outstanding records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    /// Records queued as resumed transactions.
    pub enqueued: usize,
    /// Records already driven to a terminal state in this process whose
    /// finish has to be retried. They are not driven again.
    pub to_finish: Vec<RawTransaction>,
    /// Records skipped because they are queued, in flight, or settled.
    pub skipped: usize,
}

#[derive(Debug)]
pub enum LedgerRequest {
    Enqueue {
        seed: TransactionSeed,
    },
    Resume {
        records: Vec<RawTransaction>,
        respond_to: Response<ResumePlan>,
    },
    Advance {
        id: TransactionId,
        transition: Transition,
        respond_to: Response<Transaction>,
    },
    Settle {
        id: TransactionId,
        settlement: Settlement,
    },
    /// A retried finish went through.
    Finished {
        handle: StoreHandle,
    },
    Pending {
        respond_to: Response<Vec<Transaction>>,
    },
}
