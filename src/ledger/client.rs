//! # Ledger Client
//!
//! Cheap, cloneable handle to the ledger actor.

use tokio::sync::{mpsc, oneshot};

use crate::model::{StoreHandle, Transaction, TransactionId, Transition};
use crate::transport::RawTransaction;

use super::error::LedgerError;
use super::message::{LedgerRequest, ResumePlan, Settlement, TransactionSeed};

#[derive(Clone)]
pub struct LedgerClient {
    sender: mpsc::UnboundedSender<LedgerRequest>,
}

impl LedgerClient {
    pub fn new(sender: mpsc::UnboundedSender<LedgerRequest>) -> Self {
        Self { sender }
    }

    /// A handle that does not keep the ledger alive.
    pub(crate) fn downgrade(&self) -> mpsc::WeakUnboundedSender<LedgerRequest> {
        self.sender.downgrade()
    }

    pub(crate) fn upgrade(weak: &mpsc::WeakUnboundedSender<LedgerRequest>) -> Option<Self> {
        weak.upgrade().map(Self::new)
    }

    fn send(&self, request: LedgerRequest) -> Result<(), LedgerError> {
        self.sender.send(request).map_err(|_| LedgerError::Closed)
    }

    /// Queues a transaction behind any attempt already running for its
    /// product. Does not wait.
    pub fn enqueue(&self, seed: TransactionSeed) -> Result<(), LedgerError> {
        self.send(LedgerRequest::Enqueue { seed })
    }

    pub async fn resume(&self, records: Vec<RawTransaction>) -> Result<ResumePlan, LedgerError> {
        let (respond_to, response) = oneshot::channel();
        self.send(LedgerRequest::Resume {
            records,
            respond_to,
        })?;
        response.await.map_err(|_| LedgerError::Dropped)?
    }

    pub async fn advance(
        &self,
        id: TransactionId,
        transition: Transition,
    ) -> Result<Transaction, LedgerError> {
        let (respond_to, response) = oneshot::channel();
        self.send(LedgerRequest::Advance {
            id,
            transition,
            respond_to,
        })?;
        response.await.map_err(|_| LedgerError::Dropped)?
    }

    pub fn settle(&self, id: TransactionId, settlement: Settlement) -> Result<(), LedgerError> {
        self.send(LedgerRequest::Settle { id, settlement })
    }

    pub fn confirm_finished(&self, handle: StoreHandle) -> Result<(), LedgerError> {
        self.send(LedgerRequest::Finished { handle })
    }

    /// Transactions currently in flight, ordered by id.
    pub async fn pending(&self) -> Result<Vec<Transaction>, LedgerError> {
        let (respond_to, response) = oneshot::channel();
        self.send(LedgerRequest::Pending { respond_to })?;
        response.await.map_err(|_| LedgerError::Dropped)?
    }
}
