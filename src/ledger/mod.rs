//! Transaction ledger: the actor that owns every live transaction, its
//! client, and the messages between them.
//!
//! Components never mutate a [`Transaction`](crate::model::Transaction)
//! directly; they ask the ledger to apply a
//! [`Transition`](crate::model::Transition) and get the updated record back.

pub mod actor;
pub mod client;
pub mod error;
pub mod message;

pub use actor::{LedgerActor, LedgerContext, TransactionRunner};
pub use client::LedgerClient;
pub use error::LedgerError;
pub use message::{LedgerRequest, ResumePlan, Settlement, Start, TransactionSeed};
