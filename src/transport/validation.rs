//! # Validation Transport
//!
//! Posts a receipt to one validation server and reports its verdict.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Receipt;

/// Transport-level failures. None of these is a verdict: the pool moves on
/// to the next server when it sees one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The server answered with something that is not a verdict.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// A server's answer for one receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationResponse {
    pub accepted: bool,
}

#[async_trait]
pub trait ValidationTransport: Send + Sync {
    async fn post(&self, endpoint: &str, receipt: &Receipt)
        -> Result<ValidationResponse, TransportError>;
}
