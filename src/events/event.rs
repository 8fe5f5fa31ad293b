//! Lifecycle events published to subscribers.

use crate::model::{
    MetadataFetchState, PurchaseState, TransactionState, TransactionType, VerificationState,
};

/// One channel per variant of [`PurchaseEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    DidRequestPurchase,
    DidRequestRestore,
    MetadataFetchBegin,
    MetadataFetchEnd,
    PurchasePhaseBegin,
    PurchasePhaseEnd,
    RestorePhaseBegin,
    RestorePhaseEnd,
    VerificationPhaseBegin,
    VerificationPhaseEnd,
    PurchaseSuccessfullyAcquired,
    PurchaseFailedToAcquire,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::DidRequestPurchase,
        EventKind::DidRequestRestore,
        EventKind::MetadataFetchBegin,
        EventKind::MetadataFetchEnd,
        EventKind::PurchasePhaseBegin,
        EventKind::PurchasePhaseEnd,
        EventKind::RestorePhaseBegin,
        EventKind::RestorePhaseEnd,
        EventKind::VerificationPhaseBegin,
        EventKind::VerificationPhaseEnd,
        EventKind::PurchaseSuccessfullyAcquired,
        EventKind::PurchaseFailedToAcquire,
    ];

    /// Whether this kind ends a transaction.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::PurchaseSuccessfullyAcquired | EventKind::PurchaseFailedToAcquire
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseEvent {
    DidRequestPurchase {
        product_identifier: String,
    },
    DidRequestRestore,
    MetadataFetchBegin {
        product_identifiers: Vec<String>,
    },
    MetadataFetchEnd {
        product_identifiers: Vec<String>,
        state: MetadataFetchState,
    },
    PurchasePhaseBegin {
        product_identifier: String,
        solicited: bool,
    },
    PurchasePhaseEnd {
        product_identifier: String,
        state: PurchaseState,
        solicited: bool,
    },
    RestorePhaseBegin {
        product_identifier: String,
        solicited: bool,
    },
    RestorePhaseEnd {
        product_identifier: String,
        state: PurchaseState,
        solicited: bool,
    },
    VerificationPhaseBegin {
        product_identifier: String,
        solicited: bool,
    },
    VerificationPhaseEnd {
        product_identifier: String,
        state: VerificationState,
        solicited: bool,
    },
    /// The authoritative unlock signal.
    PurchaseSuccessfullyAcquired {
        product_identifier: String,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    },
    PurchaseFailedToAcquire {
        product_identifier: String,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    },
}

impl PurchaseEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PurchaseEvent::DidRequestPurchase { .. } => EventKind::DidRequestPurchase,
            PurchaseEvent::DidRequestRestore => EventKind::DidRequestRestore,
            PurchaseEvent::MetadataFetchBegin { .. } => EventKind::MetadataFetchBegin,
            PurchaseEvent::MetadataFetchEnd { .. } => EventKind::MetadataFetchEnd,
            PurchaseEvent::PurchasePhaseBegin { .. } => EventKind::PurchasePhaseBegin,
            PurchaseEvent::PurchasePhaseEnd { .. } => EventKind::PurchasePhaseEnd,
            PurchaseEvent::RestorePhaseBegin { .. } => EventKind::RestorePhaseBegin,
            PurchaseEvent::RestorePhaseEnd { .. } => EventKind::RestorePhaseEnd,
            PurchaseEvent::VerificationPhaseBegin { .. } => EventKind::VerificationPhaseBegin,
            PurchaseEvent::VerificationPhaseEnd { .. } => EventKind::VerificationPhaseEnd,
            PurchaseEvent::PurchaseSuccessfullyAcquired { .. } => {
                EventKind::PurchaseSuccessfullyAcquired
            }
            PurchaseEvent::PurchaseFailedToAcquire { .. } => EventKind::PurchaseFailedToAcquire,
        }
    }

    /// The product the event is about, if it concerns a single product.
    pub fn product_identifier(&self) -> Option<&str> {
        match self {
            PurchaseEvent::DidRequestPurchase { product_identifier }
            | PurchaseEvent::PurchasePhaseBegin {
                product_identifier, ..
            }
            | PurchaseEvent::PurchasePhaseEnd {
                product_identifier, ..
            }
            | PurchaseEvent::RestorePhaseBegin {
                product_identifier, ..
            }
            | PurchaseEvent::RestorePhaseEnd {
                product_identifier, ..
            }
            | PurchaseEvent::VerificationPhaseBegin {
                product_identifier, ..
            }
            | PurchaseEvent::VerificationPhaseEnd {
                product_identifier, ..
            }
            | PurchaseEvent::PurchaseSuccessfullyAcquired {
                product_identifier, ..
            }
            | PurchaseEvent::PurchaseFailedToAcquire {
                product_identifier, ..
            } => Some(product_identifier),
            PurchaseEvent::DidRequestRestore
            | PurchaseEvent::MetadataFetchBegin { .. }
            | PurchaseEvent::MetadataFetchEnd { .. } => None,
        }
    }

    /// Begin event of a purchase, restore or verification phase.
    pub(crate) fn phase_begin(kind: PhaseKind, product_identifier: &str, solicited: bool) -> Self {
        let product_identifier = product_identifier.to_string();
        match kind {
            PhaseKind::Purchase => PurchaseEvent::PurchasePhaseBegin {
                product_identifier,
                solicited,
            },
            PhaseKind::Restore => PurchaseEvent::RestorePhaseBegin {
                product_identifier,
                solicited,
            },
            PhaseKind::Verification => PurchaseEvent::VerificationPhaseBegin {
                product_identifier,
                solicited,
            },
        }
    }
}

/// Which pair of phase events a transaction step maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseKind {
    Purchase,
    Restore,
    Verification,
}

impl PhaseKind {
    pub(crate) fn for_purchase(transaction_type: TransactionType) -> Self {
        if transaction_type.is_restore() {
            PhaseKind::Restore
        } else {
            PhaseKind::Purchase
        }
    }
}
