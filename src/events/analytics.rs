//! # Analytics Adapter
//!
//! An optional observer that sees everything the engine does: the subscriber
//! events, plus a few notifications only analytics cares about (resumption,
//! server registration, one bracket per validation server attempt).
//!
//! Every method has a no-op default, so an adapter implements only what it
//! forwards. [`AnalyticsModule::implements`] lets an adapter opt out of kinds
//! entirely; the dispatcher never calls a method for a kind the adapter
//! declines.
//!
//! ```rust
//! use iap_engine::events::{AnalyticsEventKind, AnalyticsModule};
//! use iap_engine::model::{TransactionState, TransactionType};
//!
//! struct UnlockCounter;
//!
//! impl AnalyticsModule for UnlockCounter {
//!     fn implements(&self, kind: AnalyticsEventKind) -> bool {
//!         kind == AnalyticsEventKind::DidSuccessfullyAcquireProduct
//!     }
//!
//!     fn did_successfully_acquire_product(
//!         &self,
//!         product_identifier: &str,
//!         _transaction_type: TransactionType,
//!         _transaction_state: TransactionState,
//!         _solicited: bool,
//!     ) {
//!         println!("unlocked {product_identifier}");
//!     }
//! }
//! ```

use crate::model::{
    MetadataFetchState, PurchaseState, TransactionState, TransactionType, ValidationServer,
    VerificationState,
};

use super::event::PurchaseEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticsEventKind {
    DidResumeTransactions,
    DidRegisterValidationServers,
    UserDidRequestMetadata,
    UserDidRequestPurchase,
    UserDidRequestRestore,
    DidBeginMetadataFetch,
    DidEndMetadataFetch,
    DidBeginPurchase,
    DidEndPurchase,
    DidBeginRestore,
    DidEndRestore,
    DidBeginVerificationPhase,
    DidEndVerificationPhase,
    DidBeginVerification,
    DidEndVerification,
    DidSuccessfullyAcquireProduct,
    DidFailToAcquireProduct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsEvent {
    DidResumeTransactions,
    DidRegisterValidationServers {
        servers: Vec<ValidationServer>,
    },
    UserDidRequestMetadata {
        product_identifiers: Vec<String>,
    },
    UserDidRequestPurchase {
        product_identifier: String,
    },
    UserDidRequestRestore,
    DidBeginMetadataFetch {
        product_identifiers: Vec<String>,
    },
    DidEndMetadataFetch {
        product_identifiers: Vec<String>,
        state: MetadataFetchState,
    },
    DidBeginPurchase {
        product_identifier: String,
        solicited: bool,
    },
    DidEndPurchase {
        product_identifier: String,
        state: PurchaseState,
        solicited: bool,
    },
    DidBeginRestore {
        product_identifier: String,
        solicited: bool,
    },
    DidEndRestore {
        product_identifier: String,
        state: PurchaseState,
        solicited: bool,
    },
    DidBeginVerificationPhase {
        product_identifier: String,
        solicited: bool,
    },
    DidEndVerificationPhase {
        product_identifier: String,
        state: VerificationState,
        solicited: bool,
    },
    /// One attempt against a single validation server.
    DidBeginVerification {
        product_identifier: String,
        server: String,
    },
    /// `state` is `Unknown` when the server could not be reached.
    DidEndVerification {
        product_identifier: String,
        server: String,
        state: VerificationState,
    },
    DidSuccessfullyAcquireProduct {
        product_identifier: String,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    },
    DidFailToAcquireProduct {
        product_identifier: String,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    },
}

impl AnalyticsEvent {
    pub fn kind(&self) -> AnalyticsEventKind {
        use AnalyticsEventKind as K;
        match self {
            AnalyticsEvent::DidResumeTransactions => K::DidResumeTransactions,
            AnalyticsEvent::DidRegisterValidationServers { .. } => K::DidRegisterValidationServers,
            AnalyticsEvent::UserDidRequestMetadata { .. } => K::UserDidRequestMetadata,
            AnalyticsEvent::UserDidRequestPurchase { .. } => K::UserDidRequestPurchase,
            AnalyticsEvent::UserDidRequestRestore => K::UserDidRequestRestore,
            AnalyticsEvent::DidBeginMetadataFetch { .. } => K::DidBeginMetadataFetch,
            AnalyticsEvent::DidEndMetadataFetch { .. } => K::DidEndMetadataFetch,
            AnalyticsEvent::DidBeginPurchase { .. } => K::DidBeginPurchase,
            AnalyticsEvent::DidEndPurchase { .. } => K::DidEndPurchase,
            AnalyticsEvent::DidBeginRestore { .. } => K::DidBeginRestore,
            AnalyticsEvent::DidEndRestore { .. } => K::DidEndRestore,
            AnalyticsEvent::DidBeginVerificationPhase { .. } => K::DidBeginVerificationPhase,
            AnalyticsEvent::DidEndVerificationPhase { .. } => K::DidEndVerificationPhase,
            AnalyticsEvent::DidBeginVerification { .. } => K::DidBeginVerification,
            AnalyticsEvent::DidEndVerification { .. } => K::DidEndVerification,
            AnalyticsEvent::DidSuccessfullyAcquireProduct { .. } => {
                K::DidSuccessfullyAcquireProduct
            }
            AnalyticsEvent::DidFailToAcquireProduct { .. } => K::DidFailToAcquireProduct,
        }
    }
}

impl From<&PurchaseEvent> for AnalyticsEvent {
    fn from(event: &PurchaseEvent) -> Self {
        match event.clone() {
            PurchaseEvent::DidRequestPurchase { product_identifier } => {
                AnalyticsEvent::UserDidRequestPurchase { product_identifier }
            }
            PurchaseEvent::DidRequestRestore => AnalyticsEvent::UserDidRequestRestore,
            PurchaseEvent::MetadataFetchBegin {
                product_identifiers,
            } => AnalyticsEvent::DidBeginMetadataFetch {
                product_identifiers,
            },
            PurchaseEvent::MetadataFetchEnd {
                product_identifiers,
                state,
            } => AnalyticsEvent::DidEndMetadataFetch {
                product_identifiers,
                state,
            },
            PurchaseEvent::PurchasePhaseBegin {
                product_identifier,
                solicited,
            } => AnalyticsEvent::DidBeginPurchase {
                product_identifier,
                solicited,
            },
            PurchaseEvent::PurchasePhaseEnd {
                product_identifier,
                state,
                solicited,
            } => AnalyticsEvent::DidEndPurchase {
                product_identifier,
                state,
                solicited,
            },
            PurchaseEvent::RestorePhaseBegin {
                product_identifier,
                solicited,
            } => AnalyticsEvent::DidBeginRestore {
                product_identifier,
                solicited,
            },
            PurchaseEvent::RestorePhaseEnd {
                product_identifier,
                state,
                solicited,
            } => AnalyticsEvent::DidEndRestore {
                product_identifier,
                state,
                solicited,
            },
            PurchaseEvent::VerificationPhaseBegin {
                product_identifier,
                solicited,
            } => AnalyticsEvent::DidBeginVerificationPhase {
                product_identifier,
                solicited,
            },
            PurchaseEvent::VerificationPhaseEnd {
                product_identifier,
                state,
                solicited,
            } => AnalyticsEvent::DidEndVerificationPhase {
                product_identifier,
                state,
                solicited,
            },
            PurchaseEvent::PurchaseSuccessfullyAcquired {
                product_identifier,
                transaction_type,
                transaction_state,
                solicited,
            } => AnalyticsEvent::DidSuccessfullyAcquireProduct {
                product_identifier,
                transaction_type,
                transaction_state,
                solicited,
            },
            PurchaseEvent::PurchaseFailedToAcquire {
                product_identifier,
                transaction_type,
                transaction_state,
                solicited,
            } => AnalyticsEvent::DidFailToAcquireProduct {
                product_identifier,
                transaction_type,
                transaction_state,
                solicited,
            },
        }
    }
}

/// Observer mirroring engine activity. All methods default to no-ops.
#[allow(unused_variables)]
pub trait AnalyticsModule: Send + Sync {
    /// Kinds for which this returns `false` are not forwarded.
    fn implements(&self, kind: AnalyticsEventKind) -> bool {
        true
    }

    fn did_resume_transactions(&self) {}

    fn did_register_validation_servers(&self, servers: &[ValidationServer]) {}

    fn user_did_request_metadata(&self, product_identifiers: &[String]) {}

    fn user_did_request_purchase(&self, product_identifier: &str) {}

    fn user_did_request_restore(&self) {}

    fn did_begin_metadata_fetch(&self, product_identifiers: &[String]) {}

    fn did_end_metadata_fetch(&self, product_identifiers: &[String], state: MetadataFetchState) {}

    fn did_begin_purchase(&self, product_identifier: &str, solicited: bool) {}

    fn did_end_purchase(&self, product_identifier: &str, state: PurchaseState, solicited: bool) {}

    fn did_begin_restore(&self, product_identifier: &str, solicited: bool) {}

    fn did_end_restore(&self, product_identifier: &str, state: PurchaseState, solicited: bool) {}

    fn did_begin_verification_phase(&self, product_identifier: &str, solicited: bool) {}

    fn did_end_verification_phase(
        &self,
        product_identifier: &str,
        state: VerificationState,
        solicited: bool,
    ) {
    }

    fn did_begin_verification(&self, product_identifier: &str, server: &str) {}

    fn did_end_verification(&self, product_identifier: &str, server: &str, state: VerificationState) {}

    fn did_successfully_acquire_product(
        &self,
        product_identifier: &str,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    ) {
    }

    fn did_fail_to_acquire_product(
        &self,
        product_identifier: &str,
        transaction_type: TransactionType,
        transaction_state: TransactionState,
        solicited: bool,
    ) {
    }
}

/// Routes `event` to the matching [`AnalyticsModule`] method.
pub(crate) fn deliver(module: &dyn AnalyticsModule, event: &AnalyticsEvent) {
    match event {
        AnalyticsEvent::DidResumeTransactions => module.did_resume_transactions(),
        AnalyticsEvent::DidRegisterValidationServers { servers } => {
            module.did_register_validation_servers(servers)
        }
        AnalyticsEvent::UserDidRequestMetadata {
            product_identifiers,
        } => module.user_did_request_metadata(product_identifiers),
        AnalyticsEvent::UserDidRequestPurchase { product_identifier } => {
            module.user_did_request_purchase(product_identifier)
        }
        AnalyticsEvent::UserDidRequestRestore => module.user_did_request_restore(),
        AnalyticsEvent::DidBeginMetadataFetch {
            product_identifiers,
        } => module.did_begin_metadata_fetch(product_identifiers),
        AnalyticsEvent::DidEndMetadataFetch {
            product_identifiers,
            state,
        } => module.did_end_metadata_fetch(product_identifiers, *state),
        AnalyticsEvent::DidBeginPurchase {
            product_identifier,
            solicited,
        } => module.did_begin_purchase(product_identifier, *solicited),
        AnalyticsEvent::DidEndPurchase {
            product_identifier,
            state,
            solicited,
        } => module.did_end_purchase(product_identifier, *state, *solicited),
        AnalyticsEvent::DidBeginRestore {
            product_identifier,
            solicited,
        } => module.did_begin_restore(product_identifier, *solicited),
        AnalyticsEvent::DidEndRestore {
            product_identifier,
            state,
            solicited,
        } => module.did_end_restore(product_identifier, *state, *solicited),
        AnalyticsEvent::DidBeginVerificationPhase {
            product_identifier,
            solicited,
        } => module.did_begin_verification_phase(product_identifier, *solicited),
        AnalyticsEvent::DidEndVerificationPhase {
            product_identifier,
            state,
            solicited,
        } => module.did_end_verification_phase(product_identifier, *state, *solicited),
        AnalyticsEvent::DidBeginVerification {
            product_identifier,
            server,
        } => module.did_begin_verification(product_identifier, server),
        AnalyticsEvent::DidEndVerification {
            product_identifier,
            server,
            state,
        } => module.did_end_verification(product_identifier, server, *state),
        AnalyticsEvent::DidSuccessfullyAcquireProduct {
            product_identifier,
            transaction_type,
            transaction_state,
            solicited,
        } => module.did_successfully_acquire_product(
            product_identifier,
            *transaction_type,
            *transaction_state,
            *solicited,
        ),
        AnalyticsEvent::DidFailToAcquireProduct {
            product_identifier,
            transaction_type,
            transaction_state,
            solicited,
        } => module.did_fail_to_acquire_product(
            product_identifier,
            *transaction_type,
            *transaction_state,
            *solicited,
        ),
    }
}
