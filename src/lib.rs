#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # IAP Engine
//!
//! > **Transaction lifecycle and receipt verification for in-app purchases.**
//!
//! This crate drives in-app purchases from request to unlock: it fetches
//! product metadata, runs purchases and restores through a platform store,
//! verifies every receipt against trusted validation servers, and tells any
//! number of listeners about each step along the way.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### One owner per transaction
//! Every live transaction belongs to a single actor, the **ledger**. Drivers
//! never touch a record directly: they ask the ledger to apply a transition
//! and get the updated record back. Illegal moves (verifying a cancelled
//! purchase, purchasing twice) are refused by the state machine in
//! [`model::Transaction`].
//!
//! ### Everything is an event
//! Request operations return immediately and cannot fail. What happens next
//! (metadata arriving, the store answering, the verdict) is published to the
//! handlers registered on the [`PurchaseManager`](lifecycle::PurchaseManager),
//! in order, on the transaction's own task. A handler that panics is logged
//! and skipped.
//!
//! ### Fail closed
//! A product is unlocked only when a validation server explicitly accepts
//! its receipt. No servers, or no server reachable, means no unlock.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Each component defines its own error type with `thiserror`
//! ([`StoreError`](transport::StoreError), [`LedgerError`](ledger::LedgerError),
//! [`ConfigError`](lifecycle::ConfigError), ...). None of them reach callers of
//! the request operations: they end up as state fields on the `*End` events.
//!
//! ### 2. Context Injection
//! The ledger receives its dependencies through `run(context)`, in the form
//! of a [`TransactionRunner`](ledger::TransactionRunner). The manager plugs in
//! a runner that spawns one driver task per transaction; tests plug in one
//! that only records.
//!
//! ### 3. Concurrency Model
//! Different products proceed concurrently. A second request for a product
//! already in flight waits in a FIFO queue behind the first. The metadata
//! cache and the validation pool are shared read-mostly; the pool is swapped
//! as a whole on registration.
//!
//! ### 4. Observability
//! `tracing` everywhere, with a span per transaction. See
//! [`lifecycle::tracing`].
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Data ([`model`])
//! Products, receipts, validation servers and the transaction state machine.
//!
//! ### 2. The Collaborators ([`transport`])
//! Traits for the platform store and the validation servers. The engine
//! owns neither.
//!
//! ### 3. The Events ([`events`])
//! The typed subscriber registry, the optional analytics observer, and the
//! dispatcher in front of both.
//!
//! ### 4. The Components ([`catalog`], [`verification`], [`ledger`])
//! Metadata cache, validation server pool, transaction ledger actor.
//!
//! ### 5. The Orchestrator ([`lifecycle`])
//! - **Key items**: [`PurchaseManager`](lifecycle::PurchaseManager),
//!   [`EngineConfig`](lifecycle::EngineConfig),
//!   [`shutdown`](lifecycle::PurchaseManager::shutdown).
//!
//! ### 6. Testing ([`mock`])
//! Scripted store and validator transports plus a recording analytics module.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the demo with info logs
//! RUST_LOG=info cargo run
//!
//! # Run the tests
//! cargo test
//! ```

pub mod catalog;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod mock;
pub mod model;
pub mod transport;
pub mod verification;
