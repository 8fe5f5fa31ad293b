//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `fmt` subscriber filtered by
//! `RUST_LOG`.
//!
//! ## What Gets Traced
//!
//! - **Ledger**: startup, every transaction started and settled, shutdown
//!   with the number of records still in flight or queued.
//! - **Transactions**: each driver runs inside a `transaction` span carrying
//!   the transaction id and product, so all of its lines group together.
//! - **Verification**: one line per server attempt and its verdict, plus a
//!   warning for every unreachable server.
//! - **Handlers**: a panicking handler is logged at `warn` with its event
//!   kind and position; the others still run.
//!
//! ## Usage
//!
//! ```bash
//! # Transaction milestones
//! RUST_LOG=info cargo run
//!
//! # Every transition and receipt post
//! RUST_LOG=debug cargo run
//!
//! # Subscriptions and per-event handler counts
//! RUST_LOG=iap_engine=trace cargo run
//! ```
//!
//! With `RUST_LOG=info` a purchase reads:
//!
//! ```text
//! INFO Ledger started
//! INFO purchase_product_with_identifier{product="sku.pro"}: Started transaction=txn_1 product="sku.pro" solicited=true in_flight=1
//! INFO transaction{id=txn_1 product=sku.pro}: Purchase phase ended state=Success
//! INFO transaction{id=txn_1 product=sku.pro}: Verdict product=sku.pro endpoint=https://verify.example.com accepted=true
//! INFO transaction{id=txn_1 product=sku.pro}: Product unlocked transaction_type=Purchase solicited=true
//! INFO Settled transaction=txn_1 product=sku.pro state=Success settlement=Finished in_flight=0
//! ```

pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
