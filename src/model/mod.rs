//! Plain data carried through the engine: products, receipts, validation
//! servers and the [`Transaction`] state machine.

pub mod product;
pub mod receipt;
pub mod server;
pub mod transaction;

pub use product::*;
pub use receipt::*;
pub use server::*;
pub use transaction::*;
