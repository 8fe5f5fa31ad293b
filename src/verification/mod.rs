//! Receipt verification against the registered validation servers.

pub mod pool;

pub use pool::ValidationServerPool;
