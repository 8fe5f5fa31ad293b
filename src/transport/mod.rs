//! Capability contracts for the collaborators the engine drives but does not
//! own: the platform store and the receipt validation servers.

pub mod store;
pub mod validation;

pub use store::*;
pub use validation::*;
