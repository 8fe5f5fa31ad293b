//! Product metadata: the process-wide cache and the fetch flow that fills it.

pub mod cache;

pub use cache::{MetadataCache, MetadataCallback};
