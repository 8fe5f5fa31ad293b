//! Event publication: the typed subscriber registry, the optional analytics
//! observer, and the [`Dispatcher`] that fans every event out to both.

pub mod analytics;
pub mod dispatch;
pub mod event;
pub mod registry;

pub use analytics::{AnalyticsEvent, AnalyticsEventKind, AnalyticsModule};
pub use dispatch::Dispatcher;
pub use event::{EventKind, PurchaseEvent};
pub(crate) use event::PhaseKind;
pub use registry::{EventRegistry, Handler};
