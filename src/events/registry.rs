//! # Event Dispatch Registry
//!
//! Subscribers register plain closures per [`EventKind`]. Publishing calls
//! every closure of that kind in subscription order, on the publishing task,
//! and returns only once all of them have returned. A closure that panics is
//! logged and skipped; the remaining closures still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{trace, warn};

use super::event::{EventKind, PurchaseEvent};

pub type Handler = Arc<dyn Fn(&PurchaseEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the channel for `kind`. Registering the same
    /// closure twice makes it run twice.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&PurchaseEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let channel = handlers.entry(kind).or_default();
        channel.push(Arc::new(handler));
        trace!(?kind, subscribers = channel.len(), "Subscribed");
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Runs every handler subscribed to the event's kind.
    ///
    /// Returns how many handlers completed without panicking.
    pub fn publish(&self, event: &PurchaseEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers may subscribe from inside a callback.
        let channel: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut completed = 0;
        for (index, handler) in channel.iter().enumerate() {
            if isolate(kind, index, || handler(event)) {
                completed += 1;
            }
        }
        completed
    }
}

/// Runs `f`, turning a panic into a logged warning.
pub(crate) fn isolate<K: std::fmt::Debug>(kind: K, index: usize, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(_) => {
            warn!(?kind, handler = index, "Handler panicked; continuing");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn begin(product: &str) -> PurchaseEvent {
        PurchaseEvent::PurchasePhaseBegin {
            product_identifier: product.to_string(),
            solicited: true,
        }
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            registry.subscribe(EventKind::PurchasePhaseBegin, move |_| {
                seen.lock().unwrap().push(label);
            });
        }

        assert_eq!(registry.publish(&begin("sku.pro")), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_only_matching_kind_is_invoked() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        registry.subscribe(EventKind::PurchasePhaseEnd, move |_| {
            *counter.lock().unwrap() += 1;
        });

        assert_eq!(registry.publish(&begin("sku.pro")), 0);
        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(registry.subscriber_count(EventKind::PurchasePhaseEnd), 1);
        assert_eq!(registry.subscriber_count(EventKind::PurchasePhaseBegin), 0);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(EventKind::PurchasePhaseBegin, |_| panic!("faulty listener"));
        let after = seen.clone();
        registry.subscribe(EventKind::PurchasePhaseBegin, move |event| {
            after
                .lock()
                .unwrap()
                .push(event.product_identifier().unwrap_or_default().to_string());
        });

        assert_eq!(registry.publish(&begin("sku.pro")), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["sku.pro".to_string()]);
    }

    #[test]
    fn test_no_deduplication() {
        let registry = EventRegistry::new();
        let count = Arc::new(Mutex::new(0));
        let handler = {
            let count = count.clone();
            move |_: &PurchaseEvent| *count.lock().unwrap() += 1
        };
        registry.subscribe(EventKind::DidRequestRestore, handler.clone());
        registry.subscribe(EventKind::DidRequestRestore, handler);

        registry.publish(&PurchaseEvent::DidRequestRestore);
        assert_eq!(*count.lock().unwrap(), 2);
    }
}
