//! Fan-out point shared by every component that reports progress.
//!
//! [`Dispatcher::publish`] runs the subscribers of an event first and then
//! mirrors it to the analytics module, if one is installed. Analytics-only
//! notifications go through [`Dispatcher::notify`].

use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

use super::analytics::{deliver, AnalyticsEvent, AnalyticsModule};
use super::event::PurchaseEvent;
use super::registry::{isolate, EventRegistry};

#[derive(Default)]
pub struct Dispatcher {
    registry: EventRegistry,
    analytics: RwLock<Option<Arc<dyn AnalyticsModule>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Installs or clears the analytics module. Replaces any previous one.
    pub fn set_analytics(&self, module: Option<Arc<dyn AnalyticsModule>>) {
        *self.analytics.write().unwrap_or_else(PoisonError::into_inner) = module;
    }

    pub fn has_analytics(&self) -> bool {
        self.analytics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn publish(&self, event: &PurchaseEvent) {
        let completed = self.registry.publish(event);
        trace!(kind = ?event.kind(), completed, "Published");
        // Skip building the mirrored event when nobody would receive it.
        if self.has_analytics() {
            self.notify(&AnalyticsEvent::from(event));
        }
    }

    /// Mirrors `event` to analytics only. Skipped when no module is installed
    /// or the module does not implement the event's kind.
    pub fn notify(&self, event: &AnalyticsEvent) {
        let Some(module) = self
            .analytics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return;
        };

        let kind = event.kind();
        if !module.implements(kind) {
            return;
        }
        isolate(kind, 0, || deliver(module.as_ref(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AnalyticsEventKind, EventKind};
    use std::sync::Mutex;

    #[derive(Default)]
    struct PurchaseOnly {
        seen: Mutex<Vec<String>>,
    }

    impl AnalyticsModule for PurchaseOnly {
        fn implements(&self, kind: AnalyticsEventKind) -> bool {
            kind == AnalyticsEventKind::UserDidRequestPurchase
        }

        fn user_did_request_purchase(&self, product_identifier: &str) {
            self.seen.lock().unwrap().push(product_identifier.to_string());
        }

        fn user_did_request_restore(&self) {
            panic!("not implemented, must never be called");
        }
    }

    #[test]
    fn test_handlers_run_before_analytics() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tail(Arc<Mutex<Vec<&'static str>>>);
        impl AnalyticsModule for Tail {
            fn user_did_request_purchase(&self, _: &str) {
                self.0.lock().unwrap().push("analytics");
            }
        }

        let handler_order = order.clone();
        dispatcher
            .registry()
            .subscribe(EventKind::DidRequestPurchase, move |_| {
                handler_order.lock().unwrap().push("handler");
            });
        dispatcher.set_analytics(Some(Arc::new(Tail(order.clone()))));

        dispatcher.publish(&PurchaseEvent::DidRequestPurchase {
            product_identifier: "sku.pro".into(),
        });

        assert_eq!(*order.lock().unwrap(), vec!["handler", "analytics"]);
    }

    #[test]
    fn test_unimplemented_kinds_are_skipped() {
        let dispatcher = Dispatcher::new();
        let module = Arc::new(PurchaseOnly::default());
        dispatcher.set_analytics(Some(module.clone()));

        dispatcher.publish(&PurchaseEvent::DidRequestRestore);
        dispatcher.publish(&PurchaseEvent::DidRequestPurchase {
            product_identifier: "sku.pro".into(),
        });

        assert_eq!(*module.seen.lock().unwrap(), vec!["sku.pro".to_string()]);
    }

    #[test]
    fn test_publish_without_analytics() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.has_analytics());
        dispatcher.publish(&PurchaseEvent::DidRequestRestore);
        dispatcher.notify(&AnalyticsEvent::DidResumeTransactions);
    }
}
