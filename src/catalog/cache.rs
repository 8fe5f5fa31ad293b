//! # Metadata Cache
//!
//! Product descriptions fetched from the store, keyed by identifier.
//!
//! The cache only ever grows: a fetch inserts or overwrites the products it
//! resolved and leaves every other entry alone. Readers work on snapshots, so
//! an enumeration running while a fetch lands sees either the old or the new
//! entry for an identifier, never a torn one.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::events::{AnalyticsEvent, Dispatcher, PurchaseEvent};
use crate::model::{MetadataFetchState, Product};
use crate::transport::StoreTransport;

/// One-shot callback handed to a single metadata fetch. It receives the
/// `MetadataFetchEnd` event before any registered handler does.
pub type MetadataCallback = Box<dyn FnOnce(&PurchaseEvent) + Send>;

#[derive(Debug, Default)]
pub struct MetadataCache {
    products: RwLock<HashMap<String, Product>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `products` under a single write lock, replacing entries with
    /// the same identifier.
    pub fn populate(&self, products: impl IntoIterator<Item = Product>) -> usize {
        let mut cache = self.products.write().unwrap_or_else(PoisonError::into_inner);
        let mut inserted = 0;
        for product in products {
            cache.insert(product.identifier.clone(), product);
            inserted += 1;
        }
        inserted
    }

    pub fn get(&self, identifier: &str) -> Option<Product> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached products accepted by `predicate`, ordered by identifier.
    /// Never triggers a fetch.
    pub fn enumerate<P>(&self, predicate: P) -> Vec<Product>
    where
        P: Fn(&Product) -> bool,
    {
        let mut products: Vec<Product> = self
            .products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|product| predicate(product))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        products
    }

    /// Fetches `identifiers` from the store and caches what resolved.
    ///
    /// Publishes `MetadataFetchBegin`, then exactly one `MetadataFetchEnd`
    /// whose state is `Success` only when every requested identifier came
    /// back. `callback`, if any, sees the end event first.
    pub async fn fetch(
        &self,
        store: &dyn StoreTransport,
        dispatcher: &Dispatcher,
        identifiers: Vec<String>,
        callback: Option<MetadataCallback>,
    ) -> MetadataFetchState {
        let identifiers = dedup_in_order(identifiers);
        dispatcher.publish(&PurchaseEvent::MetadataFetchBegin {
            product_identifiers: identifiers.clone(),
        });

        let state = if identifiers.is_empty() {
            debug!("Empty metadata request; nothing to fetch");
            MetadataFetchState::Success
        } else {
            match store.request_metadata(&identifiers).await {
                Ok(mut raw) => {
                    let resolved: Vec<Product> = identifiers
                        .iter()
                        .filter_map(|id| raw.remove(id).map(|fields| Product::from_raw(id, fields)))
                        .collect();
                    let complete = resolved.len() == identifiers.len();
                    let cached = self.populate(resolved);
                    info!(
                        requested = identifiers.len(),
                        cached,
                        total = self.len(),
                        "Metadata fetched"
                    );
                    if complete {
                        MetadataFetchState::Success
                    } else {
                        MetadataFetchState::Failed
                    }
                }
                Err(e) => {
                    warn!(requested = identifiers.len(), error = %e, "Metadata fetch failed");
                    MetadataFetchState::Failed
                }
            }
        };

        let end = PurchaseEvent::MetadataFetchEnd {
            product_identifiers: identifiers,
            state,
        };
        if let Some(callback) = callback {
            crate::events::registry::isolate(end.kind(), 0, || callback(&end));
        }
        dispatcher.publish(&end);
        state
    }

    /// Analytics notification for an incoming metadata request.
    pub(crate) fn announce(dispatcher: &Dispatcher, identifiers: &[String]) {
        dispatcher.notify(&AnalyticsEvent::UserDidRequestMetadata {
            product_identifiers: identifiers.to_vec(),
        });
    }
}

fn dedup_in_order(identifiers: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    identifiers
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::mock::MockStore;
    use crate::model::RawProduct;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    fn product(id: &str, title: &str) -> Product {
        Product::from_raw(id, RawProduct::new(title, "", "$0.99", dec!(0.99)))
    }

    fn recorder(dispatcher: &Dispatcher) -> Arc<Mutex<Vec<PurchaseEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::MetadataFetchBegin, EventKind::MetadataFetchEnd] {
            let seen = seen.clone();
            dispatcher
                .registry()
                .subscribe(kind, move |event| seen.lock().unwrap().push(event.clone()));
        }
        seen
    }

    #[test]
    fn test_population_is_additive() {
        let cache = MetadataCache::new();
        cache.populate([product("a", "A"), product("b", "B")]);
        cache.populate([product("a", "A2")]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().title, "A2");
        assert_eq!(cache.get("b").unwrap().title, "B");
    }

    #[test]
    fn test_enumerate_filters_and_orders() {
        let cache = MetadataCache::new();
        cache.populate([product("c", "C"), product("a", "A"), product("b", "B")]);

        let ids: Vec<String> = cache
            .enumerate(|p| p.identifier != "b")
            .into_iter()
            .map(|p| p.identifier)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_fetch_success_caches_products() {
        let store = MockStore::new();
        store
            .expect_metadata()
            .return_ok([("sku.pro".to_string(), RawProduct::new("Pro", "All features", "$4.99", dec!(4.99)))]);
        let dispatcher = Dispatcher::new();
        let seen = recorder(&dispatcher);
        let cache = MetadataCache::new();

        let state = cache
            .fetch(&store, &dispatcher, vec!["sku.pro".into()], None)
            .await;

        assert_eq!(state, MetadataFetchState::Success);
        assert_eq!(cache.get("sku.pro").unwrap().raw_price, dec!(4.99));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1],
            PurchaseEvent::MetadataFetchEnd {
                product_identifiers: vec!["sku.pro".into()],
                state: MetadataFetchState::Success,
            }
        );
        store.verify();
    }

    #[tokio::test]
    async fn test_partial_fetch_is_failure_but_caches_resolved() {
        let store = MockStore::new();
        store
            .expect_metadata()
            .return_ok([("sku.pro".to_string(), RawProduct::new("Pro", "", "$4.99", dec!(4.99)))]);
        let dispatcher = Dispatcher::new();
        let cache = MetadataCache::new();
        cache.populate([product("sku.old", "Old")]);

        let state = cache
            .fetch(
                &store,
                &dispatcher,
                vec!["sku.pro".into(), "sku.missing".into()],
                None,
            )
            .await;

        assert_eq!(state, MetadataFetchState::Failed);
        assert!(cache.get("sku.pro").is_some());
        assert!(cache.get("sku.old").is_some());
        assert!(cache.get("sku.missing").is_none());
    }

    #[tokio::test]
    async fn test_store_error_reports_failed() {
        let store = MockStore::new();
        store
            .expect_metadata()
            .return_err(crate::transport::StoreError::Unavailable("offline".into()));
        let dispatcher = Dispatcher::new();
        let cache = MetadataCache::new();

        let state = cache
            .fetch(&store, &dispatcher, vec!["sku.pro".into()], None)
            .await;
        assert_eq!(state, MetadataFetchState::Failed);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_empty_request_skips_store() {
        let store = MockStore::new();
        let dispatcher = Dispatcher::new();
        let seen = recorder(&dispatcher);
        let cache = MetadataCache::new();

        let state = cache.fetch(&store, &dispatcher, Vec::new(), None).await;

        assert_eq!(state, MetadataFetchState::Success);
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_callback_runs_before_handlers() {
        let store = MockStore::new();
        store.expect_metadata().return_ok([]);
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let handler_order = order.clone();
        dispatcher
            .registry()
            .subscribe(EventKind::MetadataFetchEnd, move |_| {
                handler_order.lock().unwrap().push("handler")
            });
        let callback_order = order.clone();
        let callback: MetadataCallback = Box::new(move |event| {
            assert_eq!(event.kind(), EventKind::MetadataFetchEnd);
            callback_order.lock().unwrap().push("callback");
        });

        MetadataCache::new()
            .fetch(&store, &dispatcher, vec!["sku.pro".into()], Some(callback))
            .await;

        assert_eq!(*order.lock().unwrap(), vec!["callback", "handler"]);
    }
}
