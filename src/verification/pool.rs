//! # Validation Server Pool
//!
//! Ordered receipt validation endpoints and the walk that asks them for a
//! verdict.
//!
//! ## Policy
//!
//! Servers are tried in ascending priority. A server that cannot be reached
//! (transport error or deadline) hands over to the next one; it is never
//! retried. The first explicit answer ends the walk: acceptance is `Success`,
//! rejection is `Failed` and no later server is contacted. An empty pool, or
//! one where nobody answered, yields `Failed`.
//!
//! Registration replaces the whole list at once. A walk already in progress
//! keeps the list it started with.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::events::{AnalyticsEvent, Dispatcher};
use crate::model::{Receipt, ValidationServer, VerificationState};
use crate::transport::{TransportError, ValidationTransport};

pub struct ValidationServerPool {
    transport: Arc<dyn ValidationTransport>,
    attempt_timeout: Duration,
    servers: RwLock<Arc<[ValidationServer]>>,
}

impl ValidationServerPool {
    pub fn new(transport: Arc<dyn ValidationTransport>, attempt_timeout: Duration) -> Self {
        Self {
            transport,
            attempt_timeout,
            servers: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Replaces the pool with `servers`, ordered by priority. Returns the list
    /// now in effect.
    pub fn register_servers(&self, mut servers: Vec<ValidationServer>) -> Arc<[ValidationServer]> {
        servers.sort_by_key(|server| server.priority);
        let servers: Arc<[ValidationServer]> = Arc::from(servers);
        *self.servers.write().unwrap_or_else(PoisonError::into_inner) = servers.clone();
        info!(count = servers.len(), "Validation servers registered");
        servers
    }

    /// Current servers in attempt order.
    pub fn servers(&self) -> Arc<[ValidationServer]> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn verify(
        &self,
        product_identifier: &str,
        receipt: &Receipt,
        dispatcher: &Dispatcher,
    ) -> VerificationState {
        let servers = self.servers();
        if servers.is_empty() {
            warn!(product = %product_identifier, "No validation servers registered");
            return VerificationState::Failed;
        }

        for server in servers.iter() {
            dispatcher.notify(&AnalyticsEvent::DidBeginVerification {
                product_identifier: product_identifier.to_string(),
                server: server.endpoint.clone(),
            });

            let verdict = self.attempt(server, receipt).await;
            let state = match &verdict {
                Ok(true) => VerificationState::Success,
                Ok(false) => VerificationState::Failed,
                Err(_) => VerificationState::Unknown,
            };

            dispatcher.notify(&AnalyticsEvent::DidEndVerification {
                product_identifier: product_identifier.to_string(),
                server: server.endpoint.clone(),
                state,
            });

            match verdict {
                Ok(accepted) => {
                    info!(product = %product_identifier, endpoint = %server.endpoint, accepted, "Verdict");
                    return state;
                }
                Err(e) => {
                    warn!(product = %product_identifier, endpoint = %server.endpoint, error = %e, "Server unreachable; trying next");
                }
            }
        }

        warn!(product = %product_identifier, servers = servers.len(), "All validation servers unreachable");
        VerificationState::Failed
    }

    async fn attempt(&self, server: &ValidationServer, receipt: &Receipt) -> Result<bool, TransportError> {
        debug!(endpoint = %server.endpoint, bytes = receipt.len(), "Posting receipt");
        match tokio::time::timeout(self.attempt_timeout, self.transport.post(&server.endpoint, receipt)).await {
            Ok(response) => response.map(|r| r.accepted),
            Err(_) => Err(TransportError::Timeout(self.attempt_timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AnalyticsEventKind;
    use crate::mock::{MockValidator, RecordingAnalytics, ServerBehavior};
    use proptest::prelude::*;

    fn receipt() -> Receipt {
        Receipt::new(b"receipt".to_vec())
    }

    fn pool(validator: &MockValidator) -> ValidationServerPool {
        ValidationServerPool::new(Arc::new(validator.clone()), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_unreachable_falls_through_to_next() {
        let validator = MockValidator::new()
            .with("A", ServerBehavior::Unreachable)
            .with("B", ServerBehavior::Accept);
        let pool = pool(&validator);
        pool.register_servers(vec![ValidationServer::new("B", 1), ValidationServer::new("A", 0)]);

        let state = pool.verify("sku.pro", &receipt(), &Dispatcher::new()).await;

        assert_eq!(state, VerificationState::Success);
        assert_eq!(validator.calls(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_rejection_is_authoritative() {
        let validator = MockValidator::new()
            .with("A", ServerBehavior::Reject)
            .with("B", ServerBehavior::Accept);
        let pool = pool(&validator);
        pool.register_servers(vec![ValidationServer::new("A", 0), ValidationServer::new("B", 1)]);

        let state = pool.verify("sku.pro", &receipt(), &Dispatcher::new()).await;

        assert_eq!(state, VerificationState::Failed);
        assert_eq!(validator.call_count("B"), 0);
    }

    #[tokio::test]
    async fn test_registration_replaces_pool() {
        let validator = MockValidator::new()
            .with("X", ServerBehavior::Accept)
            .with("Y", ServerBehavior::Accept)
            .with("Z", ServerBehavior::Accept);
        let pool = pool(&validator);
        pool.register_servers(vec![ValidationServer::new("X", 0), ValidationServer::new("Y", 1)]);
        pool.register_servers(vec![ValidationServer::new("Z", 0)]);

        assert_eq!(pool.servers().len(), 1);
        pool.verify("sku.pro", &receipt(), &Dispatcher::new()).await;
        assert_eq!(validator.calls(), vec!["Z"]);
    }

    #[tokio::test]
    async fn test_empty_pool_fails_closed() {
        let validator = MockValidator::new();
        let state = pool(&validator)
            .verify("sku.pro", &receipt(), &Dispatcher::new())
            .await;
        assert_eq!(state, VerificationState::Failed);
        assert!(validator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_pool_fails_closed() {
        let validator = MockValidator::new().with("A", ServerBehavior::Hang);
        let pool = pool(&validator);
        pool.register_servers(vec![ValidationServer::new("A", 0), ValidationServer::new("B", 1)]);

        let state = pool.verify("sku.pro", &receipt(), &Dispatcher::new()).await;

        assert_eq!(state, VerificationState::Failed);
        assert_eq!(validator.calls(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_each_attempt_is_bracketed_for_analytics() {
        let validator = MockValidator::new()
            .with("A", ServerBehavior::Unreachable)
            .with("B", ServerBehavior::Accept);
        let pool = pool(&validator);
        pool.register_servers(vec![ValidationServer::new("A", 0), ValidationServer::new("B", 1)]);
        let analytics = Arc::new(RecordingAnalytics::new());
        let dispatcher = Dispatcher::new();
        dispatcher.set_analytics(Some(analytics.clone()));

        pool.verify("sku.pro", &receipt(), &dispatcher).await;

        assert_eq!(
            analytics.kinds(),
            vec![
                AnalyticsEventKind::DidBeginVerification,
                AnalyticsEventKind::DidEndVerification,
                AnalyticsEventKind::DidBeginVerification,
                AnalyticsEventKind::DidEndVerification,
            ]
        );
        assert_eq!(
            analytics.events()[1],
            AnalyticsEvent::DidEndVerification {
                product_identifier: "sku.pro".into(),
                server: "A".into(),
                state: VerificationState::Unknown,
            }
        );
    }

    proptest! {
        #[test]
        fn prop_registration_orders_by_priority_stably(priorities in proptest::collection::vec(-3i32..3, 0..16)) {
            let pool = ValidationServerPool::new(Arc::new(MockValidator::new()), Duration::from_millis(10));
            let servers: Vec<ValidationServer> = priorities
                .iter()
                .enumerate()
                .map(|(i, p)| ValidationServer::new(format!("server-{i}"), *p))
                .collect();

            let registered = pool.register_servers(servers.clone());

            prop_assert_eq!(registered.len(), servers.len());
            for pair in registered.windows(2) {
                prop_assert!(pair[0].priority <= pair[1].priority);
                if pair[0].priority == pair[1].priority {
                    let index = |s: &ValidationServer| s.endpoint.trim_start_matches("server-").parse::<usize>().unwrap();
                    prop_assert!(index(&pair[0]) < index(&pair[1]));
                }
            }
        }
    }
}
