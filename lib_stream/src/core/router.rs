//! # Subscription Router
//!
//! The `SubscriptionRouter` fans the sections of each [`Snapshot`] out to the
//! handlers registered for them. It is the only path between the shared stream
//! and the panels that consume it.
//!
//! ## Core Design Principles:
//!
//! 1.  **Per-Section Fan-out**: A handler is registered for exactly one
//!     [`SectionName`] and only ever sees values of that section. Sections
//!     absent from a snapshot produce no calls at all.
//!
//! 2.  **Registration Order**: Handlers of the same section run in the order they
//!     subscribed. Sections are visited in snapshot order.
//!
//! 3.  **Failure Isolation**: A handler that returns an error or panics is logged
//!     and skipped. The remaining handlers of the same publish still run and the
//!     failing handler stays registered for the next snapshot.
//!
//! 4.  **No Lock Across Callbacks**: The registry lock is held only long enough
//!     to clone the handler list. Handlers may subscribe or unsubscribe from
//!     inside a callback; the change takes effect from the next publish.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::snapshot::{Section, SectionName, Snapshot};
use crate::error::HandlerError;

/// A section callback.
pub type SectionHandler = Arc<dyn Fn(&Section) -> Result<(), HandlerError> + Send + Sync>;

/// Opaque token returned by [`SubscriptionRouter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome of one [`SubscriptionRouter::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handler invocations that returned `Ok`.
    pub delivered: usize,
    /// Handler invocations that returned an error or panicked.
    pub failed: usize,
}

struct Subscription {
    id: SubscriptionId,
    handler: SectionHandler,
}

/// Routes snapshot sections to registered handlers.
#[derive(Default)]
pub struct SubscriptionRouter {
    routes: Mutex<HashMap<SectionName, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `section`.
    pub fn subscribe<F>(&self, section: SectionName, handler: F) -> SubscriptionId
    where
        F: Fn(&Section) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.entry(section).or_default().push(Subscription {
            id,
            handler: Arc::new(handler),
        });
        tracing::debug!(%section, id = id.0, "Subscriber registered");
        id
    }

    /// Removes a registration. Returns `false` if the id was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        for subs in routes.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                tracing::debug!(id = id.0, "Subscriber removed");
                return true;
            }
        }
        false
    }

    /// Number of handlers currently registered for `section`.
    pub fn subscriber_count(&self, section: SectionName) -> usize {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.get(&section).map_or(0, Vec::len)
    }

    /// Delivers every present section of `snapshot` to its handlers.
    pub fn publish(&self, snapshot: &Snapshot) -> PublishReport {
        let mut report = PublishReport::default();

        for section in snapshot.sections() {
            let name = section.name();
            let handlers = self.handlers_for(name);

            for (id, handler) in handlers {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(section)));
                match outcome {
                    Ok(Ok(())) => report.delivered += 1,
                    Ok(Err(e)) => {
                        report.failed += 1;
                        tracing::warn!(section = %name, id = id.0, error = %e, "Subscriber failed");
                    }
                    Err(_) => {
                        report.failed += 1;
                        tracing::error!(section = %name, id = id.0, "Subscriber panicked");
                    }
                }
            }
        }

        report
    }

    fn handlers_for(&self, section: SectionName) -> Vec<(SubscriptionId, SectionHandler)> {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes
            .get(&section)
            .map(|subs| subs.iter().map(|s| (s.id, Arc::clone(&s.handler))).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::{NamedMetric, SecurityStatus, TrainingMetrics};

    fn training(round: u64) -> Section {
        Section::TrainingMetrics(TrainingMetrics {
            round: Some(round),
            metrics: vec![NamedMetric {
                label: "Accuracy".to_string(),
                value: 90.0,
                target: None,
            }],
        })
    }

    fn security() -> Section {
        Section::Security(SecurityStatus {
            metrics: vec![],
            events: vec![],
        })
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> SectionHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_make = Arc::clone(&log);
        let make = move |tag: &'static str| -> SectionHandler {
            let log = Arc::clone(&log_for_make);
            Arc::new(move |section: &Section| {
                log.lock().unwrap().push(format!("{}:{}", tag, section.name()));
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn test_only_present_sections_are_delivered() {
        let router = SubscriptionRouter::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        router.subscribe(SectionName::TrainingMetrics, move |s| a(s));
        router.subscribe(SectionName::Workers, move |s| b(s));

        let report = router.publish(&Snapshot::from_sections(vec![training(3)]));

        assert_eq!(report, PublishReport { delivered: 1, failed: 0 });
        assert_eq!(*log.lock().unwrap(), vec!["a:training".to_string()]);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let router = SubscriptionRouter::new();
        let (log, make) = recorder();
        for tag in ["first", "second", "third"] {
            let h = make(tag);
            router.subscribe(SectionName::Security, move |s| h(s));
        }

        router.publish(&Snapshot::from_sections(vec![security()]));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:security", "second:security", "third:security"]
        );
    }

    #[test]
    fn test_failing_handler_does_not_block_siblings() {
        let router = SubscriptionRouter::new();
        let (log, make) = recorder();
        let after = make("after");

        router.subscribe(SectionName::TrainingMetrics, |_| Err(HandlerError::new("render failed")));
        router.subscribe(SectionName::TrainingMetrics, move |s| after(s));

        let report = router.publish(&Snapshot::from_sections(vec![training(1)]));
        assert_eq!(report, PublishReport { delivered: 1, failed: 1 });
        assert_eq!(log.lock().unwrap().len(), 1);

        // The failing handler stays registered.
        assert_eq!(router.subscriber_count(SectionName::TrainingMetrics), 2);
        let report = router.publish(&Snapshot::from_sections(vec![training(2)]));
        assert_eq!(report.failed, 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let router = SubscriptionRouter::new();
        let (log, make) = recorder();
        let after = make("after");

        router.subscribe(SectionName::Security, |_| panic!("boom"));
        router.subscribe(SectionName::Security, move |s| after(s));

        let report = router.publish(&Snapshot::from_sections(vec![security()]));
        assert_eq!(report, PublishReport { delivered: 1, failed: 1 });
        assert_eq!(*log.lock().unwrap(), vec!["after:security".to_string()]);
    }

    #[test]
    fn test_unsubscribe() {
        let router = SubscriptionRouter::new();
        let id = router.subscribe(SectionName::Security, |_| Ok(()));
        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));

        let report = router.publish(&Snapshot::from_sections(vec![security()]));
        assert_eq!(report, PublishReport::default());
    }

    #[test]
    fn test_subscribe_from_inside_handler_applies_next_publish() {
        let router = Arc::new(SubscriptionRouter::new());
        let calls = Arc::new(AtomicU64::new(0));

        let inner_router = Arc::clone(&router);
        let inner_calls = Arc::clone(&calls);
        router.subscribe(SectionName::Security, move |_| {
            let c = Arc::clone(&inner_calls);
            inner_router.subscribe(SectionName::Security, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        let first = router.publish(&Snapshot::from_sections(vec![security()]));
        assert_eq!(first.delivered, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        router.publish(&Snapshot::from_sections(vec![security()]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
