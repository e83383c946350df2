//! # Feed Reconciler
//!
//! Connects a [`ReconciledFeed`] to its two writers: the `blockchain` section
//! of the stream (the live ledger tip) and a [`FeedSource`] serving older
//! pages. The `overview` section supplies the authoritative block count that
//! drives the load-more affordance.
//!
//! The feed lock is a plain `std::sync::Mutex`. It is taken inside router
//! callbacks and after a fetch resolves, never across an `.await`, so a fetch
//! in flight never blocks live updates.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use crate::core::router::{SubscriptionId, SubscriptionRouter};
use crate::core::snapshot::{Section, SectionName};
use crate::error::FetchError;
use crate::feed::entry::FeedEntry;
use crate::feed::reconciled::{LiveInsert, ReconciledFeed};

/// One page request: `limit` entries starting `offset` entries below the newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

/// A fetched page. `total` is set when the backend reports its full count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub entries: Vec<FeedEntry>,
    pub total: Option<u64>,
}

/// Serves historical ledger pages.
pub trait FeedSource: Send + Sync + 'static {
    fn fetch_page(&self, request: PageRequest) -> BoxFuture<'_, Result<FeedPage, FetchError>>;
}

pub struct FeedReconciler {
    feed: Arc<Mutex<ReconciledFeed>>,
    revision: Arc<watch::Sender<u64>>,
    router: Arc<SubscriptionRouter>,
    source: Arc<dyn FeedSource>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    page_size: usize,
}

impl FeedReconciler {
    /// Creates an empty feed and subscribes it to the ledger tip and overview sections.
    pub fn attach(
        router: Arc<SubscriptionRouter>,
        source: Arc<dyn FeedSource>,
        window: usize,
        page_size: usize,
    ) -> Self {
        let feed = Arc::new(Mutex::new(ReconciledFeed::new(window)));
        let (revision, _) = watch::channel(0u64);
        let revision = Arc::new(revision);

        let tip_feed = Arc::clone(&feed);
        let tip_revision = Arc::clone(&revision);
        let tip_id = router.subscribe(SectionName::Blockchain, move |section| {
            let Section::Blockchain(tip) = section else {
                return Ok(());
            };
            let Some(block) = tip.latest_block.as_ref() else {
                return Ok(());
            };

            let outcome = lock(&tip_feed).on_live_entry(block.clone());
            match outcome {
                LiveInsert::Inserted => {
                    tracing::debug!(index = block.index, "Live ledger entry added");
                    tip_revision.send_modify(|r| *r += 1);
                }
                LiveInsert::Duplicate => {}
                LiveInsert::OutsideWindow => tracing::debug!(index = block.index, "Live entry below window"),
            }
            Ok(())
        });

        let total_feed = Arc::clone(&feed);
        let total_revision = Arc::clone(&revision);
        let total_id = router.subscribe(SectionName::Overview, move |section| {
            let Section::Overview(overview) = section else {
                return Ok(());
            };
            let Some(total) = overview.models_verified() else {
                return Ok(());
            };
            let changed = {
                let mut feed = lock(&total_feed);
                let changed = feed.known_total() != Some(total);
                feed.set_known_total(total);
                changed
            };
            if changed {
                total_revision.send_modify(|r| *r += 1);
            }
            Ok(())
        });

        Self {
            feed,
            revision,
            router,
            source,
            subscriptions: Mutex::new(vec![tip_id, total_id]),
            page_size: page_size.max(1),
        }
    }

    /// Copy of the current working set.
    pub fn snapshot(&self) -> ReconciledFeed {
        lock(&self.feed).clone()
    }

    pub fn entries(&self) -> Vec<FeedEntry> {
        lock(&self.feed).entries().to_vec()
    }

    pub fn len(&self) -> usize {
        lock(&self.feed).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.feed).is_empty()
    }

    pub fn can_load_more(&self) -> bool {
        lock(&self.feed).can_load_more()
    }

    /// Receiver bumped whenever the feed contents or known total change.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Fetches the page directly below the first `current_count` entries and
    /// merges it. Returns the entries that were new.
    ///
    /// On error the feed is left untouched.
    pub async fn fetch_older(&self, current_count: usize) -> Result<Vec<FeedEntry>, FetchError> {
        let request = PageRequest {
            limit: self.page_size,
            offset: current_count,
        };
        let page = self.source.fetch_page(request).await?;
        Ok(self.merge_page(page, |_| None))
    }

    /// `fetch_older` at the current length.
    pub async fn load_more(&self) -> Result<Vec<FeedEntry>, FetchError> {
        let current = self.len();
        self.fetch_older(current).await
    }

    /// Re-reads the newest entries from the source to fill gaps and correct the
    /// known total after a missed update.
    pub async fn refresh(&self) -> Result<Vec<FeedEntry>, FetchError> {
        let limit = self.len().max(self.page_size);
        let page = self.source.fetch_page(PageRequest { limit, offset: 0 }).await?;

        // A short first page without a total is the whole ledger.
        Ok(self.merge_page(page, move |page| {
            (page.entries.len() < limit).then_some(page.entries.len() as u64)
        }))
    }

    /// Unsubscribes from the router and clears the feed. Idempotent.
    pub fn detach(&self) {
        let ids: Vec<SubscriptionId> = {
            let mut subs = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
            subs.drain(..).collect()
        };
        if ids.is_empty() {
            return;
        }
        for id in ids {
            self.router.unsubscribe(id);
        }
        lock(&self.feed).clear();
        self.revision.send_modify(|r| *r += 1);
    }

    fn merge_page(&self, page: FeedPage, inferred_total: impl FnOnce(&FeedPage) -> Option<u64>) -> Vec<FeedEntry> {
        let total = page.total.or_else(|| inferred_total(&page));

        let (added, changed) = {
            let mut feed = lock(&self.feed);
            let before = feed.known_total();
            if let Some(total) = total {
                feed.set_known_total(total);
            }
            let added = feed.merge_older(page.entries);
            tracing::debug!(added = added.len(), len = feed.len(), total = ?feed.known_total(), "Merged ledger page");
            let changed = !added.is_empty() || feed.known_total() != before;
            (added, changed)
        };

        // Notify outside the feed lock; watchers read the feed.
        if changed {
            self.revision.send_modify(|r| *r += 1);
        }
        added
    }
}

impl Drop for FeedReconciler {
    fn drop(&mut self) {
        self.detach();
    }
}

fn lock(feed: &Mutex<ReconciledFeed>) -> MutexGuard<'_, ReconciledFeed> {
    feed.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::{LedgerTip, MetricValue, Overview, OverviewMetric, Snapshot};

    /// Serves a fixed, newest-first ledger.
    struct MockSource {
        keys: Vec<u64>,
        report_total: bool,
        fail: bool,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl MockSource {
        fn new(keys: Vec<u64>) -> Self {
            Self {
                keys,
                report_total: true,
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl FeedSource for MockSource {
        fn fetch_page(&self, request: PageRequest) -> BoxFuture<'_, Result<FeedPage, FetchError>> {
            self.requests.lock().unwrap().push(request);
            let result = if self.fail {
                Err(FetchError::Status {
                    status: 503,
                    body: "ledger unavailable".into(),
                })
            } else {
                Ok(FeedPage {
                    entries: self
                        .keys
                        .iter()
                        .skip(request.offset)
                        .take(request.limit)
                        .copied()
                        .map(FeedEntry::new)
                        .collect(),
                    total: self.report_total.then_some(self.keys.len() as u64),
                })
            };
            Box::pin(async move { result })
        }
    }

    fn tip(index: u64) -> Snapshot {
        Snapshot::from_sections(vec![Section::Blockchain(LedgerTip {
            latest_block: Some(FeedEntry::new(index)),
        })])
    }

    fn verified(count: &str) -> Snapshot {
        Snapshot::from_sections(vec![Section::Overview(Overview {
            metrics: vec![OverviewMetric {
                label: Overview::MODELS_VERIFIED.to_string(),
                value: MetricValue::Text(count.to_string()),
                color: None,
            }],
            services: vec![],
        })])
    }

    fn attach(source: MockSource, page_size: usize) -> (Arc<SubscriptionRouter>, Arc<MockSource>, FeedReconciler) {
        let router = Arc::new(SubscriptionRouter::new());
        let source = Arc::new(source);
        let dyn_source: Arc<dyn FeedSource> = source.clone();
        let reconciler = FeedReconciler::attach(Arc::clone(&router), dyn_source, 20, page_size);
        (router, source, reconciler)
    }

    fn keys(entries: &[FeedEntry]) -> Vec<u64> {
        entries.iter().map(FeedEntry::key).collect()
    }

    #[tokio::test]
    async fn test_live_tips_flow_from_router() {
        let (router, _, reconciler) = attach(MockSource::new(vec![]), 5);
        let mut changes = reconciler.watch_changes();

        for index in [8, 9, 10, 9] {
            router.publish(&tip(index));
        }

        assert_eq!(keys(&reconciler.entries()), vec![10, 9, 8]);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), 3);
    }

    #[tokio::test]
    async fn test_fetch_older_merges_overlapping_page() {
        // Block 11 exists on the backend but has not been pushed yet.
        let (router, source, reconciler) = attach(MockSource::new((1..=11).rev().collect()), 3);
        for index in [8, 9, 10] {
            router.publish(&tip(index));
        }

        let added = reconciler.fetch_older(3).await.unwrap();

        assert_eq!(source.requests.lock().unwrap()[0], PageRequest { limit: 3, offset: 3 });
        assert_eq!(keys(&added), vec![7, 6]);
        assert_eq!(keys(&reconciler.entries()), vec![10, 9, 8, 7, 6]);
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_feed_untouched() {
        let mut source = MockSource::new(vec![3, 2, 1]);
        source.fail = true;
        let (router, _, reconciler) = attach(source, 5);
        router.publish(&tip(3));

        let err = reconciler.load_more().await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert_eq!(keys(&reconciler.entries()), vec![3]);
    }

    #[tokio::test]
    async fn test_known_total_from_overview_drives_load_more() {
        let mut source = MockSource::new((1..=12).rev().collect());
        source.report_total = false;
        let (router, source, reconciler) = attach(source, 5);

        router.publish(&tip(12));
        assert!(!reconciler.can_load_more());

        router.publish(&verified("12"));
        assert!(reconciler.can_load_more());

        reconciler.load_more().await.unwrap();
        reconciler.load_more().await.unwrap();
        reconciler.load_more().await.unwrap();

        let offsets: Vec<usize> = source.requests.lock().unwrap().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![1, 6, 11]);
        assert_eq!(reconciler.len(), 12);
        assert!(!reconciler.can_load_more());
    }

    #[tokio::test]
    async fn test_refresh_recovers_stale_total() {
        let (router, source, reconciler) = attach(MockSource::new((1..=8).rev().collect()), 5);

        router.publish(&verified("2"));
        router.publish(&tip(7));
        router.publish(&tip(8));
        assert!(!reconciler.can_load_more());

        let added = reconciler.refresh().await.unwrap();

        assert_eq!(source.requests.lock().unwrap()[0], PageRequest { limit: 5, offset: 0 });
        assert_eq!(keys(&added), vec![6, 5, 4]);
        assert!(reconciler.can_load_more());
        assert_eq!(reconciler.snapshot().known_total(), Some(8));
    }

    #[tokio::test]
    async fn test_refresh_infers_total_from_short_page() {
        let mut source = MockSource::new(vec![3, 2, 1]);
        source.report_total = false;
        let (_, _, reconciler) = attach(source, 5);

        reconciler.refresh().await.unwrap();
        assert_eq!(reconciler.snapshot().known_total(), Some(3));
        assert!(!reconciler.can_load_more());
    }

    #[tokio::test]
    async fn test_detach_unsubscribes_and_clears() {
        let (router, _, reconciler) = attach(MockSource::new(vec![]), 5);
        router.publish(&tip(1));
        assert_eq!(router.subscriber_count(SectionName::Blockchain), 1);
        assert_eq!(router.subscriber_count(SectionName::Overview), 1);

        reconciler.detach();
        reconciler.detach();

        assert_eq!(router.subscriber_count(SectionName::Blockchain), 0);
        assert_eq!(router.subscriber_count(SectionName::Overview), 0);
        assert!(reconciler.is_empty());

        router.publish(&tip(2));
        assert!(reconciler.is_empty());
    }
}
