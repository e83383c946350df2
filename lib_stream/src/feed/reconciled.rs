//! # Reconciled Feed
//!
//! The in-memory working set behind the ledger panel. Two writers feed it:
//! live tips pushed over the stream and older pages fetched on demand. Both
//! go through the same keyed insert, which keeps two invariants at all times:
//!
//! - no two entries share a key;
//! - entries are sorted by descending key (newest first).
//!
//! Live inserts are capped to a window by dropping the oldest entries. Fetched
//! pages are never truncated; the user asked for them.

use crate::feed::entry::FeedEntry;

/// Default cap on the live tail.
pub const DEFAULT_WINDOW: usize = 20;

/// Result of [`ReconciledFeed::on_live_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveInsert {
    /// The entry is now part of the feed.
    Inserted,
    /// An entry with the same key was already present. Nothing changed.
    Duplicate,
    /// The entry sorted below a full window and was dropped immediately.
    OutsideWindow,
}

#[derive(Debug, Clone)]
pub struct ReconciledFeed {
    entries: Vec<FeedEntry>,
    window: usize,
    known_total: Option<u64>,
}

impl Default for ReconciledFeed {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ReconciledFeed {
    pub fn new(window: usize) -> Self {
        Self {
            entries: Vec::new(),
            window: window.max(1),
            known_total: None,
        }
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<u64> {
        self.entries.iter().map(FeedEntry::key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn known_total(&self) -> Option<u64> {
        self.known_total
    }

    pub fn set_known_total(&mut self, total: u64) {
        self.known_total = Some(total);
    }

    pub fn contains(&self, key: u64) -> bool {
        self.position(key).is_ok()
    }

    /// Whether the backend reports more entries than are held locally.
    pub fn can_load_more(&self) -> bool {
        self.known_total.is_some_and(|total| total > self.entries.len() as u64)
    }

    /// Applies one live-pushed entry.
    pub fn on_live_entry(&mut self, entry: FeedEntry) -> LiveInsert {
        let key = entry.key();
        let Err(at) = self.position(key) else {
            return LiveInsert::Duplicate;
        };

        if at >= self.window {
            return LiveInsert::OutsideWindow;
        }

        self.entries.insert(at, entry);
        self.entries.truncate(self.window);
        LiveInsert::Inserted
    }

    /// Merges a fetched page and returns the entries that were actually added,
    /// newest first.
    pub fn merge_older(&mut self, page: Vec<FeedEntry>) -> Vec<FeedEntry> {
        let mut added = Vec::new();
        for entry in page {
            if let Err(at) = self.position(entry.key()) {
                self.entries.insert(at, entry.clone());
                added.push(entry);
            }
        }
        added.sort_by(|a, b| b.key().cmp(&a.key()));
        added
    }

    /// Drops every entry and the known total.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.known_total = None;
    }

    fn position(&self, key: u64) -> Result<usize, usize> {
        self.entries.binary_search_by(|probe| key.cmp(&probe.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_of(keys: &[u64]) -> ReconciledFeed {
        let mut feed = ReconciledFeed::default();
        feed.merge_older(keys.iter().copied().map(FeedEntry::new).collect());
        feed
    }

    fn entries(keys: &[u64]) -> Vec<FeedEntry> {
        keys.iter().copied().map(FeedEntry::new).collect()
    }

    fn assert_invariants(feed: &ReconciledFeed) {
        let keys = feed.keys();
        assert!(keys.windows(2).all(|w| w[0] > w[1]), "not strictly descending: {:?}", keys);
    }

    #[test]
    fn test_live_duplicate_is_ignored() {
        let mut feed = feed_of(&[10, 9, 8]);
        assert_eq!(feed.on_live_entry(FeedEntry::new(9)), LiveInsert::Duplicate);
        assert_eq!(feed.keys(), vec![10, 9, 8]);
    }

    #[test]
    fn test_live_head_insert() {
        let mut feed = feed_of(&[10, 9, 8]);
        assert_eq!(feed.on_live_entry(FeedEntry::new(11)), LiveInsert::Inserted);
        assert_eq!(feed.keys(), vec![11, 10, 9, 8]);
    }

    #[test]
    fn test_live_out_of_order_insert_lands_by_key() {
        let mut feed = feed_of(&[10, 9]);
        assert_eq!(feed.on_live_entry(FeedEntry::new(7)), LiveInsert::Inserted);
        assert_eq!(feed.keys(), vec![10, 9, 7]);
    }

    #[test]
    fn test_older_page_appends_below() {
        let mut feed = feed_of(&[10, 9, 8]);
        let added = feed.merge_older(entries(&[8, 7, 6]));
        assert_eq!(added.iter().map(FeedEntry::key).collect::<Vec<_>>(), vec![7, 6]);
        assert_eq!(feed.keys(), vec![10, 9, 8, 7, 6]);
    }

    #[test]
    fn test_page_in_ascending_order_is_sorted() {
        let mut feed = ReconciledFeed::default();
        feed.merge_older(entries(&[1, 2, 3, 4]));
        assert_eq!(feed.keys(), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut feed = ReconciledFeed::default();
        for key in 1..=25 {
            feed.on_live_entry(FeedEntry::new(key));
            assert!(feed.len() <= DEFAULT_WINDOW);
            assert_invariants(&feed);
        }
        assert_eq!(feed.len(), 20);
        assert_eq!(feed.keys().first(), Some(&25));
        assert_eq!(feed.keys().last(), Some(&6));
    }

    #[test]
    fn test_live_entry_below_full_window_is_dropped() {
        let mut feed = ReconciledFeed::new(3);
        for key in [10, 9, 8] {
            feed.on_live_entry(FeedEntry::new(key));
        }
        assert_eq!(feed.on_live_entry(FeedEntry::new(2)), LiveInsert::OutsideWindow);
        assert_eq!(feed.keys(), vec![10, 9, 8]);
    }

    #[test]
    fn test_fetched_pages_are_not_truncated() {
        let mut feed = ReconciledFeed::new(3);
        feed.merge_older(entries(&[10, 9, 8, 7, 6]));
        assert_eq!(feed.len(), 5);

        // The next live push trims back to the window.
        feed.on_live_entry(FeedEntry::new(11));
        assert_eq!(feed.keys(), vec![11, 10, 9]);
    }

    #[test]
    fn test_can_load_more() {
        let mut feed = feed_of(&[3, 2]);
        assert!(!feed.can_load_more());

        feed.set_known_total(4);
        assert!(feed.can_load_more());

        feed.merge_older(entries(&[1, 0]));
        assert!(!feed.can_load_more());
    }

    #[test]
    fn test_mixed_writers_keep_invariants() {
        let mut feed = ReconciledFeed::default();
        let live = [40, 41, 39, 41, 45, 30, 44];
        let pages = [vec![38, 37, 36], vec![44, 43, 42], vec![36, 35, 30]];

        for (i, key) in live.iter().enumerate() {
            feed.on_live_entry(FeedEntry::new(*key));
            if let Some(page) = pages.get(i) {
                feed.merge_older(entries(page));
            }
            assert_invariants(&feed);
        }
        assert_eq!(feed.keys(), vec![45, 44, 43, 42, 41, 40, 39, 38, 37, 36, 35, 30]);
    }

    #[test]
    fn test_clear() {
        let mut feed = feed_of(&[2, 1]);
        feed.set_known_total(9);
        feed.clear();
        assert!(feed.is_empty());
        assert_eq!(feed.known_total(), None);
    }
}
