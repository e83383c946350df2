//! Ledger history over HTTP.
//!
//! `GET api/blockchain?limit=N&offset=M` answers either a bare array of blocks
//! or `{ "blocks": [...], "total": n }`. Both are accepted.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;

use crate::configs::StreamConfig;
use crate::error::FetchError;
use crate::feed::{FeedEntry, FeedPage, FeedSource, PageRequest};
use crate::retrieve::ky_http::ApiClient;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageBody {
    Bare(Vec<FeedEntry>),
    Wrapped {
        blocks: Vec<FeedEntry>,
        #[serde(default)]
        total: Option<u64>,
    },
}

impl From<PageBody> for FeedPage {
    fn from(body: PageBody) -> Self {
        match body {
            PageBody::Bare(entries) => FeedPage { entries, total: None },
            PageBody::Wrapped { blocks, total } => FeedPage { entries: blocks, total },
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: ApiClient,
    pagination_path: String,
    doc_ledger_path: String,
}

impl HttpFeedSource {
    pub fn new(client: ApiClient, config: &StreamConfig) -> Self {
        Self {
            client,
            pagination_path: config.pagination_path.clone(),
            doc_ledger_path: config.doc_ledger_path.clone(),
        }
    }

    pub async fn fetch(&self, request: PageRequest) -> Result<FeedPage, FetchError> {
        let query = [
            ("limit", request.limit.to_string()),
            ("offset", request.offset.to_string()),
        ];
        let body: PageBody = self.client.get_json(&self.pagination_path, &query).await?;
        let page = FeedPage::from(body);
        tracing::debug!(
            limit = request.limit,
            offset = request.offset,
            received = page.entries.len(),
            "Fetched ledger page"
        );
        Ok(page)
    }

    /// The document ledger, newest first.
    pub async fn document_ledger(&self) -> Result<Vec<FeedEntry>, FetchError> {
        let body: PageBody = self.client.get_json(&self.doc_ledger_path, &[]).await?;
        let mut entries = FeedPage::from(body).entries;
        entries.sort_by(|a, b| b.key().cmp(&a.key()));
        entries.dedup_by_key(|e| e.key());
        Ok(entries)
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch_page(&self, request: PageRequest) -> BoxFuture<'_, Result<FeedPage, FetchError>> {
        self.fetch(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_array_page() {
        let body: PageBody = serde_json::from_str(
            r#"[{"block": 3, "hash": "0xabc", "timestamp": "1 min ago", "verified": true},
                {"block": 2, "hash": "0xdef", "timestamp": "2 mins ago", "verified": true}]"#,
        )
        .unwrap();
        let page = FeedPage::from(body);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].key(), 3);
        assert_eq!(page.total, None);
    }

    #[test]
    fn test_wrapped_page_with_total() {
        let body: PageBody =
            serde_json::from_str(r#"{"blocks": [{"index": 9, "model_hash": "ff"}], "total": 42}"#).unwrap();
        let page = FeedPage::from(body);
        assert_eq!(page.entries[0].key(), 9);
        assert_eq!(page.total, Some(42));
    }

    #[test]
    fn test_wrapped_page_without_total() {
        let body: PageBody = serde_json::from_str(r#"{"blocks": []}"#).unwrap();
        assert_eq!(FeedPage::from(body), FeedPage::default());
    }
}
