//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`, shared by the ledger
//! pagination source, the control dispatcher, the document uploader and the
//! overview poller. Requests go through a `reqwest_middleware` client with no
//! retry middleware installed: every call here is a single attempt and the
//! caller decides what a failure means.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::multipart::Form;
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};

use crate::configs::StreamConfig;
use crate::error::FetchError;

/// A standardized container for API responses.
///
/// Wraps the deserialized data along with the HTTP status and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized response body, set only for 2xx responses.
    pub data: Option<T>,
    /// The raw body returned with a non-2xx status.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Converts a non-2xx response into [`FetchError::Status`].
    pub fn into_data(self) -> Result<T, FetchError> {
        match self.data {
            Some(data) if self.success => Ok(data),
            _ => Err(FetchError::Status {
                status: self.status,
                body: self.error_body.unwrap_or_default(),
            }),
        }
    }
}

/// Asynchronous HTTP client bound to the backend base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
}

impl ApiClient {
    /// Creates a client with a per-request timeout.
    ///
    /// # Errors
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: ClientBuilder::new(client).build(),
            base_url,
        })
    }

    pub fn from_config(config: &StreamConfig) -> Result<Self, FetchError> {
        Self::new(config.base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins a relative path onto the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Performs a request and decodes a JSON response.
    ///
    /// Non-2xx statuses are returned as `Ok` with `success == false`; only
    /// network, URL and body decoding failures are errors.
    pub async fn request<T, B>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, FetchError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut req = self.inner.request(method, url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        self.execute(req).await
    }

    /// `GET {base}/{path}` returning the decoded body of a 2xx response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, FetchError> {
        let url = self.endpoint(path)?;
        self.request::<T, ()>(Method::GET, url, query, None).await?.into_data()
    }

    /// Posts a multipart form to `{base}/{path}`.
    pub async fn post_multipart<T: DeserializeOwned>(&self, path: &str, form: Form) -> Result<ApiResponse<T>, FetchError> {
        let url = self.endpoint(path)?;
        self.execute(self.inner.post(url).multipart(form)).await
    }

    /// Posts to an absolute URL and reports only the status code. The response
    /// body is drained and discarded.
    pub async fn post_status<B>(&self, url: Url, body: Option<&B>) -> Result<u16, FetchError>
    where
        B: Serialize + ?Sized,
    {
        let mut req = self.inner.post(url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let response = req.send().await?;
        let status = response.status().as_u16();
        if let Err(e) = response.bytes().await {
            tracing::debug!(status, error = %e, "Discarding unreadable response body");
        }
        Ok(status)
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<ApiResponse<T>, FetchError> {
        let response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let text = response.text().await?;
            let data = serde_json::from_str::<T>(&text)?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }
}
