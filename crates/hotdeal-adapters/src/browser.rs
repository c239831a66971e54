//! Browser-page contract used by the page fetcher.
//!
//! A real automation driver (headless Chromium and friends) plugs in behind
//! [`BrowserDriver`]. [`HttpBrowserDriver`] is the plain-HTTP stand-in: a "page"
//! is one GET request, and "content appeared" means the ready selector matches
//! the returned markup.

use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;

use crate::select::parse_selector;
use crate::AdapterError;

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, AdapterError>;
}

#[async_trait]
pub trait BrowserPage: Send {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), AdapterError>;

    /// `Ok(false)` when the selector never showed up within `timeout`.
    async fn wait_for_content(&mut self, selector: &str, timeout: Duration)
        -> Result<bool, AdapterError>;

    async fn content(&mut self) -> Result<String, AdapterError>;

    /// Release the page. Called exactly once on every exit path.
    async fn close(self: Box<Self>);
}

#[derive(Debug, Clone)]
pub struct HttpBrowserDriver {
    client: reqwest::Client,
}

impl HttpBrowserDriver {
    pub fn new(user_agent: &str) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| AdapterError::Message(format!("building http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrowserDriver for HttpBrowserDriver {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, AdapterError> {
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            body: None,
        }))
    }
}

struct HttpPage {
    client: reqwest::Client,
    body: Option<String>,
}

#[async_trait]
impl BrowserPage for HttpPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), AdapterError> {
        let navigation = |reason: String| AdapterError::Navigation {
            url: url.to_string(),
            reason,
        };
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(timeout)
                } else {
                    navigation(e.to_string())
                }
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(navigation(format!("http status {}", status.as_u16())));
        }
        let body = resp.text().await.map_err(|e| navigation(e.to_string()))?;
        self.body = Some(body);
        Ok(())
    }

    async fn wait_for_content(
        &mut self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<bool, AdapterError> {
        let Some(body) = self.body.as_deref() else {
            return Ok(false);
        };
        let sel = parse_selector(selector)?;
        let document = Html::parse_document(body);
        let found = document.select(&sel).next().is_some();
        Ok(found)
    }

    async fn content(&mut self) -> Result<String, AdapterError> {
        self.body
            .clone()
            .ok_or_else(|| AdapterError::Malformed("page has no content before navigation".into()))
    }

    async fn close(self: Box<Self>) {}
}
