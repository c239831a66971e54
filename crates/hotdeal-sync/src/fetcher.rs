//! Concurrent detail-page fetching with URL-variant fallback.
//!
//! Every target walks the same state machine: variants are tried in priority
//! order, each up to `max_attempts` times with a fixed pause in between, and the
//! first success wins. A target that runs out of variants becomes a
//! [`FetchFailure`]; the rest of the batch is unaffected.

use std::sync::Arc;
use std::time::Duration;

use hotdeal_adapters::{AdapterError, BrowserDriver, BrowserPage};
use hotdeal_storage::StartThrottle;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument};

/// Placeholders accepted in variant templates.
pub const PLACEHOLDERS: &[&str] = &[
    "post_url",
    "post_id",
    "post_path",
    "desktop_base",
    "alternate_base",
    "mobile_base",
];

const DEFAULT_TEMPLATES: &[&str] = &[
    "{post_url}",
    "{alternate_base}{post_path}",
    "{mobile_base}{post_path}",
];

/// Expands a post into its prioritized URL variants.
///
/// `{post_path}` is the path and query of the canonical post URL. Templates that
/// reference a base the source does not have are skipped, and duplicates keep
/// their first position.
#[derive(Debug, Clone)]
pub struct UrlVariants {
    desktop_base: String,
    alternate_base: Option<String>,
    mobile_base: Option<String>,
    templates: Vec<String>,
}

impl UrlVariants {
    pub fn new(
        desktop_base: &str,
        alternate_base: Option<&str>,
        mobile_base: Option<&str>,
        templates: Vec<String>,
    ) -> Self {
        let trim = |base: &str| base.trim_end_matches('/').to_string();
        Self {
            desktop_base: trim(desktop_base),
            alternate_base: alternate_base.map(trim),
            mobile_base: mobile_base.map(trim),
            templates: if templates.is_empty() {
                DEFAULT_TEMPLATES.iter().map(|t| t.to_string()).collect()
            } else {
                templates
            },
        }
    }

    pub fn expand(&self, post_url: &str, post_id: &str) -> Vec<String> {
        let post_path = post_path(post_url);
        let mut out: Vec<String> = Vec::new();
        for template in &self.templates {
            let needs = |name: &str| template.contains(&format!("{{{name}}}"));
            if (needs("alternate_base") && self.alternate_base.is_none())
                || (needs("mobile_base") && self.mobile_base.is_none())
            {
                continue;
            }
            let url = template
                .replace("{post_url}", post_url)
                .replace("{post_id}", post_id)
                .replace("{post_path}", &post_path)
                .replace("{desktop_base}", &self.desktop_base)
                .replace("{alternate_base}", self.alternate_base.as_deref().unwrap_or_default())
                .replace("{mobile_base}", self.mobile_base.as_deref().unwrap_or_default());
            if !out.contains(&url) {
                out.push(url);
            }
        }
        if out.is_empty() {
            out.push(post_url.to_string());
        }
        out
    }
}

fn post_path(post_url: &str) -> String {
    match url::Url::parse(post_url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_string(),
        },
        Err(_) => post_url.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub concurrency_limit: usize,
    pub min_spacing: Duration,
    /// Attempts per variant, counting the first.
    pub max_attempts: usize,
    pub retry_pause: Duration,
    pub page_timeout: Duration,
    pub content_wait: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub source: String,
    pub post_id: String,
    /// Priority-ordered; the first entry is the canonical URL.
    pub variants: Vec<String>,
    pub ready_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub source: String,
    pub post_id: String,
    pub url: String,
    pub html: String,
    pub variant: usize,
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}/{post_id}: all variants failed, last tried {last_url}: {error}")]
pub struct FetchFailure {
    pub source_name: String,
    pub post_id: String,
    pub last_url: String,
    pub error: String,
}

pub type FetchOutcome = Result<FetchedPage, FetchFailure>;

/// Per-target fetch progress. Every target starts out `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchState {
    #[default]
    Pending,
    Attempting { variant: usize, attempt: usize },
    Success { variant: usize, attempt: usize },
    Exhausted,
}

impl FetchState {
    /// First attempt on the first variant; a target without variants is exhausted
    /// before it starts.
    pub fn begin(self, variant_count: usize) -> Self {
        match self {
            FetchState::Pending if variant_count == 0 => FetchState::Exhausted,
            FetchState::Pending => FetchState::Attempting {
                variant: 0,
                attempt: 1,
            },
            other => other,
        }
    }

    pub fn succeed(self) -> Self {
        match self {
            FetchState::Attempting { variant, attempt } => FetchState::Success { variant, attempt },
            other => other,
        }
    }

    /// Retry the same variant, fall through to the next one, or give up.
    pub fn fail(self, variant_count: usize, max_attempts: usize) -> Self {
        match self {
            FetchState::Attempting { variant, attempt } if attempt < max_attempts => {
                FetchState::Attempting {
                    variant,
                    attempt: attempt + 1,
                }
            }
            FetchState::Attempting { variant, .. } if variant + 1 < variant_count => {
                FetchState::Attempting {
                    variant: variant + 1,
                    attempt: 1,
                }
            }
            FetchState::Attempting { .. } => FetchState::Exhausted,
            other => other,
        }
    }
}

pub struct PageFetcher {
    driver: Arc<dyn BrowserDriver>,
    policy: FetchPolicy,
}

impl PageFetcher {
    pub fn new(driver: Arc<dyn BrowserDriver>, policy: FetchPolicy) -> Self {
        Self { driver, policy }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetch every target. Outcomes come back in input order.
    pub async fn fetch_all(&self, targets: Vec<FetchTarget>) -> Vec<FetchOutcome> {
        let total = targets.len();
        let limit = Arc::new(Semaphore::new(self.policy.concurrency_limit.max(1)));
        let throttle = Arc::new(StartThrottle::new(self.policy.min_spacing));
        let mut identities = Vec::with_capacity(total);
        let mut set = JoinSet::new();

        for (index, target) in targets.into_iter().enumerate() {
            identities.push((
                target.source.clone(),
                target.post_id.clone(),
                target.variants.first().cloned().unwrap_or_default(),
            ));
            let driver = Arc::clone(&self.driver);
            let policy = self.policy.clone();
            let limit = Arc::clone(&limit);
            let throttle = Arc::clone(&throttle);
            let span = info_span!("fetch_target", source = %target.source, post_id = %target.post_id);
            set.spawn(
                async move {
                    let _permit = limit.acquire_owned().await.expect("semaphore not closed");
                    throttle.wait_turn().await;
                    (index, fetch_target(driver.as_ref(), &policy, target).await)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<FetchOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(err) => warn!(error = %err, "fetch task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(identities)
            .map(|(slot, (source_name, post_id, last_url))| {
                slot.unwrap_or_else(|| {
                    Err(FetchFailure {
                        source_name,
                        post_id,
                        last_url,
                        error: "fetch task aborted".to_string(),
                    })
                })
            })
            .collect()
    }
}

async fn fetch_target(
    driver: &dyn BrowserDriver,
    policy: &FetchPolicy,
    target: FetchTarget,
) -> FetchOutcome {
    let variant_count = target.variants.len();
    let mut state = FetchState::Pending.begin(variant_count);
    let mut last_url = target.variants.first().cloned().unwrap_or_default();
    let mut last_error = "no url variants".to_string();
    let mut attempts = 0usize;

    while let FetchState::Attempting { variant, attempt } = state {
        if attempt > 1 {
            tokio::time::sleep(policy.retry_pause).await;
        }
        attempts += 1;
        let url = &target.variants[variant];
        last_url = url.clone();
        match load_page(driver, policy, url, target.ready_selector.as_deref()).await {
            Ok(html) => {
                state = state.succeed();
                debug!(%url, variant, attempt, ?state, "fetched");
                return Ok(FetchedPage {
                    source: target.source,
                    post_id: target.post_id,
                    url: url.clone(),
                    html,
                    variant,
                    attempts,
                });
            }
            Err(err) => {
                debug!(%url, variant, attempt, error = %err, "fetch attempt failed");
                last_error = err.to_string();
                state = state.fail(variant_count, policy.max_attempts);
            }
        }
    }

    warn!(source = %target.source, post_id = %target.post_id, url = %last_url, error = %last_error, "fetch exhausted");
    Err(FetchFailure {
        source_name: target.source,
        post_id: target.post_id,
        last_url,
        error: last_error,
    })
}

/// An open page that gets closed on every path out, including a cancelled or
/// panicking fetch task. Those paths cannot await, so the close is handed to
/// the runtime.
struct PageLease {
    page: Option<Box<dyn BrowserPage>>,
}

impl PageLease {
    async fn drive(
        &mut self,
        policy: &FetchPolicy,
        url: &str,
        ready_selector: Option<&str>,
    ) -> Result<String, AdapterError> {
        match self.page.as_deref_mut() {
            Some(page) => drive_page(page, policy, url, ready_selector).await,
            None => Err(AdapterError::Message("page already released".to_string())),
        }
    }

    async fn release(mut self) {
        if let Some(page) = self.page.take() {
            page.close().await;
        }
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { page.close().await });
            }
            Err(_) => warn!("no runtime left to close an abandoned page"),
        }
    }
}

/// One attempt on one URL.
async fn load_page(
    driver: &dyn BrowserDriver,
    policy: &FetchPolicy,
    url: &str,
    ready_selector: Option<&str>,
) -> Result<String, AdapterError> {
    let mut lease = PageLease {
        page: Some(driver.open_page().await?),
    };
    let result = lease.drive(policy, url, ready_selector).await;
    lease.release().await;
    result
}

async fn drive_page(
    page: &mut dyn BrowserPage,
    policy: &FetchPolicy,
    url: &str,
    ready_selector: Option<&str>,
) -> Result<String, AdapterError> {
    tokio::time::timeout(policy.page_timeout, page.goto(url, policy.page_timeout))
        .await
        .map_err(|_| AdapterError::Timeout(policy.page_timeout))??;

    if let Some(selector) = ready_selector {
        let waited = tokio::time::timeout(
            policy.content_wait,
            page.wait_for_content(selector, policy.content_wait),
        )
        .await;
        match waited {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) | Err(_) => {
                warn!(url, selector, "content did not appear before the wait expired");
            }
            Ok(Err(err)) => warn!(url, selector, error = %err, "content wait failed"),
        }
    }

    page.content().await
}
