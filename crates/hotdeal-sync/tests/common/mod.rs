#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hotdeal_adapters::{
    AdapterError, BrowserDriver, BrowserPage, DetailSelectors, ListingSource,
    PassthroughThumbnailCache, SelectorDetailExtractor, TableShopNameNormalizer,
};
use hotdeal_core::ListItem;
use hotdeal_storage::MemoryStore;
use hotdeal_sync::category::{load_category_rules, SubcategoryClassifier};
use hotdeal_sync::reconcile::DealReconciler;
use hotdeal_sync::runtime::seed_memory_store;
use hotdeal_sync::{CategoryResolver, CrawlPipeline, CrawlSource, FetchPolicy, PageFetcher, UrlVariants};

pub const DESKTOP: &str = "https://www.ppomppu.co.kr";
pub const MOBILE: &str = "https://m.ppomppu.co.kr";

#[derive(Debug, Clone)]
pub enum Step {
    Html(String),
    Fail,
    /// Never finishes loading.
    Hang,
    Slow(Duration, String),
}

#[derive(Default)]
struct DriverState {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    visits: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Serves scripted responses per URL. The last step of a script repeats;
/// unscripted URLs fail.
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    state: Arc<DriverState>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, steps: Vec<Step>) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.visits.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &str) -> Step {
        let mut scripts = self.state.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or(Step::Fail),
            Some(steps) => steps.front().cloned().unwrap_or(Step::Fail),
            None => Step::Fail,
        }
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, AdapterError> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            driver: self.clone(),
            body: None,
        }))
    }
}

struct ScriptedPage {
    driver: ScriptedDriver,
    body: Option<String>,
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<(), AdapterError> {
        self.driver.state.visits.lock().unwrap().push(url.to_string());
        match self.driver.next_step(url) {
            Step::Html(html) => {
                self.body = Some(html);
                Ok(())
            }
            Step::Slow(delay, html) => {
                tokio::time::sleep(delay).await;
                self.body = Some(html);
                Ok(())
            }
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Step::Fail => Err(AdapterError::Navigation {
                url: url.to_string(),
                reason: "scripted failure".into(),
            }),
        }
    }

    async fn wait_for_content(&mut self, selector: &str, _timeout: Duration) -> Result<bool, AdapterError> {
        Ok(self.body.as_deref().is_some_and(|b| b.contains(selector)))
    }

    async fn content(&mut self) -> Result<String, AdapterError> {
        self.body
            .clone()
            .ok_or_else(|| AdapterError::Malformed("no body".into()))
    }

    async fn close(self: Box<Self>) {
        self.driver.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A listing that always yields the same rows.
pub struct StaticListing {
    pub source: String,
    pub items: Vec<ListItem>,
}

#[async_trait]
impl ListingSource for StaticListing {
    fn source(&self) -> &str {
        &self.source
    }

    async fn list_items(&self) -> Result<Vec<ListItem>, AdapterError> {
        Ok(self.items.clone())
    }
}

pub fn post_url(no: &str) -> String {
    format!("{DESKTOP}/zboard/view.php?id=ppomppu&no={no}")
}

pub fn mobile_url(no: &str) -> String {
    format!("{MOBILE}/zboard/view.php?id=ppomppu&no={no}")
}

pub fn list_item(no: &str, title: &str) -> ListItem {
    ListItem {
        source: "ppomppu".into(),
        source_post_id: no.into(),
        post_url: post_url(no),
        title: title.into(),
        ..Default::default()
    }
}

pub fn detail_html(title: &str, price: &str, shipping: &str, deal_url: &str, views: u32) -> String {
    format!(
        r#"<html><body><div class="post">
             <h1 class="title">{title}</h1>
             <span class="price">{price}</span><span class="ship">{shipping}</span>
             <a class="deal" href="{deal_url}">buy</a>
             <span class="views">조회 {views}</span><span class="votes">추천 3</span><span class="comments">댓글 1</span>
           </div></body></html>"#
    )
}

pub fn detail_selectors() -> DetailSelectors {
    DetailSelectors {
        required: Some(".post".into()),
        title: Some("h1.title".into()),
        price: Some(".price".into()),
        shipping: Some(".ship".into()),
        deal_url: Some("a.deal".into()),
        views: Some(".views".into()),
        votes: Some(".votes".into()),
        comments: Some(".comments".into()),
        category_key_attr: "data-category".into(),
        ..Default::default()
    }
}

pub fn policy() -> FetchPolicy {
    FetchPolicy {
        concurrency_limit: 2,
        min_spacing: Duration::from_millis(10),
        max_attempts: 2,
        retry_pause: Duration::from_millis(50),
        page_timeout: Duration::from_secs(5),
        content_wait: Duration::from_secs(1),
    }
}

pub fn variants() -> UrlVariants {
    UrlVariants::new(DESKTOP, None, Some(MOBILE), Vec::new())
}

pub async fn seeded_store() -> MemoryStore {
    let rules = load_category_rules(None).unwrap();
    seed_memory_store(&rules, "기타").await
}

pub async fn build_pipeline(store: &MemoryStore, driver: &ScriptedDriver, items: Vec<ListItem>) -> CrawlPipeline {
    let default_id = store.ensure_category("기타").await;
    let reconciler = DealReconciler::new(
        CategoryResolver::new(load_category_rules(None).unwrap(), default_id),
        SubcategoryClassifier::load(None).unwrap(),
    );
    CrawlPipeline::new(
        Arc::new(store.clone()),
        PageFetcher::new(Arc::new(driver.clone()), policy()),
        vec![CrawlSource {
            listing: Arc::new(StaticListing {
                source: "ppomppu".into(),
                items,
            }),
            extractor: Arc::new(SelectorDetailExtractor::new(detail_selectors())),
            variants: variants(),
            ready_selector: None,
        }],
        reconciler,
        Arc::new(TableShopNameNormalizer::from_yaml_str("global:\n  쿠팡: 쿠팡\n").unwrap()),
        Arc::new(PassthroughThumbnailCache),
    )
}
