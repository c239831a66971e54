//! Builds the batch stages from a validated [`PipelineConfig`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hotdeal_adapters::{
    ArtifactThumbnailCache, BrowserDriver, DetailExtractor, FixtureListingSource,
    HttpBrowserDriver, ListingSource, PassthroughThumbnailCache, SelectorDetailExtractor,
    SelectorListingSource, ShopNameNormalizer, TableShopNameNormalizer,
    TemplateAffiliateTransformer, ThumbnailCache,
};
use hotdeal_storage::{ArtifactStore, BackoffPolicy, DealStore, HttpFetcher, HttpFetcherConfig, MemoryStore, PgStore};
use tracing::info;

use crate::affiliate::AffiliateConverter;
use crate::category::{load_category_rules, CategoryResolver, CategoryRule, SubcategoryClassifier};
use crate::config::{PipelineConfig, SourceSettings};
use crate::fetcher::PageFetcher;
use crate::pipeline::{CrawlPipeline, CrawlSource};
use crate::reconcile::DealReconciler;
use crate::refresh::{RefreshPass, RefreshSource};

/// Shared network clients for one process.
pub struct Clients {
    pub http: Arc<HttpFetcher>,
    pub driver: Arc<dyn BrowserDriver>,
}

impl Clients {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let fetch = &config.fetch;
        let http = HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_millis(fetch.timeout_ms),
            user_agent: Some(config.user_agent.clone()),
            global_concurrency: fetch.concurrency_limit,
            per_source_concurrency: fetch.concurrency_limit,
            min_spacing: Duration::from_millis(fetch.min_spacing_ms),
            backoff: BackoffPolicy {
                attempts: u32::try_from(fetch.max_retries).unwrap_or(u32::MAX),
                first_pause: Duration::from_millis(fetch.retry_pause_ms),
                ..BackoffPolicy::default()
            },
        })?;
        let driver = HttpBrowserDriver::new(&config.user_agent).context("building page driver")?;
        Ok(Self {
            http: Arc::new(http),
            driver: Arc::new(driver),
        })
    }
}

/// Opens Postgres, or an in-memory store seeded with the rule categories on dry runs.
///
/// On a dry run `config.default_category_id` is repointed at the seeded default category.
pub async fn open_store(config: &mut PipelineConfig, dry_run: bool) -> Result<Arc<dyn DealStore>> {
    if dry_run {
        let rules = load_category_rules(config.rules.categories.as_deref())?;
        let store = seed_memory_store(&rules, &config.default_category_name).await;
        config.default_category_id = store.ensure_category(&config.default_category_name).await;
        info!(categories = store.tables().await.categories.len(), "dry run against in-memory store");
        return Ok(Arc::new(store));
    }
    let url = config
        .database_url
        .as_deref()
        .context("database_url is required outside dry runs")?;
    let store = PgStore::connect(url, 5)
        .await
        .context("connecting to postgres")?;
    Ok(Arc::new(store))
}

pub async fn seed_memory_store(rules: &[CategoryRule], default_category: &str) -> MemoryStore {
    let store = MemoryStore::new();
    store.ensure_category(default_category).await;
    for rule in rules {
        store.ensure_category(rule.category()).await;
    }
    store
}

fn detail_extractor(source: &SourceSettings) -> Arc<dyn DetailExtractor> {
    Arc::new(SelectorDetailExtractor::new(source.detail.clone()))
}

fn listing(source: &SourceSettings, http: &Arc<HttpFetcher>) -> Result<Arc<dyn ListingSource>> {
    if let Some(path) = &source.fixture {
        return Ok(Arc::new(FixtureListingSource::new(&source.source, path)));
    }
    let selectors = source
        .list
        .clone()
        .with_context(|| format!("source {} has no list selectors", source.source))?;
    Ok(Arc::new(SelectorListingSource::new(
        &source.source,
        source.list_urls.clone(),
        selectors,
        Arc::clone(http),
    )))
}

fn shop_normalizer(config: &PipelineConfig) -> Result<Arc<dyn ShopNameNormalizer>> {
    Ok(match &config.shop_aliases {
        Some(path) => Arc::new(TableShopNameNormalizer::from_path(path)?),
        None => Arc::new(TableShopNameNormalizer::default()),
    })
}

fn thumbnail_cache(config: &PipelineConfig, http: &Arc<HttpFetcher>) -> Arc<dyn ThumbnailCache> {
    match &config.thumbnails {
        Some(settings) => Arc::new(ArtifactThumbnailCache::new(
            Arc::clone(http),
            ArtifactStore::new(settings.dir.clone()),
            settings.public_base.clone(),
        )),
        None => Arc::new(PassthroughThumbnailCache),
    }
}

pub fn build_crawl_pipeline(
    config: &PipelineConfig,
    store: Arc<dyn DealStore>,
    clients: &Clients,
) -> Result<CrawlPipeline> {
    let rules = load_category_rules(config.rules.categories.as_deref())?;
    let subcategories = SubcategoryClassifier::load(config.rules.subcategories.as_deref())?;
    let reconciler = DealReconciler::new(
        CategoryResolver::new(rules, config.default_category_id),
        subcategories,
    );

    let sources = config
        .enabled_sources()
        .map(|source| {
            Ok(CrawlSource {
                listing: listing(source, &clients.http)?,
                extractor: detail_extractor(source),
                variants: source.url_variants(),
                ready_selector: source.ready_selector.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CrawlPipeline::new(
        store,
        PageFetcher::new(Arc::clone(&clients.driver), config.fetch.policy()),
        sources,
        reconciler,
        shop_normalizer(config)?,
        thumbnail_cache(config, &clients.http),
    ))
}

pub fn build_refresh_pass(
    config: &PipelineConfig,
    store: Arc<dyn DealStore>,
    clients: &Clients,
) -> RefreshPass {
    let sources: HashMap<String, RefreshSource> = config
        .enabled_sources()
        .map(|source| {
            (
                source.source.clone(),
                RefreshSource {
                    extractor: detail_extractor(source),
                    variants: source.url_variants(),
                    ready_selector: source.ready_selector.clone(),
                },
            )
        })
        .collect();
    RefreshPass::new(
        store,
        PageFetcher::new(Arc::clone(&clients.driver), config.fetch.policy()),
        sources,
        chrono::Duration::hours(config.refresh_window_hours),
        config.batch_sizes.refresh,
    )
}

pub fn build_affiliate_converter(
    config: &PipelineConfig,
    store: Arc<dyn DealStore>,
) -> Result<AffiliateConverter> {
    let settings = config
        .affiliate
        .clone()
        .context("config has no affiliate section")?;
    let transformer = TemplateAffiliateTransformer::new(settings)?;
    Ok(AffiliateConverter::new(
        store,
        Arc::new(transformer),
        config.batch_sizes.affiliate,
    ))
}
