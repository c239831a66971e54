//! Crawl orchestration: list, fetch, extract, reconcile.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use hotdeal_adapters::{AdapterError, DetailExtractor, ListingSource, ShopNameNormalizer, ThumbnailCache};
use hotdeal_core::{DealId, ListItem};
use hotdeal_storage::{DealStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::fetcher::{FetchTarget, FetchedPage, PageFetcher, UrlVariants};
use crate::history::raw_payload;
use crate::reconcile::{draft_deal, DealReconciler};

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("parse failed: {0}")]
    Parse(#[from] AdapterError),
    #[error("persist failed: {0}")]
    Persist(#[from] StoreError),
}

/// What happened to one fetched item.
#[derive(Debug)]
pub enum ItemOutcome {
    Processed { deal_id: DealId, created: bool },
    Skipped(String),
    ParseFailed(ItemError),
    PersistFailed(ItemError),
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: usize,
    pub fetched: usize,
    pub detail_failures: usize,
    pub processed: usize,
    /// Of `processed`, how many created a new deal.
    pub created: usize,
    pub skipped: usize,
    pub parser_failures: usize,
    pub persist_failures: usize,
    /// Sources whose listing could not be read at all.
    pub listing_failures: usize,
}

impl CrawlSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            targets: 0,
            fetched: 0,
            detail_failures: 0,
            processed: 0,
            created: 0,
            skipped: 0,
            parser_failures: 0,
            persist_failures: 0,
            listing_failures: 0,
        }
    }

    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Processed { created, .. } => {
                self.processed += 1;
                if *created {
                    self.created += 1;
                }
            }
            ItemOutcome::Skipped(_) => self.skipped += 1,
            ItemOutcome::ParseFailed(_) => self.parser_failures += 1,
            ItemOutcome::PersistFailed(_) => self.persist_failures += 1,
        }
    }
}

/// One board as the crawler sees it.
pub struct CrawlSource {
    pub listing: Arc<dyn ListingSource>,
    pub extractor: Arc<dyn DetailExtractor>,
    pub variants: UrlVariants,
    pub ready_selector: Option<String>,
}

pub struct CrawlPipeline {
    store: Arc<dyn DealStore>,
    fetcher: PageFetcher,
    sources: Vec<CrawlSource>,
    reconciler: DealReconciler,
    shops: Arc<dyn ShopNameNormalizer>,
    thumbnails: Arc<dyn ThumbnailCache>,
}

impl CrawlPipeline {
    pub fn new(
        store: Arc<dyn DealStore>,
        fetcher: PageFetcher,
        sources: Vec<CrawlSource>,
        reconciler: DealReconciler,
        shops: Arc<dyn ShopNameNormalizer>,
        thumbnails: Arc<dyn ThumbnailCache>,
    ) -> Self {
        Self {
            store,
            fetcher,
            sources,
            reconciler,
            shops,
            thumbnails,
        }
    }

    pub async fn run_once(&self) -> Result<CrawlSummary> {
        let run_id = Uuid::new_v4();
        let summary = self
            .run(CrawlSummary::new(run_id, Utc::now()))
            .instrument(info_span!("crawl", %run_id))
            .await;
        info!(
            targets = summary.targets,
            fetched = summary.fetched,
            detail_failures = summary.detail_failures,
            processed = summary.processed,
            skipped = summary.skipped,
            parser_failures = summary.parser_failures,
            persist_failures = summary.persist_failures,
            "crawl finished"
        );
        Ok(summary)
    }

    async fn run(&self, mut summary: CrawlSummary) -> CrawlSummary {
        let mut seen = HashSet::new();
        let mut work: Vec<(usize, ListItem)> = Vec::new();

        for (index, source) in self.sources.iter().enumerate() {
            let items = match source.listing.list_items().await {
                Ok(items) => items,
                Err(err) => {
                    warn!(source = source.listing.source(), error = %err, "listing failed");
                    summary.listing_failures += 1;
                    continue;
                }
            };
            for mut item in items {
                if item.source.is_empty() {
                    item.source = source.listing.source().to_string();
                }
                if !seen.insert((item.source.clone(), item.source_post_id.clone())) {
                    debug!(source = %item.source, post_id = %item.source_post_id, "duplicate list row");
                    summary.skipped += 1;
                    continue;
                }
                work.push((index, item));
            }
        }
        summary.targets = work.len();

        let targets = work
            .iter()
            .map(|(index, item)| {
                let source = &self.sources[*index];
                FetchTarget {
                    source: item.source.clone(),
                    post_id: item.source_post_id.clone(),
                    variants: source.variants.expand(&item.post_url, &item.source_post_id),
                    ready_selector: source.ready_selector.clone(),
                }
            })
            .collect();
        let outcomes = self.fetcher.fetch_all(targets).await;

        for ((index, item), outcome) in work.iter().zip(outcomes) {
            match outcome {
                Ok(page) => {
                    summary.fetched += 1;
                    let outcome = self
                        .process(self.sources[*index].extractor.as_ref(), item, &page)
                        .await;
                    if let ItemOutcome::ParseFailed(err) | ItemOutcome::PersistFailed(err) = &outcome {
                        warn!(source = %item.source, post_id = %item.source_post_id, url = %page.url, error = %err, "item failed");
                    }
                    summary.record(&outcome);
                }
                Err(failure) => {
                    warn!(source = %item.source, post_id = %item.source_post_id, url = %failure.last_url, error = %failure.error, "detail fetch failed");
                    summary.detail_failures += 1;
                }
            }
        }

        summary.finished_at = Utc::now();
        summary
    }

    /// Extract, normalize and persist one fetched post.
    pub async fn process(
        &self,
        extractor: &dyn DetailExtractor,
        item: &ListItem,
        page: &FetchedPage,
    ) -> ItemOutcome {
        let detail = match extractor.extract(&item.source, &page.html) {
            Ok(detail) => detail,
            Err(err) => return ItemOutcome::ParseFailed(err.into()),
        };
        let mut draft = match draft_deal(item, &detail, &page.url, self.shops.as_ref()) {
            Ok(draft) => draft,
            Err(reason) => {
                debug!(source = %item.source, post_id = %item.source_post_id, %reason, "item skipped");
                return ItemOutcome::Skipped(reason);
            }
        };

        if let Some(original) = draft.thumbnail_url.clone() {
            match self.thumbnails.cache(&item.source, &original).await {
                Ok(cached) => draft.thumbnail_url = Some(cached),
                Err(err) => {
                    warn!(source = %item.source, post_id = %item.source_post_id, url = %original, error = %err, "thumbnail cache failed; keeping original url");
                }
            }
        }

        let payload = raw_payload(Some(item), &page.url, &detail);
        match self
            .reconciler
            .persist(self.store.as_ref(), &draft, &detail, payload, Utc::now())
            .await
        {
            Ok(reconciled) => ItemOutcome::Processed {
                deal_id: reconciled.deal_id,
                created: reconciled.created,
            },
            Err(err) => ItemOutcome::PersistFailed(err.into()),
        }
    }
}
