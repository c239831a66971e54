//! Metric refresh pass: re-read recent posts and append fresh snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use hotdeal_adapters::DetailExtractor;
use hotdeal_core::{DetailFields, RefreshTarget};
use hotdeal_storage::{DealStore, StoreResult};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::fetcher::{FetchTarget, PageFetcher, UrlVariants};
use crate::history::{archive_raw, raw_payload, record_metrics};
use crate::normalize::{is_sold_out, parse_price};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub targets: usize,
    pub fetched: usize,
    pub detail_failures: usize,
    pub refreshed: usize,
    pub parser_failures: usize,
    pub persist_failures: usize,
}

/// Per-source pieces the refresh pass needs to re-read a post.
#[derive(Clone)]
pub struct RefreshSource {
    pub extractor: Arc<dyn DetailExtractor>,
    pub variants: UrlVariants,
    pub ready_selector: Option<String>,
}

pub struct RefreshPass {
    store: Arc<dyn DealStore>,
    fetcher: PageFetcher,
    sources: HashMap<String, RefreshSource>,
    window: Duration,
    batch_size: usize,
}

impl RefreshPass {
    pub fn new(
        store: Arc<dyn DealStore>,
        fetcher: PageFetcher,
        sources: HashMap<String, RefreshSource>,
        window: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            fetcher,
            sources,
            window,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run_once(&self) -> Result<RefreshSummary> {
        let run_id = Uuid::new_v4();
        self.run_at(Utc::now())
            .instrument(info_span!("refresh_pass", %run_id))
            .await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RefreshSummary> {
        let since = now - self.window;
        let mut summary = RefreshSummary::default();
        let mut after = 0;
        loop {
            let batch = self
                .store
                .refresh_targets(since, after, self.batch_size)
                .await
                .context("loading refresh targets")?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.deal_source_id;
            let full = batch.len() == self.batch_size;
            self.refresh_batch(batch, now, &mut summary).await;
            if !full {
                break;
            }
        }
        info!(
            targets = summary.targets,
            fetched = summary.fetched,
            detail_failures = summary.detail_failures,
            refreshed = summary.refreshed,
            parser_failures = summary.parser_failures,
            persist_failures = summary.persist_failures,
            "refresh pass finished"
        );
        Ok(summary)
    }

    async fn refresh_batch(
        &self,
        batch: Vec<RefreshTarget>,
        now: DateTime<Utc>,
        summary: &mut RefreshSummary,
    ) {
        let mut known = Vec::with_capacity(batch.len());
        for target in batch {
            if self.sources.contains_key(&target.source) {
                known.push(target);
            } else {
                warn!(source = %target.source, post_id = %target.source_post_id, "no refresh settings for source");
            }
        }
        summary.targets += known.len();

        let fetch_targets = known
            .iter()
            .map(|t| {
                let source = &self.sources[&t.source];
                FetchTarget {
                    source: t.source.clone(),
                    post_id: t.source_post_id.clone(),
                    variants: source.variants.expand(&t.post_url, &t.source_post_id),
                    ready_selector: source.ready_selector.clone(),
                }
            })
            .collect();
        let outcomes = self.fetcher.fetch_all(fetch_targets).await;

        for (target, outcome) in known.iter().zip(outcomes) {
            let page = match outcome {
                Ok(page) => page,
                Err(_) => {
                    summary.detail_failures += 1;
                    continue;
                }
            };
            summary.fetched += 1;

            let detail = match self.sources[&target.source]
                .extractor
                .extract(&target.source, &page.html)
            {
                Ok(detail) => detail,
                Err(err) => {
                    warn!(source = %target.source, post_id = %target.source_post_id, url = %page.url, error = %err, "refresh parse failed");
                    summary.parser_failures += 1;
                    continue;
                }
            };

            match self.persist(target, &page.url, &detail, now).await {
                Ok(()) => summary.refreshed += 1,
                Err(err) => {
                    warn!(source = %target.source, post_id = %target.source_post_id, url = %page.url, error = %err, "refresh persist failed");
                    summary.persist_failures += 1;
                }
            }
        }
    }

    async fn persist(
        &self,
        target: &RefreshTarget,
        page_url: &str,
        detail: &DetailFields,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let sold_out = is_sold_out([
            detail.title.as_deref().unwrap_or_default(),
            detail.summary_text.as_deref().unwrap_or_default(),
        ]);
        let price = detail.price.as_deref().and_then(parse_price);

        let mut tx = self.store.begin().await?;
        record_metrics(tx.as_mut(), target.deal_id, &target.source, detail, now).await?;
        tx.update_deal_status(target.deal_id, sold_out, price, now).await?;
        archive_raw(
            tx.as_mut(),
            &target.source,
            &target.source_post_id,
            raw_payload(None, page_url, detail),
            now,
        )
        .await?;
        tx.commit().await
    }
}
