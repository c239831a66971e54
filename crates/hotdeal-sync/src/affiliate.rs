//! Affiliate conversion pass over the link ledger.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use hotdeal_adapters::AffiliateTransformer;
use hotdeal_core::AffiliateCandidate;
use hotdeal_storage::{DealStore, StoreResult};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ledger::record_affiliate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffiliateSummary {
    pub candidates: usize,
    pub converted: usize,
    /// Transformer refusals, unchanged URLs, and deals converted concurrently.
    pub skipped: usize,
    /// Storage errors; the candidate stays eligible for the next pass.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Conversion {
    Converted,
    Skipped(String),
}

pub struct AffiliateConverter {
    store: Arc<dyn DealStore>,
    transformer: Arc<dyn AffiliateTransformer>,
    batch_size: usize,
}

impl AffiliateConverter {
    pub fn new(
        store: Arc<dyn DealStore>,
        transformer: Arc<dyn AffiliateTransformer>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            transformer,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run_once(&self) -> Result<AffiliateSummary> {
        let run_id = Uuid::new_v4();
        self.run_batches()
            .instrument(info_span!("affiliate_pass", %run_id))
            .await
    }

    async fn run_batches(&self) -> Result<AffiliateSummary> {
        let mut summary = AffiliateSummary::default();
        let mut after = 0;
        loop {
            let batch = self
                .store
                .affiliate_candidates(after, self.batch_size)
                .await
                .context("loading affiliate candidates")?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.link_id;
            let full = batch.len() == self.batch_size;

            for candidate in &batch {
                summary.candidates += 1;
                match self.convert(candidate).await {
                    Ok(Conversion::Converted) => summary.converted += 1,
                    Ok(Conversion::Skipped(reason)) => {
                        debug!(deal_id = candidate.deal_id, url = %candidate.url, %reason, "affiliate skipped");
                        summary.skipped += 1;
                    }
                    Err(err) => {
                        warn!(deal_id = candidate.deal_id, url = %candidate.url, error = %err, "affiliate conversion failed");
                        summary.failed += 1;
                    }
                }
            }
            if !full {
                break;
            }
        }
        info!(
            candidates = summary.candidates,
            converted = summary.converted,
            skipped = summary.skipped,
            failed = summary.failed,
            "affiliate pass finished"
        );
        Ok(summary)
    }

    async fn convert(&self, candidate: &AffiliateCandidate) -> StoreResult<Conversion> {
        let affiliate_url = match self.transformer.transform(&candidate.url).await {
            Ok(url) if url == candidate.url => {
                return Ok(Conversion::Skipped("transformer returned the original url".into()))
            }
            Ok(url) => url,
            Err(err) => return Ok(Conversion::Skipped(err.to_string())),
        };

        let mut tx = self.store.begin().await?;
        // The lock serializes concurrent passes on the same deal; the re-check
        // sees any affiliate row committed before it was granted.
        tx.lock_deal(candidate.deal_id).await?;
        if tx.has_affiliate_link(candidate.deal_id).await? {
            tx.rollback().await?;
            return Ok(Conversion::Skipped("deal already has an affiliate link".into()));
        }
        if !record_affiliate(tx.as_mut(), candidate.deal_id, &affiliate_url, Utc::now()).await? {
            tx.rollback().await?;
            return Ok(Conversion::Skipped("affiliate url already recorded".into()));
        }
        tx.commit().await?;
        Ok(Conversion::Converted)
    }
}
