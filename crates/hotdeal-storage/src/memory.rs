//! In-memory backend for dry runs and tests.
//!
//! A transaction takes the store lock for its whole lifetime and writes straight
//! into the tables. It keeps an undo log (table lengths at `begin` plus the first
//! image of every row it rewrites), so dropping it without a commit puts the
//! tables back and commit costs nothing. Unique keys mirror
//! `migrations/0001_init.sql`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotdeal_core::{
    AffiliateCandidate, CategoryId, CategoryMapping, Deal, DealFields, DealId, DealSource,
    DealSourceFields, LinkId, MetricSnapshot, NewMetricSnapshot, NewRawRecord, PurchaseLink,
    RawRecord, RefreshTarget, SourceCategory, SourceCategoryId, StandardCategory,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{DealStore, StoreError, StoreResult, StoreTx};

/// Committed contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub categories: Vec<StandardCategory>,
    pub source_categories: Vec<SourceCategory>,
    pub mappings: Vec<CategoryMapping>,
    pub deals: Vec<Deal>,
    pub deal_sources: Vec<DealSource>,
    pub purchase_links: Vec<PurchaseLink>,
    pub metric_snapshots: Vec<MetricSnapshot>,
    pub raw_records: Vec<RawRecord>,
    last_id: i64,
}

impl MemoryTables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn deal_mut(&mut self, id: DealId) -> StoreResult<&mut Deal> {
        self.deals
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("deal {id}")))
    }

    fn check_post_url_free(&self, fields: &DealSourceFields, except_id: Option<i64>) -> StoreResult<()> {
        let taken = self.deal_sources.iter().any(|ds| {
            Some(ds.id) != except_id && ds.source == fields.source && ds.post_url == fields.post_url
        });
        if taken {
            return Err(StoreError::Conflict(format!(
                "deal source: post url {} already registered for {}",
                fields.post_url, fields.source
            )));
        }
        Ok(())
    }
}

/// What a [`MemoryTx`] needs to undo its writes.
#[derive(Debug, Default)]
struct UndoLog {
    last_id: i64,
    source_categories: usize,
    deals: usize,
    deal_sources: usize,
    purchase_links: usize,
    metric_snapshots: usize,
    raw_records: usize,
    touched_source_categories: Vec<SourceCategory>,
    touched_deals: Vec<Deal>,
    touched_deal_sources: Vec<DealSource>,
}

impl UndoLog {
    fn mark(tables: &MemoryTables) -> Self {
        Self {
            last_id: tables.last_id,
            source_categories: tables.source_categories.len(),
            deals: tables.deals.len(),
            deal_sources: tables.deal_sources.len(),
            purchase_links: tables.purchase_links.len(),
            metric_snapshots: tables.metric_snapshots.len(),
            raw_records: tables.raw_records.len(),
            ..Self::default()
        }
    }

    fn restore(self, tables: &mut MemoryTables) {
        tables.last_id = self.last_id;
        restore_rows(
            &mut tables.source_categories,
            self.source_categories,
            self.touched_source_categories,
            |c| c.id,
        );
        restore_rows(&mut tables.deals, self.deals, self.touched_deals, |d| d.id);
        restore_rows(
            &mut tables.deal_sources,
            self.deal_sources,
            self.touched_deal_sources,
            |ds| ds.id,
        );
        tables.purchase_links.truncate(self.purchase_links);
        tables.metric_snapshots.truncate(self.metric_snapshots);
        tables.raw_records.truncate(self.raw_records);
    }
}

/// Saves the first image of `row` seen by this transaction.
fn remember<T: Clone>(saved: &mut Vec<T>, row: &T, id: fn(&T) -> i64) {
    if !saved.iter().any(|s| id(s) == id(row)) {
        saved.push(row.clone());
    }
}

fn restore_rows<T>(rows: &mut Vec<T>, len: usize, saved: Vec<T>, id: fn(&T) -> i64) {
    rows.truncate(len);
    for original in saved {
        if let Some(row) = rows.iter_mut().find(|r| id(r) == id(&original)) {
            *row = original;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ensure_category(&self, name: &str) -> CategoryId {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.categories.iter().find(|c| c.name == name) {
            return existing.id;
        }
        let id = tables.next_id();
        tables.categories.push(StandardCategory {
            id,
            name: name.to_string(),
        });
        id
    }

    pub async fn map_category(
        &self,
        source_category_id: SourceCategoryId,
        category_id: CategoryId,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let clash = tables.mappings.iter().any(|m| {
            m.source_category_id == source_category_id || m.category_id == category_id
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "category mapping: {source_category_id} -> {category_id} breaks the 1:1 bridge"
            )));
        }
        tables.mappings.push(CategoryMapping {
            source_category_id,
            category_id,
        });
        Ok(())
    }

    pub async fn unmap_category(&self, source_category_id: SourceCategoryId) -> bool {
        let mut tables = self.tables.lock().await;
        let before = tables.mappings.len();
        tables
            .mappings
            .retain(|m| m.source_category_id != source_category_id);
        tables.mappings.len() != before
    }

    /// Copy of the committed tables.
    pub async fn tables(&self) -> MemoryTables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tables = self.tables.clone().lock_owned().await;
        let undo = UndoLog::mark(&tables);
        Ok(Box::new(MemoryTx {
            tables,
            undo,
            committed: false,
        }))
    }

    async fn affiliate_candidates(
        &self,
        after_link_id: LinkId,
        limit: usize,
    ) -> StoreResult<Vec<AffiliateCandidate>> {
        let tables = self.tables.lock().await;
        let mut candidates: Vec<_> = tables
            .purchase_links
            .iter()
            .filter(|link| !link.is_affiliate && link.id > after_link_id)
            .filter(|link| {
                !tables
                    .purchase_links
                    .iter()
                    .any(|other| other.deal_id == link.deal_id && other.is_affiliate)
            })
            .map(|link| AffiliateCandidate {
                link_id: link.id,
                deal_id: link.deal_id,
                url: link.url.clone(),
                domain: link.domain.clone(),
            })
            .collect();
        candidates.sort_by_key(|c| c.link_id);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn refresh_targets(
        &self,
        created_since: DateTime<Utc>,
        after_deal_source_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RefreshTarget>> {
        let tables = self.tables.lock().await;
        let mut targets: Vec<_> = tables
            .deal_sources
            .iter()
            .filter(|ds| ds.id > after_deal_source_id)
            .filter(|ds| {
                tables
                    .deals
                    .iter()
                    .any(|d| d.id == ds.deal_id && d.created_at >= created_since)
            })
            .map(|ds| RefreshTarget {
                deal_source_id: ds.id,
                deal_id: ds.deal_id,
                source: ds.source.clone(),
                source_post_id: ds.source_post_id.clone(),
                post_url: ds.post_url.clone(),
            })
            .collect();
        targets.sort_by_key(|t| t.deal_source_id);
        targets.truncate(limit);
        Ok(targets)
    }

    async fn deal(&self, id: DealId) -> StoreResult<Option<Deal>> {
        let tables = self.tables.lock().await;
        Ok(tables.deals.iter().find(|d| d.id == id).cloned())
    }

    async fn purchase_links(&self, deal_id: DealId) -> StoreResult<Vec<PurchaseLink>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .purchase_links
            .iter()
            .filter(|l| l.deal_id == deal_id)
            .cloned()
            .collect())
    }

    async fn metric_snapshots(&self, deal_id: DealId) -> StoreResult<Vec<MetricSnapshot>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .metric_snapshots
            .iter()
            .filter(|m| m.deal_id == deal_id)
            .cloned()
            .collect())
    }

    async fn recent_raw_records(
        &self,
        source: &str,
        source_post_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<RawRecord>> {
        let tables = self.tables.lock().await;
        let mut records: Vec<_> = tables
            .raw_records
            .iter()
            .filter(|r| r.source == source && r.source_post_id == source_post_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.crawled_at.cmp(&a.crawled_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }
}

pub struct MemoryTx {
    tables: OwnedMutexGuard<MemoryTables>,
    undo: UndoLog,
    committed: bool,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.committed {
            std::mem::take(&mut self.undo).restore(&mut self.tables);
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn upsert_source_category(
        &mut self,
        source: &str,
        source_key: &str,
        name: &str,
    ) -> StoreResult<SourceCategoryId> {
        let tables = &mut *self.tables;
        if let Some(existing) = tables
            .source_categories
            .iter_mut()
            .find(|c| c.source == source && c.source_key == source_key)
        {
            remember(&mut self.undo.touched_source_categories, existing, |c| c.id);
            existing.name = name.to_string();
            return Ok(existing.id);
        }
        let id = tables.next_id();
        tables.source_categories.push(SourceCategory {
            id,
            source: source.to_string(),
            source_key: source_key.to_string(),
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn mapped_category(
        &mut self,
        source_category_id: SourceCategoryId,
    ) -> StoreResult<Option<CategoryId>> {
        Ok(self
            .tables
            .mappings
            .iter()
            .find(|m| m.source_category_id == source_category_id)
            .map(|m| m.category_id))
    }

    async fn category_id_by_name(&mut self, name: &str) -> StoreResult<Option<CategoryId>> {
        Ok(self
            .tables
            .categories
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id))
    }

    async fn find_deal_source(
        &mut self,
        source: &str,
        source_post_id: &str,
    ) -> StoreResult<Option<DealSource>> {
        Ok(self
            .tables
            .deal_sources
            .iter()
            .find(|ds| ds.source == source && ds.source_post_id == source_post_id)
            .cloned())
    }

    async fn insert_deal(&mut self, fields: &DealFields, now: DateTime<Utc>) -> StoreResult<DealId> {
        let tables = &mut *self.tables;
        if !tables.categories.iter().any(|c| c.id == fields.category_id) {
            return Err(StoreError::NotFound(format!("category {}", fields.category_id)));
        }
        let id = tables.next_id();
        tables.deals.push(Deal {
            id,
            category_id: fields.category_id,
            title: fields.title.clone(),
            price: fields.price,
            shipping_type: fields.shipping_type,
            sold_out: fields.sold_out,
            thumbnail_url: fields.thumbnail_url.clone(),
            subcategory: fields.subcategory.clone(),
            shop_name: fields.shop_name.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn update_deal(
        &mut self,
        id: DealId,
        fields: &DealFields,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if !self.tables.categories.iter().any(|c| c.id == fields.category_id) {
            return Err(StoreError::NotFound(format!("category {}", fields.category_id)));
        }
        let deal = self.tables.deal_mut(id)?;
        remember(&mut self.undo.touched_deals, deal, |d| d.id);
        deal.category_id = fields.category_id;
        deal.title = fields.title.clone();
        deal.price = fields.price;
        deal.shipping_type = fields.shipping_type;
        deal.sold_out = fields.sold_out;
        deal.thumbnail_url = fields.thumbnail_url.clone();
        deal.subcategory = fields.subcategory.clone();
        deal.shop_name = fields.shop_name.clone();
        deal.updated_at = now;
        Ok(())
    }

    async fn update_deal_status(
        &mut self,
        id: DealId,
        sold_out: bool,
        price: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let deal = self.tables.deal_mut(id)?;
        remember(&mut self.undo.touched_deals, deal, |d| d.id);
        deal.sold_out = sold_out;
        if price.is_some() {
            deal.price = price;
        }
        deal.updated_at = now;
        Ok(())
    }

    async fn insert_deal_source(
        &mut self,
        deal_id: DealId,
        fields: &DealSourceFields,
    ) -> StoreResult<i64> {
        let tables = &mut *self.tables;
        let duplicate = tables.deal_sources.iter().any(|ds| {
            ds.source == fields.source && ds.source_post_id == fields.source_post_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "deal source: {}/{} already registered",
                fields.source, fields.source_post_id
            )));
        }
        tables.check_post_url_free(fields, None)?;
        let id = tables.next_id();
        tables.deal_sources.push(DealSource {
            id,
            deal_id,
            source: fields.source.clone(),
            source_post_id: fields.source_post_id.clone(),
            post_url: fields.post_url.clone(),
            source_category_id: fields.source_category_id,
            title: fields.title.clone(),
            thumb_url: fields.thumb_url.clone(),
        });
        Ok(id)
    }

    async fn update_deal_source(&mut self, id: i64, fields: &DealSourceFields) -> StoreResult<()> {
        let tables = &mut *self.tables;
        tables.check_post_url_free(fields, Some(id))?;
        let row = tables
            .deal_sources
            .iter_mut()
            .find(|ds| ds.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("deal source {id}")))?;
        remember(&mut self.undo.touched_deal_sources, row, |ds| ds.id);
        row.post_url = fields.post_url.clone();
        if fields.source_category_id.is_some() {
            row.source_category_id = fields.source_category_id;
        }
        row.title = fields.title.clone();
        if fields.thumb_url.is_some() {
            row.thumb_url = fields.thumb_url.clone();
        }
        Ok(())
    }

    async fn insert_purchase_link(
        &mut self,
        deal_id: DealId,
        url: &str,
        domain: &str,
        is_affiliate: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let tables = &mut *self.tables;
        if tables
            .purchase_links
            .iter()
            .any(|l| l.deal_id == deal_id && l.url == url)
        {
            return Ok(false);
        }
        let id = tables.next_id();
        tables.purchase_links.push(PurchaseLink {
            id,
            deal_id,
            url: url.to_string(),
            domain: domain.to_string(),
            is_affiliate,
            created_at: now,
        });
        Ok(true)
    }

    async fn has_affiliate_link(&mut self, deal_id: DealId) -> StoreResult<bool> {
        Ok(self
            .tables
            .purchase_links
            .iter()
            .any(|l| l.deal_id == deal_id && l.is_affiliate))
    }

    async fn lock_deal(&mut self, _deal_id: DealId) -> StoreResult<()> {
        // The transaction already holds the store-wide lock.
        Ok(())
    }

    async fn insert_metric_snapshot(&mut self, snapshot: &NewMetricSnapshot) -> StoreResult<i64> {
        let tables = &mut *self.tables;
        let id = tables.next_id();
        tables.metric_snapshots.push(MetricSnapshot {
            id,
            deal_id: snapshot.deal_id,
            source: snapshot.source.clone(),
            views: snapshot.views,
            votes: snapshot.votes,
            comments: snapshot.comments,
            captured_at: snapshot.captured_at,
        });
        Ok(id)
    }

    async fn insert_raw_record(&mut self, record: &NewRawRecord) -> StoreResult<i64> {
        let tables = &mut *self.tables;
        let id = tables.next_id();
        tables.raw_records.push(RawRecord {
            id,
            source: record.source.clone(),
            source_post_id: record.source_post_id.clone(),
            payload: record.payload.clone(),
            crawled_at: record.crawled_at,
        });
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut tx = *self;
        tx.committed = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
