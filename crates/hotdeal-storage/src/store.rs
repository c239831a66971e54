//! Storage contract shared by the Postgres and in-memory backends.
//!
//! Writes happen through a [`StoreTx`]: the pipeline opens one transaction per
//! crawled item (or per affiliate candidate) and either commits it or drops it.
//! Dropping an uncommitted transaction discards every write made through it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotdeal_core::{
    AffiliateCandidate, CategoryId, Deal, DealFields, DealId, DealSource, DealSourceFields,
    LinkId, MetricSnapshot, NewMetricSnapshot, NewRawRecord, PurchaseLink, RawRecord,
    RefreshTarget, SourceCategoryId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("missing row: {0}")]
    NotFound(String),
    #[error("invalid stored value: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DealStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Original links whose deal has no affiliate link yet, keyset-paged by link id.
    async fn affiliate_candidates(
        &self,
        after_link_id: LinkId,
        limit: usize,
    ) -> StoreResult<Vec<AffiliateCandidate>>;

    /// Deal sources whose deal was created at or after `created_since`, keyset-paged by id.
    async fn refresh_targets(
        &self,
        created_since: DateTime<Utc>,
        after_deal_source_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RefreshTarget>>;

    async fn deal(&self, id: DealId) -> StoreResult<Option<Deal>>;

    async fn purchase_links(&self, deal_id: DealId) -> StoreResult<Vec<PurchaseLink>>;

    async fn metric_snapshots(&self, deal_id: DealId) -> StoreResult<Vec<MetricSnapshot>>;

    /// Archive rows for one post, newest first.
    async fn recent_raw_records(
        &self,
        source: &str,
        source_post_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<RawRecord>>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Insert or rename the (source, source_key) category and return its id.
    async fn upsert_source_category(
        &mut self,
        source: &str,
        source_key: &str,
        name: &str,
    ) -> StoreResult<SourceCategoryId>;

    async fn mapped_category(
        &mut self,
        source_category_id: SourceCategoryId,
    ) -> StoreResult<Option<CategoryId>>;

    async fn category_id_by_name(&mut self, name: &str) -> StoreResult<Option<CategoryId>>;

    async fn find_deal_source(
        &mut self,
        source: &str,
        source_post_id: &str,
    ) -> StoreResult<Option<DealSource>>;

    async fn insert_deal(&mut self, fields: &DealFields, now: DateTime<Utc>) -> StoreResult<DealId>;

    async fn update_deal(
        &mut self,
        id: DealId,
        fields: &DealFields,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Refresh-pass update: sold-out flag always, price only when observed.
    async fn update_deal_status(
        &mut self,
        id: DealId,
        sold_out: bool,
        price: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn insert_deal_source(
        &mut self,
        deal_id: DealId,
        fields: &DealSourceFields,
    ) -> StoreResult<i64>;

    /// Updates the non-identity columns. `deal_id`, `source` and `source_post_id` never change.
    async fn update_deal_source(&mut self, id: i64, fields: &DealSourceFields) -> StoreResult<()>;

    /// Returns `false` when the (deal, url) pair already exists.
    async fn insert_purchase_link(
        &mut self,
        deal_id: DealId,
        url: &str,
        domain: &str,
        is_affiliate: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn has_affiliate_link(&mut self, deal_id: DealId) -> StoreResult<bool>;

    /// Serialize affiliate conversion for one deal until the transaction ends.
    async fn lock_deal(&mut self, deal_id: DealId) -> StoreResult<()>;

    async fn insert_metric_snapshot(&mut self, snapshot: &NewMetricSnapshot) -> StoreResult<i64>;

    async fn insert_raw_record(&mut self, record: &NewRawRecord) -> StoreResult<i64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
