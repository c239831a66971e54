//! Postgres backend over `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotdeal_core::{
    AffiliateCandidate, CategoryId, Deal, DealFields, DealId, DealSource, DealSourceFields,
    LinkId, MetricSnapshot, NewMetricSnapshot, NewRawRecord, PurchaseLink, RawRecord,
    RefreshTarget, ShippingType, SourceCategoryId,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::store::{DealStore, StoreError, StoreResult, StoreTx};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ensure_category(&self, name: &str) -> StoreResult<CategoryId> {
        let row = sqlx::query(
            r#"
            INSERT INTO standard_categories (name)
            VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Bridge a source category to a standard category. Either side already being
    /// mapped is a conflict: the mapping is a bijection.
    pub async fn map_category(
        &self,
        source_category_id: SourceCategoryId,
        category_id: CategoryId,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO category_mappings (source_category_id, category_id) VALUES ($1, $2)",
        )
        .bind(source_category_id)
        .bind(category_id)
        .execute(&self.pool)
        .await
        .map_err(|err| conflict_or(err, "category mapping"))?;
        Ok(())
    }

    pub async fn unmap_category(&self, source_category_id: SourceCategoryId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM category_mappings WHERE source_category_id = $1")
            .bind(source_category_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn conflict_or(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{what}: {}", db.message()))
        }
        _ => StoreError::Database(err),
    }
}

fn shipping_from_row(row: &PgRow) -> StoreResult<ShippingType> {
    let raw: String = row.try_get("shipping_type")?;
    raw.parse()
        .map_err(|e: hotdeal_core::UnknownShippingType| StoreError::Decode(e.to_string()))
}

fn deal_from_row(row: &PgRow) -> StoreResult<Deal> {
    Ok(Deal {
        id: row.try_get("id")?,
        category_id: row.try_get("category_id")?,
        title: row.try_get("title")?,
        price: row.try_get("price")?,
        shipping_type: shipping_from_row(row)?,
        sold_out: row.try_get("sold_out")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        subcategory: row.try_get("subcategory")?,
        shop_name: row.try_get("shop_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn deal_source_from_row(row: &PgRow) -> StoreResult<DealSource> {
    Ok(DealSource {
        id: row.try_get("id")?,
        deal_id: row.try_get("deal_id")?,
        source: row.try_get("source")?,
        source_post_id: row.try_get("source_post_id")?,
        post_url: row.try_get("post_url")?,
        source_category_id: row.try_get("source_category_id")?,
        title: row.try_get("title")?,
        thumb_url: row.try_get("thumb_url")?,
    })
}

#[async_trait]
impl DealStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn affiliate_candidates(
        &self,
        after_link_id: LinkId,
        limit: usize,
    ) -> StoreResult<Vec<AffiliateCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT pl.id, pl.deal_id, pl.url, pl.domain
              FROM purchase_links pl
             WHERE pl.is_affiliate = FALSE
               AND pl.id > $1
               AND NOT EXISTS (
                     SELECT 1
                       FROM purchase_links aff
                      WHERE aff.deal_id = pl.deal_id
                        AND aff.is_affiliate = TRUE
                   )
             ORDER BY pl.id
             LIMIT $2
            "#,
        )
        .bind(after_link_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AffiliateCandidate {
                    link_id: row.try_get("id")?,
                    deal_id: row.try_get("deal_id")?,
                    url: row.try_get("url")?,
                    domain: row.try_get("domain")?,
                })
            })
            .collect()
    }

    async fn refresh_targets(
        &self,
        created_since: DateTime<Utc>,
        after_deal_source_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<RefreshTarget>> {
        let rows = sqlx::query(
            r#"
            SELECT ds.id, ds.deal_id, ds.source, ds.source_post_id, ds.post_url
              FROM deal_sources ds
              JOIN deals d ON d.id = ds.deal_id
             WHERE d.created_at >= $1
               AND ds.id > $2
             ORDER BY ds.id
             LIMIT $3
            "#,
        )
        .bind(created_since)
        .bind(after_deal_source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RefreshTarget {
                    deal_source_id: row.try_get("id")?,
                    deal_id: row.try_get("deal_id")?,
                    source: row.try_get("source")?,
                    source_post_id: row.try_get("source_post_id")?,
                    post_url: row.try_get("post_url")?,
                })
            })
            .collect()
    }

    async fn deal(&self, id: DealId) -> StoreResult<Option<Deal>> {
        let row = sqlx::query("SELECT * FROM deals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deal_from_row).transpose()
    }

    async fn purchase_links(&self, deal_id: DealId) -> StoreResult<Vec<PurchaseLink>> {
        let rows = sqlx::query(
            r#"
            SELECT id, deal_id, url, domain, is_affiliate, created_at
              FROM purchase_links
             WHERE deal_id = $1
             ORDER BY id
            "#,
        )
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PurchaseLink {
                    id: row.try_get("id")?,
                    deal_id: row.try_get("deal_id")?,
                    url: row.try_get("url")?,
                    domain: row.try_get("domain")?,
                    is_affiliate: row.try_get("is_affiliate")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn metric_snapshots(&self, deal_id: DealId) -> StoreResult<Vec<MetricSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, deal_id, source, views, votes, comments, captured_at
              FROM metric_snapshots
             WHERE deal_id = $1
             ORDER BY captured_at, id
            "#,
        )
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MetricSnapshot {
                    id: row.try_get("id")?,
                    deal_id: row.try_get("deal_id")?,
                    source: row.try_get("source")?,
                    views: row.try_get("views")?,
                    votes: row.try_get("votes")?,
                    comments: row.try_get("comments")?,
                    captured_at: row.try_get("captured_at")?,
                })
            })
            .collect()
    }

    async fn recent_raw_records(
        &self,
        source: &str,
        source_post_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<RawRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, source_post_id, payload, crawled_at
              FROM raw_records
             WHERE source = $1
               AND source_post_id = $2
             ORDER BY crawled_at DESC, id DESC
             LIMIT $3
            "#,
        )
        .bind(source)
        .bind(source_post_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RawRecord {
                    id: row.try_get("id")?,
                    source: row.try_get("source")?,
                    source_post_id: row.try_get("source_post_id")?,
                    payload: row.try_get("payload")?,
                    crawled_at: row.try_get("crawled_at")?,
                })
            })
            .collect()
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn upsert_source_category(
        &mut self,
        source: &str,
        source_key: &str,
        name: &str,
    ) -> StoreResult<SourceCategoryId> {
        let row = sqlx::query(
            r#"
            INSERT INTO source_categories (source, source_key, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (source, source_key) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(source)
        .bind(source_key)
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn mapped_category(
        &mut self,
        source_category_id: SourceCategoryId,
    ) -> StoreResult<Option<CategoryId>> {
        let row = sqlx::query(
            "SELECT category_id FROM category_mappings WHERE source_category_id = $1",
        )
        .bind(source_category_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| r.try_get("category_id")).transpose()?)
    }

    async fn category_id_by_name(&mut self, name: &str) -> StoreResult<Option<CategoryId>> {
        let row = sqlx::query("SELECT id FROM standard_categories WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|r| r.try_get("id")).transpose()?)
    }

    async fn find_deal_source(
        &mut self,
        source: &str,
        source_post_id: &str,
    ) -> StoreResult<Option<DealSource>> {
        let row = sqlx::query(
            r#"
            SELECT id, deal_id, source, source_post_id, post_url, source_category_id, title, thumb_url
              FROM deal_sources
             WHERE source = $1
               AND source_post_id = $2
            "#,
        )
        .bind(source)
        .bind(source_post_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(deal_source_from_row).transpose()
    }

    async fn insert_deal(&mut self, fields: &DealFields, now: DateTime<Utc>) -> StoreResult<DealId> {
        let row = sqlx::query(
            r#"
            INSERT INTO deals (
                category_id, title, price, shipping_type, sold_out,
                thumbnail_url, subcategory, shop_name, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING id
            "#,
        )
        .bind(fields.category_id)
        .bind(&fields.title)
        .bind(fields.price)
        .bind(fields.shipping_type.as_str())
        .bind(fields.sold_out)
        .bind(&fields.thumbnail_url)
        .bind(&fields.subcategory)
        .bind(&fields.shop_name)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn update_deal(
        &mut self,
        id: DealId,
        fields: &DealFields,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deals
               SET category_id = $2,
                   title = $3,
                   price = $4,
                   shipping_type = $5,
                   sold_out = $6,
                   thumbnail_url = $7,
                   subcategory = $8,
                   shop_name = $9,
                   updated_at = $10
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fields.category_id)
        .bind(&fields.title)
        .bind(fields.price)
        .bind(fields.shipping_type.as_str())
        .bind(fields.sold_out)
        .bind(&fields.thumbnail_url)
        .bind(&fields.subcategory)
        .bind(&fields.shop_name)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("deal {id}")));
        }
        Ok(())
    }

    async fn update_deal_status(
        &mut self,
        id: DealId,
        sold_out: bool,
        price: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deals
               SET sold_out = $2,
                   price = COALESCE($3, price),
                   updated_at = $4
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(sold_out)
        .bind(price)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("deal {id}")));
        }
        Ok(())
    }

    async fn insert_deal_source(
        &mut self,
        deal_id: DealId,
        fields: &DealSourceFields,
    ) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO deal_sources (
                deal_id, source, source_post_id, post_url, source_category_id, title, thumb_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(deal_id)
        .bind(&fields.source)
        .bind(&fields.source_post_id)
        .bind(&fields.post_url)
        .bind(fields.source_category_id)
        .bind(&fields.title)
        .bind(&fields.thumb_url)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|err| conflict_or(err, "deal source"))?;
        Ok(row.try_get("id")?)
    }

    async fn update_deal_source(&mut self, id: i64, fields: &DealSourceFields) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE deal_sources
               SET post_url = $2,
                   source_category_id = COALESCE($3, source_category_id),
                   title = $4,
                   thumb_url = COALESCE($5, thumb_url)
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&fields.post_url)
        .bind(fields.source_category_id)
        .bind(&fields.title)
        .bind(&fields.thumb_url)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| conflict_or(err, "deal source"))?;
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
        let row = sqlx::query(
            r#"
            INSERT INTO purchase_links (deal_id, url, domain, is_affiliate, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (deal_id, url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(deal_id)
        .bind(url)
        .bind(domain)
        .bind(is_affiliate)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.is_some())
    }

    async fn has_affiliate_link(&mut self, deal_id: DealId) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM purchase_links WHERE deal_id = $1 AND is_affiliate = TRUE
            ) AS present
            "#,
        )
        .bind(deal_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("present")?)
    }

    async fn lock_deal(&mut self, deal_id: DealId) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(deal_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_metric_snapshot(&mut self, snapshot: &NewMetricSnapshot) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO metric_snapshots (deal_id, source, views, votes, comments, captured_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(snapshot.deal_id)
        .bind(&snapshot.source)
        .bind(snapshot.views)
        .bind(snapshot.votes)
        .bind(snapshot.comments)
        .bind(snapshot.captured_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn insert_raw_record(&mut self, record: &NewRawRecord) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO raw_records (source, source_post_id, payload, crawled_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&record.source)
        .bind(&record.source_post_id)
        .bind(&record.payload)
        .bind(record.crawled_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
