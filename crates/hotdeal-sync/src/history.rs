//! Insert-only history: metric snapshots and the raw archive.

use chrono::{DateTime, Utc};
use hotdeal_core::{DealId, DetailFields, ListItem, NewMetricSnapshot, NewRawRecord};
use hotdeal_storage::{StoreResult, StoreTx};
use serde_json::json;

pub async fn record_metrics(
    tx: &mut dyn StoreTx,
    deal_id: DealId,
    source: &str,
    detail: &DetailFields,
    captured_at: DateTime<Utc>,
) -> StoreResult<i64> {
    tx.insert_metric_snapshot(&NewMetricSnapshot {
        deal_id,
        source: source.to_string(),
        views: detail.view_count,
        votes: detail.upvote_count,
        comments: detail.comment_count,
        captured_at,
    })
    .await
}

/// Archive payload: what the list row and the detail page said, verbatim.
pub fn raw_payload(item: Option<&ListItem>, fetched_url: &str, detail: &DetailFields) -> serde_json::Value {
    json!({
        "list": item,
        "fetched_url": fetched_url,
        "detail": detail,
    })
}

pub async fn archive_raw(
    tx: &mut dyn StoreTx,
    source: &str,
    source_post_id: &str,
    payload: serde_json::Value,
    crawled_at: DateTime<Utc>,
) -> StoreResult<i64> {
    tx.insert_raw_record(&NewRawRecord {
        source: source.to_string(),
        source_post_id: source_post_id.to_string(),
        payload,
        crawled_at,
    })
    .await
}
