//! Core domain model for the hot-deal ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "hotdeal-core";

pub type CategoryId = i64;
pub type SourceCategoryId = i64;
pub type DealId = i64;
pub type LinkId = i64;

/// Internal taxonomy node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardCategory {
    pub id: CategoryId,
    pub name: String,
}

/// Site-native taxonomy node, unique per (source, source_key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCategory {
    pub id: SourceCategoryId,
    pub source: String,
    pub source_key: String,
    pub name: String,
}

/// 1:1 bridge between a source category and a standard category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMapping {
    pub source_category_id: SourceCategoryId,
    pub category_id: CategoryId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingType {
    Free,
    Paid,
    #[default]
    Unknown,
}

impl ShippingType {
    pub fn as_str(self) -> &'static str {
        match self {
            ShippingType::Free => "FREE",
            ShippingType::Paid => "PAID",
            ShippingType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ShippingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownShippingType(pub String);

impl fmt::Display for UnknownShippingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown shipping type `{}`", self.0)
    }
}

impl std::error::Error for UnknownShippingType {}

impl FromStr for ShippingType {
    type Err = UnknownShippingType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(ShippingType::Free),
            "PAID" => Ok(ShippingType::Paid),
            "UNKNOWN" => Ok(ShippingType::Unknown),
            other => Err(UnknownShippingType(other.to_string())),
        }
    }
}

/// Normalized deal entity, mutated on every crawl that touches the same identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub category_id: CategoryId,
    pub title: String,
    pub price: Option<i64>,
    pub shipping_type: ShippingType,
    pub sold_out: bool,
    pub thumbnail_url: Option<String>,
    pub subcategory: Option<String>,
    pub shop_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable deal fields written on insert and on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealFields {
    pub category_id: CategoryId,
    pub title: String,
    pub price: Option<i64>,
    pub shipping_type: ShippingType,
    pub sold_out: bool,
    pub thumbnail_url: Option<String>,
    pub subcategory: Option<String>,
    pub shop_name: Option<String>,
}

/// One community post contributing to a deal. (source, source_post_id) is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSource {
    pub id: i64,
    pub deal_id: DealId,
    pub source: String,
    pub source_post_id: String,
    pub post_url: String,
    pub source_category_id: Option<SourceCategoryId>,
    pub title: String,
    pub thumb_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSourceFields {
    pub source: String,
    pub source_post_id: String,
    pub post_url: String,
    pub source_category_id: Option<SourceCategoryId>,
    pub title: String,
    pub thumb_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLink {
    pub id: LinkId,
    pub deal_id: DealId,
    pub url: String,
    pub domain: String,
    pub is_affiliate: bool,
    pub created_at: DateTime<Utc>,
}

/// An original link whose deal has no affiliate link yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliateCandidate {
    pub link_id: LinkId,
    pub deal_id: DealId,
    pub url: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub id: i64,
    pub deal_id: DealId,
    pub source: String,
    pub views: Option<i64>,
    pub votes: Option<i64>,
    pub comments: Option<i64>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMetricSnapshot {
    pub deal_id: DealId,
    pub source: String,
    pub views: Option<i64>,
    pub votes: Option<i64>,
    pub comments: Option<i64>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: i64,
    pub source: String,
    pub source_post_id: String,
    pub payload: JsonValue,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRawRecord {
    pub source: String,
    pub source_post_id: String,
    pub payload: JsonValue,
    pub crawled_at: DateTime<Utc>,
}

/// A deal source due for a metric refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTarget {
    pub deal_source_id: i64,
    pub deal_id: DealId,
    pub source: String,
    pub source_post_id: String,
    pub post_url: String,
}

/// Handoff contract from list extractors into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ListItem {
    pub source: String,
    pub source_post_id: String,
    pub post_url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub source_category_key: Option<String>,
    #[serde(default)]
    pub source_category_name: Option<String>,
    #[serde(default)]
    pub shop_text: Option<String>,
    #[serde(default)]
    pub price_text: Option<String>,
    #[serde(default)]
    pub shipping_text: Option<String>,
}

/// Fields a detail extractor pulls out of one post's markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DetailFields {
    pub title: Option<String>,
    pub category: Option<String>,
    pub source_category_key: Option<String>,
    pub mall: Option<String>,
    pub price: Option<String>,
    pub shipping: Option<String>,
    pub deal_url: Option<String>,
    pub view_count: Option<i64>,
    pub upvote_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub summary_text: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipping_type_round_trips_through_db_text() {
        for value in [ShippingType::Free, ShippingType::Paid, ShippingType::Unknown] {
            assert_eq!(value.as_str().parse::<ShippingType>().unwrap(), value);
        }
        assert!("free".parse::<ShippingType>().is_err());
    }

    #[test]
    fn list_item_optional_fields_default_when_absent() {
        let item: ListItem = serde_json::from_str(
            r#"{"source":"ppomppu","source_post_id":"1","post_url":"https://x/1","title":"t"}"#,
        )
        .unwrap();
        assert_eq!(item.thumbnail_url, None);
        assert_eq!(item.shipping_text, None);
    }
}
