//! Deal reconciliation: one transaction per crawled item.
//!
//! [`draft_deal`] is pure and decides what a post says; [`DealReconciler::persist`]
//! writes it. Within the transaction the order is fixed: category, deal, deal
//! source, original purchase link, metric snapshot, raw archive. Any error drops
//! the whole item and leaves earlier items untouched.

use chrono::{DateTime, Utc};
use hotdeal_adapters::ShopNameNormalizer;
use hotdeal_core::{DealFields, DealId, DealSourceFields, DetailFields, ListItem, ShippingType};
use hotdeal_storage::{DealStore, StoreResult, StoreTx};
use tracing::warn;

use crate::category::{CategoryResolution, CategoryResolver, Evidence, SourceCategoryRef, SubcategoryClassifier};
use crate::history::{archive_raw, record_metrics};
use crate::ledger::{link_domain, record_original, resolve_purchase_url};
use crate::normalize::{classify_shipping, is_sold_out, normalize_title, parse_price};

/// Normalized view of one post, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct DealDraft {
    pub source: String,
    pub source_post_id: String,
    pub post_url: String,
    /// Post title as scraped.
    pub raw_title: String,
    pub title: String,
    pub price: Option<i64>,
    pub shipping_type: ShippingType,
    pub sold_out: bool,
    pub shop_name: Option<String>,
    pub thumbnail_url: Option<String>,
    pub purchase_url: Option<String>,
    pub source_category_key: Option<String>,
    pub source_category_name: Option<String>,
    pub evidence: Evidence,
}

fn first_present(values: &[Option<&str>]) -> Option<String> {
    values
        .iter()
        .flatten()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Merge list-row and detail fields. Detail values win where both exist.
/// Returns `Err(reason)` when the post cannot become a deal.
pub fn draft_deal(
    item: &ListItem,
    detail: &DetailFields,
    page_url: &str,
    shops: &dyn ShopNameNormalizer,
) -> Result<DealDraft, String> {
    let raw_title = first_present(&[detail.title.as_deref(), Some(item.title.as_str())])
        .ok_or_else(|| "post has no title".to_string())?;
    let parts = normalize_title(&raw_title);
    if parts.title.is_empty() {
        return Err(format!("title `{raw_title}` is empty after normalization"));
    }

    let price = first_present(&[detail.price.as_deref(), item.price_text.as_deref()])
        .and_then(|p| parse_price(&p))
        .or_else(|| parts.price_hint().and_then(parse_price));
    let shipping_type = first_present(&[
        detail.shipping.as_deref(),
        item.shipping_text.as_deref(),
        parts.shipping_hint(),
    ])
    .map_or(ShippingType::Unknown, |s| classify_shipping(&s));

    let raw_shop = first_present(&[
        detail.mall.as_deref(),
        item.shop_text.as_deref(),
        parts.shop_prefix.as_deref(),
    ]);
    let shop_name = raw_shop
        .as_deref()
        .and_then(|raw| shops.normalize(&item.source, raw));

    let purchase_url = detail
        .deal_url
        .as_deref()
        .and_then(|href| resolve_purchase_url(page_url, href));
    let source_category_name = first_present(&[
        item.source_category_name.as_deref(),
        detail.category.as_deref(),
    ])
    .map(|name| name.trim_matches(|c| matches!(c, '[' | ']')).trim().to_string())
    .filter(|name| !name.is_empty());

    let evidence = Evidence::new(
        [
            raw_title.as_str(),
            detail.summary_text.as_deref().unwrap_or_default(),
            source_category_name.as_deref().unwrap_or_default(),
            raw_shop.as_deref().unwrap_or_default(),
        ],
        purchase_url.as_deref().and_then(link_domain).into_iter().collect(),
    );

    Ok(DealDraft {
        source: item.source.clone(),
        source_post_id: item.source_post_id.clone(),
        post_url: item.post_url.clone(),
        sold_out: is_sold_out([raw_title.as_str(), detail.summary_text.as_deref().unwrap_or_default()]),
        title: parts.title,
        raw_title,
        price,
        shipping_type,
        shop_name,
        thumbnail_url: item
            .thumbnail_url
            .clone()
            .or_else(|| detail.images.first().cloned()),
        purchase_url,
        source_category_key: first_present(&[
            detail.source_category_key.as_deref(),
            item.source_category_key.as_deref(),
        ]),
        source_category_name,
        evidence,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub deal_id: DealId,
    pub deal_source_id: i64,
    pub created: bool,
    pub category: CategoryResolution,
    pub subcategory: Option<String>,
    pub link_added: bool,
}

pub struct DealReconciler {
    categories: CategoryResolver,
    subcategories: SubcategoryClassifier,
}

impl DealReconciler {
    pub fn new(categories: CategoryResolver, subcategories: SubcategoryClassifier) -> Self {
        Self {
            categories,
            subcategories,
        }
    }

    pub fn categories(&self) -> &CategoryResolver {
        &self.categories
    }

    /// Run the item's writes in one transaction; commit on success, roll back otherwise.
    pub async fn persist(
        &self,
        store: &dyn DealStore,
        draft: &DealDraft,
        detail: &DetailFields,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<Reconciled> {
        let mut tx = store.begin().await?;
        match self.apply(tx.as_mut(), draft, detail, payload, now).await {
            Ok(reconciled) => {
                tx.commit().await?;
                Ok(reconciled)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(source = %draft.source, post_id = %draft.source_post_id, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        draft: &DealDraft,
        detail: &DetailFields,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> StoreResult<Reconciled> {
        let category = self
            .categories
            .resolve(
                tx,
                &draft.source,
                SourceCategoryRef {
                    key: draft.source_category_key.as_deref(),
                    name: draft.source_category_name.as_deref(),
                },
                &draft.evidence,
            )
            .await?;
        let subcategory = self
            .subcategories
            .classify_for(tx, category.category_id, &draft.raw_title)
            .await?;

        let fields = DealFields {
            category_id: category.category_id,
            title: draft.title.clone(),
            price: draft.price,
            shipping_type: draft.shipping_type,
            sold_out: draft.sold_out,
            thumbnail_url: draft.thumbnail_url.clone(),
            subcategory: subcategory.clone(),
            shop_name: draft.shop_name.clone(),
        };
        let source_fields = DealSourceFields {
            source: draft.source.clone(),
            source_post_id: draft.source_post_id.clone(),
            post_url: draft.post_url.clone(),
            source_category_id: category.source_category_id,
            title: draft.raw_title.clone(),
            thumb_url: draft.thumbnail_url.clone(),
        };

        let (deal_id, deal_source_id, created) =
            match tx.find_deal_source(&draft.source, &draft.source_post_id).await? {
                Some(existing) => {
                    tx.update_deal(existing.deal_id, &fields, now).await?;
                    tx.update_deal_source(existing.id, &source_fields).await?;
                    (existing.deal_id, existing.id, false)
                }
                None => {
                    let deal_id = tx.insert_deal(&fields, now).await?;
                    let deal_source_id = tx.insert_deal_source(deal_id, &source_fields).await?;
                    (deal_id, deal_source_id, true)
                }
            };

        let link_added = match draft.purchase_url.as_deref() {
            Some(url) => record_original(tx, deal_id, url, now).await?,
            None => false,
        };
        record_metrics(tx, deal_id, &draft.source, detail, now).await?;
        archive_raw(tx, &draft.source, &draft.source_post_id, payload, now).await?;

        Ok(Reconciled {
            deal_id,
            deal_source_id,
            created,
            category,
            subcategory,
            link_added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotdeal_adapters::TableShopNameNormalizer;

    fn item() -> ListItem {
        ListItem {
            source: "ppomppu".into(),
            source_post_id: "501".into(),
            post_url: "https://www.ppomppu.co.kr/zboard/view.php?id=ppomppu&no=501".into(),
            title: "[쿠팡] 로지텍 마우스 (19,900원/무료)".into(),
            source_category_name: Some("[컴퓨터]".into()),
            source_category_key: Some("4".into()),
            ..Default::default()
        }
    }

    #[test]
    fn list_row_alone_drafts_a_deal() {
        let shops = TableShopNameNormalizer::from_yaml_str("global:\n  쿠팡: 쿠팡\n").unwrap();
        let draft = draft_deal(&item(), &DetailFields::default(), &item().post_url, &shops).unwrap();
        assert_eq!(draft.title, "로지텍 마우스");
        assert_eq!(draft.price, Some(19900));
        assert_eq!(draft.shipping_type, ShippingType::Free);
        assert_eq!(draft.shop_name.as_deref(), Some("쿠팡"));
        assert_eq!(draft.source_category_name.as_deref(), Some("컴퓨터"));
        assert_eq!(draft.purchase_url, None);
        assert!(!draft.sold_out);
    }

    #[test]
    fn detail_fields_take_precedence() {
        let shops = TableShopNameNormalizer::default();
        let detail = DetailFields {
            title: Some("[품절] 로지텍 마우스".into()),
            price: Some("17,500원".into()),
            shipping: Some("배송비 2500원".into()),
            mall: Some("동네마트".into()),
            deal_url: Some("https://www.coupang.com/vp/products/1".into()),
            ..Default::default()
        };
        let draft = draft_deal(&item(), &detail, &item().post_url, &shops).unwrap();
        assert_eq!(draft.price, Some(17500));
        assert_eq!(draft.shipping_type, ShippingType::Paid);
        assert_eq!(draft.shop_name, None);
        assert!(draft.sold_out);
        assert_eq!(draft.evidence.domains, vec!["coupang.com".to_string()]);
    }

    #[test]
    fn blank_titles_are_rejected() {
        let mut blank = item();
        blank.title = "[쿠팡] (9,900원)".into();
        let shops = TableShopNameNormalizer::default();
        assert!(draft_deal(&blank, &DetailFields::default(), &blank.post_url, &shops).is_err());
    }

    #[test]
    fn body_text_feeds_category_rules() {
        let mut roundup = item();
        roundup.title = "오늘의 특가 모음".into();
        roundup.source_category_key = None;
        roundup.source_category_name = None;
        let detail = DetailFields {
            summary_text: Some("신라면 40봉 햇반 24개 최저가".into()),
            ..Default::default()
        };
        let shops = TableShopNameNormalizer::default();
        let draft = draft_deal(&roundup, &detail, &roundup.post_url, &shops).unwrap();
        assert!(draft.evidence.text.contains("햇반"));

        let rules = crate::category::load_category_rules(None).unwrap();
        let (index, _) = crate::category::best_rule(&rules, &draft.evidence).expect("body keywords match");
        assert_eq!(rules[index].category(), "식품");
    }

    #[test]
    fn drafting_is_deterministic() {
        let shops = TableShopNameNormalizer::from_yaml_str("global:\n  쿠팡: 쿠팡\n").unwrap();
        let detail = DetailFields {
            summary_text: Some("무선 마우스 특가".into()),
            ..Default::default()
        };
        let first = draft_deal(&item(), &detail, &item().post_url, &shops).unwrap();
        let second = draft_deal(&item(), &detail, &item().post_url, &shops).unwrap();
        assert_eq!(first, second);
    }
}
