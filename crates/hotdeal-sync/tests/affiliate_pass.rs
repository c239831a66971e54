use std::sync::Arc;

use chrono::Utc;
use hotdeal_adapters::{AffiliateTemplateConfig, TemplateAffiliateTransformer};
use hotdeal_core::{DealFields, DealId, ShippingType};
use hotdeal_storage::{DealStore, MemoryStore};
use hotdeal_sync::ledger::record_original;
use hotdeal_sync::AffiliateConverter;

async fn deal_with_link(store: &MemoryStore, url: &str) -> DealId {
    let category_id = store.ensure_category("기타").await;
    let mut tx = store.begin().await.unwrap();
    let deal_id = tx
        .insert_deal(
            &DealFields {
                category_id,
                title: "테스트 딜".into(),
                price: Some(1000),
                shipping_type: ShippingType::Unknown,
                sold_out: false,
                thumbnail_url: None,
                subcategory: None,
                shop_name: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(record_original(tx.as_mut(), deal_id, url, Utc::now()).await.unwrap());
    assert!(!record_original(tx.as_mut(), deal_id, url, Utc::now()).await.unwrap());
    tx.commit().await.unwrap();
    deal_id
}

fn converter(store: &MemoryStore, batch_size: usize) -> AffiliateConverter {
    let transformer = TemplateAffiliateTransformer::new(AffiliateTemplateConfig {
        template: "https://link.example.com/a?url={url}".into(),
        domains: vec!["coupang.com".into()],
    })
    .unwrap();
    AffiliateConverter::new(Arc::new(store.clone()), Arc::new(transformer), batch_size)
}

#[tokio::test]
async fn converts_once_and_never_touches_originals() {
    let store = MemoryStore::new();
    let coupang = deal_with_link(&store, "https://www.coupang.com/vp/products/1").await;
    let gmarket = deal_with_link(&store, "https://item.gmarket.co.kr/Item?goodscode=2").await;
    assert_eq!(store.tables().await.purchase_links.len(), 2);

    let first = converter(&store, 1).run_once().await.unwrap();
    assert_eq!((first.candidates, first.converted, first.skipped, first.failed), (2, 1, 1, 0));

    let second = converter(&store, 1).run_once().await.unwrap();
    assert_eq!((second.candidates, second.converted, second.skipped), (1, 0, 1));

    let links = store.purchase_links(coupang).await.unwrap();
    assert_eq!(links.iter().filter(|l| l.is_affiliate).count(), 1);
    let original = links.iter().find(|l| !l.is_affiliate).unwrap();
    assert_eq!(original.url, "https://www.coupang.com/vp/products/1");
    let affiliate = links.iter().find(|l| l.is_affiliate).unwrap();
    assert!(affiliate.url.starts_with("https://link.example.com/a?url=https%3A%2F%2Fwww.coupang.com"));

    let untouched = store.purchase_links(gmarket).await.unwrap();
    assert_eq!(untouched.len(), 1);
    assert!(!untouched[0].is_affiliate);
}

#[tokio::test]
async fn one_affiliate_per_deal_even_with_several_originals() {
    let store = MemoryStore::new();
    let deal_id = deal_with_link(&store, "https://www.coupang.com/vp/products/1").await;
    let mut tx = store.begin().await.unwrap();
    record_original(tx.as_mut(), deal_id, "https://www.coupang.com/vp/products/1?vendorItemId=9", Utc::now())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let summary = converter(&store, 10).run_once().await.unwrap();
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.converted, 1);
    assert_eq!(summary.skipped, 1);

    let links = store.purchase_links(deal_id).await.unwrap();
    assert_eq!(links.iter().filter(|l| l.is_affiliate).count(), 1);
}
