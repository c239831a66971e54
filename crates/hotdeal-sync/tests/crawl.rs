mod common;

use common::*;
use hotdeal_core::ShippingType;
use hotdeal_storage::DealStore;

const COUPANG: &str = "https://www.coupang.com/vp/products/777";

#[tokio::test(start_paused = true)]
async fn one_success_one_exhausted_target() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(
        &post_url("100"),
        vec![Step::Html(detail_html("[쿠팡] 로지텍 마우스", "19,900원", "무료배송", COUPANG, 120))],
    );
    let pipeline = build_pipeline(
        &store,
        &driver,
        vec![list_item("100", "[쿠팡] 로지텍 마우스"), list_item("101", "[G마켓] 라면")],
    )
    .await;

    let summary = pipeline.run_once().await.unwrap();
    assert_eq!(summary.targets, 2);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.detail_failures, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.parser_failures, 0);
    assert_eq!(summary.persist_failures, 0);

    let tables = store.tables().await;
    assert_eq!(tables.deals.len(), 1);
    let deal = &tables.deals[0];
    assert_eq!(deal.price, Some(19900));
    assert_eq!(deal.shipping_type, ShippingType::Free);
    assert_eq!(deal.title, "로지텍 마우스");
    assert_eq!(deal.shop_name.as_deref(), Some("쿠팡"));
    assert_eq!(tables.metric_snapshots.len(), 1);
    assert_eq!(tables.metric_snapshots[0].views, Some(120));
    assert_eq!(tables.raw_records.len(), 1);
    assert_eq!(tables.purchase_links.len(), 1);
    assert!(!tables.purchase_links[0].is_affiliate);
    assert_eq!(tables.purchase_links[0].domain, "coupang.com");
    assert_eq!(driver.opened(), driver.closed());
}

#[tokio::test(start_paused = true)]
async fn rerun_updates_the_same_deal() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(
        &post_url("200"),
        vec![
            Step::Html(detail_html("삼성 SSD 1TB", "99,000원", "배송비 3000원", COUPANG, 10)),
            Step::Html(detail_html("삼성 SSD 1TB", "89,000원", "무료배송", COUPANG, 55)),
        ],
    );
    let pipeline = build_pipeline(&store, &driver, vec![list_item("200", "삼성 SSD 1TB")]).await;

    let first = pipeline.run_once().await.unwrap();
    let deal_id = store.tables().await.deals[0].id;
    let second = pipeline.run_once().await.unwrap();
    assert_eq!((first.created, second.created), (1, 0));
    assert_eq!(second.processed, 1);

    let tables = store.tables().await;
    assert_eq!(tables.deals.len(), 1);
    assert_eq!(tables.deal_sources.len(), 1);
    assert_eq!(tables.deals[0].id, deal_id);
    assert_eq!(tables.deals[0].price, Some(89000));
    assert_eq!(tables.deals[0].shipping_type, ShippingType::Free);
    assert_eq!(tables.purchase_links.len(), 1);
    assert_eq!(tables.metric_snapshots.len(), 2);

    let raw = store.recent_raw_records("ppomppu", "200", 10).await.unwrap();
    assert_eq!(raw.len(), 2);
    assert!(raw[0].crawled_at >= raw[1].crawled_at);
    assert_eq!(raw[0].payload["detail"]["price"], "89,000원");
}

#[tokio::test(start_paused = true)]
async fn duplicate_rows_are_fetched_once_and_skipped() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(
        &post_url("300"),
        vec![Step::Html(detail_html("햇반 24개", "21,000원", "무료", COUPANG, 1))],
    );
    let pipeline = build_pipeline(
        &store,
        &driver,
        vec![list_item("300", "햇반 24개"), list_item("300", "햇반 24개")],
    )
    .await;

    let summary = pipeline.run_once().await.unwrap();
    assert_eq!(summary.targets, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(driver.visits().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn persist_failure_rolls_back_only_that_item() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    let shared = post_url("400");
    driver.script(
        &shared,
        vec![Step::Html(detail_html("에어팟 프로", "259,000원", "무료배송", COUPANG, 7))],
    );
    let mut clash = list_item("401", "에어팟 프로");
    clash.post_url = shared.clone();
    let pipeline = build_pipeline(&store, &driver, vec![list_item("400", "에어팟 프로"), clash]).await;

    let summary = pipeline.run_once().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.persist_failures, 1);

    let tables = store.tables().await;
    assert_eq!(tables.deals.len(), 1);
    assert_eq!(tables.deal_sources.len(), 1);
    assert_eq!(tables.metric_snapshots.len(), 1);
    assert_eq!(tables.raw_records.len(), 1);
    assert_eq!(tables.purchase_links.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unparseable_pages_and_blank_titles_are_counted() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(&post_url("500"), vec![Step::Html("<p>삭제된 게시물입니다</p>".into())]);
    driver.script(
        &post_url("501"),
        vec![Step::Html(detail_html("[쿠팡] (9,900원)", "9,900원", "무료", COUPANG, 1))],
    );
    let pipeline = build_pipeline(
        &store,
        &driver,
        vec![list_item("500", "삭제"), list_item("501", "[쿠팡] (9,900원)")],
    )
    .await;

    let summary = pipeline.run_once().await.unwrap();
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.parser_failures, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);
    assert!(store.tables().await.deals.is_empty());
}

#[tokio::test(start_paused = true)]
async fn keyword_rules_pick_category_and_subcategory() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(
        &post_url("600"),
        vec![Step::Html(detail_html("LG 27인치 모니터", "199,000원", "무료배송", COUPANG, 1))],
    );
    let pipeline = build_pipeline(&store, &driver, vec![list_item("600", "LG 27인치 모니터")]).await;
    pipeline.run_once().await.unwrap();

    let tables = store.tables().await;
    let computer = tables.categories.iter().find(|c| c.name == "컴퓨터").unwrap().id;
    assert_eq!(tables.deals[0].category_id, computer);
    assert_eq!(tables.deals[0].subcategory.as_deref(), Some("모니터"));
}
