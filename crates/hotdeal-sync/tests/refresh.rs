mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use common::*;
use hotdeal_adapters::SelectorDetailExtractor;
use hotdeal_storage::DealStore;
use hotdeal_sync::{PageFetcher, RefreshPass, RefreshSource};

const COUPANG: &str = "https://www.coupang.com/vp/products/42";

fn refresh_pass(store: &hotdeal_storage::MemoryStore, driver: &ScriptedDriver, window: Duration) -> RefreshPass {
    let mut sources = HashMap::new();
    sources.insert(
        "ppomppu".to_string(),
        RefreshSource {
            extractor: Arc::new(SelectorDetailExtractor::new(detail_selectors())),
            variants: variants(),
            ready_selector: None,
        },
    );
    RefreshPass::new(
        Arc::new(store.clone()),
        PageFetcher::new(Arc::new(driver.clone()), policy()),
        sources,
        window,
        10,
    )
}

#[tokio::test(start_paused = true)]
async fn refresh_appends_snapshot_and_marks_sold_out() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(
        &post_url("900"),
        vec![
            Step::Html(detail_html("닌텐도 스위치 OLED", "369,000원", "무료배송", COUPANG, 40)),
            Step::Html(detail_html("[품절] 닌텐도 스위치 OLED", "359,000원", "무료배송", COUPANG, 410)),
        ],
    );
    let pipeline = build_pipeline(&store, &driver, vec![list_item("900", "닌텐도 스위치 OLED")]).await;
    pipeline.run_once().await.unwrap();
    let deal_id = store.tables().await.deals[0].id;

    let summary = refresh_pass(&store, &driver, Duration::hours(24))
        .run_at(Utc::now())
        .await
        .unwrap();
    assert_eq!(summary.targets, 1);
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.detail_failures, 0);

    let deal = store.deal(deal_id).await.unwrap().unwrap();
    assert!(deal.sold_out);
    assert_eq!(deal.price, Some(359000));

    let snapshots = store.metric_snapshots(deal_id).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().any(|s| s.views == Some(410)));
    assert_eq!(store.recent_raw_records("ppomppu", "900", 10).await.unwrap().len(), 2);
    assert_eq!(store.tables().await.deal_sources.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn posts_outside_the_window_are_left_alone() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(
        &post_url("901"),
        vec![Step::Html(detail_html("에어프라이어", "59,000원", "무료배송", COUPANG, 5))],
    );
    let pipeline = build_pipeline(&store, &driver, vec![list_item("901", "에어프라이어")]).await;
    pipeline.run_once().await.unwrap();
    let visits = driver.visits().len();

    let summary = refresh_pass(&store, &driver, Duration::hours(24))
        .run_at(Utc::now() + Duration::hours(48))
        .await
        .unwrap();
    assert_eq!(summary.targets, 0);
    assert_eq!(driver.visits().len(), visits);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_fetch_keeps_existing_rows() {
    let store = seeded_store().await;
    let driver = ScriptedDriver::new();
    driver.script(
        &post_url("902"),
        vec![
            Step::Html(detail_html("무선 청소기", "129,000원", "무료배송", COUPANG, 5)),
            Step::Fail,
        ],
    );
    let pipeline = build_pipeline(&store, &driver, vec![list_item("902", "무선 청소기")]).await;
    pipeline.run_once().await.unwrap();

    let summary = refresh_pass(&store, &driver, Duration::hours(24))
        .run_at(Utc::now())
        .await
        .unwrap();
    assert_eq!(summary.detail_failures, 1);
    assert_eq!(summary.refreshed, 0);

    let tables = store.tables().await;
    assert_eq!(tables.metric_snapshots.len(), 1);
    assert!(!tables.deals[0].sold_out);
}
