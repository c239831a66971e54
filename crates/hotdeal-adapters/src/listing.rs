//! Board listings: the finite, restartable list of posts a crawl starts from.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use hotdeal_core::ListItem;
use hotdeal_storage::HttpFetcher;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::select::{absolutize, element_text, first_attr_in, first_text_in, parse_selector};
use crate::AdapterError;

/// Every call produces the listing afresh, so a crawl can be re-run at any time.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn source(&self) -> &str;

    async fn list_items(&self) -> Result<Vec<ListItem>, AdapterError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListSelectors {
    /// One match per post row.
    pub item: String,
    /// Anchor inside the row pointing at the post.
    pub link: String,
    /// Query parameter carrying the post id; the last path segment is used when unset.
    #[serde(default)]
    pub post_id_param: Option<String>,
    /// Defaults to the link text.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_key: Option<String>,
    #[serde(default = "default_category_key_attr")]
    pub category_key_attr: String,
    #[serde(default)]
    pub shop: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub shipping: Option<String>,
}

fn default_category_key_attr() -> String {
    "data-category".to_string()
}

pub fn post_id_from_url(post_url: &str, param: Option<&str>) -> Option<String> {
    let parsed = url::Url::parse(post_url).ok()?;
    match param {
        Some(param) => parsed
            .query_pairs()
            .find(|(k, _)| k == param)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty()),
        None => parsed
            .path_segments()?
            .filter(|s| !s.is_empty())
            .last()
            .map(ToString::to_string),
    }
}

/// Parse one list page. Rows without a resolvable link or post id are dropped.
pub fn parse_list_page(
    source: &str,
    page_url: &str,
    html: &str,
    selectors: &ListSelectors,
) -> Result<Vec<ListItem>, AdapterError> {
    let document = Html::parse_document(html);
    let item_sel = parse_selector(&selectors.item)?;
    let link_sel = parse_selector(&selectors.link)?;

    let mut items = Vec::new();
    for row in document.select(&item_sel) {
        let Some(link) = row.select(&link_sel).next() else {
            continue;
        };
        let Some(post_url) = link
            .value()
            .attr("href")
            .and_then(|href| absolutize(page_url, href))
        else {
            continue;
        };
        let Some(source_post_id) = post_id_from_url(&post_url, selectors.post_id_param.as_deref())
        else {
            debug!(source, %post_url, "list row without post id");
            continue;
        };
        let title = match first_text_in(row, selectors.title.as_deref())? {
            Some(title) => title,
            None => element_text(link).unwrap_or_default(),
        };
        let thumbnail_url = first_attr_in(row, selectors.thumbnail.as_deref(), "src")?
            .and_then(|src| absolutize(page_url, &src));

        items.push(ListItem {
            source: source.to_string(),
            source_post_id,
            post_url,
            title,
            thumbnail_url,
            source_category_key: first_attr_in(
                row,
                selectors.category_key.as_deref(),
                &selectors.category_key_attr,
            )?,
            source_category_name: first_text_in(row, selectors.category.as_deref())?,
            shop_text: first_text_in(row, selectors.shop.as_deref())?,
            price_text: first_text_in(row, selectors.price.as_deref())?,
            shipping_text: first_text_in(row, selectors.shipping.as_deref())?,
        });
    }
    Ok(items)
}

pub struct SelectorListingSource {
    source: String,
    list_urls: Vec<String>,
    selectors: ListSelectors,
    http: Arc<HttpFetcher>,
}

impl SelectorListingSource {
    pub fn new(
        source: impl Into<String>,
        list_urls: Vec<String>,
        selectors: ListSelectors,
        http: Arc<HttpFetcher>,
    ) -> Self {
        Self {
            source: source.into(),
            list_urls,
            selectors,
            http,
        }
    }
}

#[async_trait]
impl ListingSource for SelectorListingSource {
    fn source(&self) -> &str {
        &self.source
    }

    async fn list_items(&self) -> Result<Vec<ListItem>, AdapterError> {
        let mut items = Vec::new();
        let mut last_error = None;
        for list_url in &self.list_urls {
            let page = match self.http.fetch_bytes(&self.source, list_url).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(source = %self.source, %list_url, error = %err, "list page fetch failed");
                    last_error = Some(err);
                    continue;
                }
            };
            let parsed = parse_list_page(&self.source, &page.final_url, &page.text(), &self.selectors)?;
            debug!(source = %self.source, %list_url, rows = parsed.len(), "parsed list page");
            items.extend(parsed);
        }
        match last_error {
            // Only a listing where every page failed is an error.
            Some(err) if items.is_empty() => Err(err.into()),
            _ => Ok(items),
        }
    }
}

/// Reads list items from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct FixtureListingSource {
    source: String,
    path: PathBuf,
}

impl FixtureListingSource {
    pub fn new(source: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl ListingSource for FixtureListingSource {
    fn source(&self) -> &str {
        &self.source
    }

    async fn list_items(&self) -> Result<Vec<ListItem>, AdapterError> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let mut items: Vec<ListItem> = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        for item in &mut items {
            if item.source.is_empty() {
                item.source = self.source.clone();
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LIST: &str = r#"
        <table>
          <tr class="row">
            <td><span class="cat" data-category="4">[컴퓨터]</span></td>
            <td><a class="subject" href="view.php?id=ppomppu&no=501">[쿠팡] 로지텍 마우스 (19,900원/무료)</a></td>
            <td><img class="thumb" src="//cdn.ppomppu.co.kr/t/501.jpg"></td>
          </tr>
          <tr class="row">
            <td><a class="subject" href="view.php?id=ppomppu">공지</a></td>
          </tr>
          <tr class="row"><td>광고</td></tr>
        </table>
    "#;

    fn selectors() -> ListSelectors {
        ListSelectors {
            item: "tr.row".into(),
            link: "a.subject".into(),
            post_id_param: Some("no".into()),
            title: None,
            thumbnail: Some("img.thumb".into()),
            category: Some(".cat".into()),
            category_key: Some(".cat".into()),
            category_key_attr: "data-category".into(),
            shop: None,
            price: None,
            shipping: None,
        }
    }

    #[test]
    fn rows_without_post_ids_are_dropped() {
        let items = parse_list_page(
            "ppomppu",
            "https://www.ppomppu.co.kr/zboard/zboard.php?id=ppomppu",
            LIST,
            &selectors(),
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.source_post_id, "501");
        assert_eq!(item.post_url, "https://www.ppomppu.co.kr/zboard/view.php?id=ppomppu&no=501");
        assert_eq!(item.title, "[쿠팡] 로지텍 마우스 (19,900원/무료)");
        assert_eq!(item.thumbnail_url.as_deref(), Some("https://cdn.ppomppu.co.kr/t/501.jpg"));
        assert_eq!(item.source_category_key.as_deref(), Some("4"));
        assert_eq!(item.source_category_name.as_deref(), Some("[컴퓨터]"));
    }

    #[test]
    fn post_id_falls_back_to_last_path_segment() {
        assert_eq!(
            post_id_from_url("https://quasarzone.com/bbs/qb_saleinfo/views/1234567/", None),
            Some("1234567".to_string())
        );
        assert_eq!(post_id_from_url("https://x.example/view?no=", Some("no")), None);
    }

    #[tokio::test]
    async fn fixture_listing_is_restartable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.json");
        fs::write(
            &path,
            r#"[{"source":"","source_post_id":"1","post_url":"https://x.example/1","title":"a"}]"#,
        )
        .unwrap();
        let listing = FixtureListingSource::new("fmkorea", &path);
        let first = listing.list_items().await.unwrap();
        let second = listing.list_items().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].source, "fmkorea");
    }
}
