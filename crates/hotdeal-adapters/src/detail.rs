//! Detail-page extraction.

use scraper::Html;
use serde::Deserialize;

use hotdeal_core::DetailFields;

use crate::select::{all_attrs, first_attr, first_text, parse_count, parse_selector};
use crate::AdapterError;

/// Turns one post's markup into candidate fields.
pub trait DetailExtractor: Send + Sync {
    fn extract(&self, source: &str, html: &str) -> Result<DetailFields, AdapterError>;
}

/// CSS selectors for a board's detail page. Every field is optional; a board
/// that shows no view counter simply leaves `views` unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailSelectors {
    /// Must match for the page to count as a post at all.
    #[serde(default)]
    pub required: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Element carrying the site's category key in `category_key_attr`.
    #[serde(default)]
    pub category_key: Option<String>,
    #[serde(default = "default_category_key_attr")]
    pub category_key_attr: String,
    #[serde(default)]
    pub mall: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub shipping: Option<String>,
    #[serde(default)]
    pub deal_url: Option<String>,
    #[serde(default)]
    pub views: Option<String>,
    #[serde(default)]
    pub votes: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub images: Option<String>,
}

fn default_category_key_attr() -> String {
    "data-category".to_string()
}

#[derive(Debug, Clone)]
pub struct SelectorDetailExtractor {
    selectors: DetailSelectors,
}

impl SelectorDetailExtractor {
    pub fn new(selectors: DetailSelectors) -> Self {
        Self { selectors }
    }
}

impl DetailExtractor for SelectorDetailExtractor {
    fn extract(&self, source: &str, html: &str) -> Result<DetailFields, AdapterError> {
        let s = &self.selectors;
        let document = Html::parse_document(html);

        if let Some(required) = s.required.as_deref() {
            if document.select(&parse_selector(required)?).next().is_none() {
                return Err(AdapterError::Malformed(format!(
                    "{source}: required element `{required}` missing"
                )));
            }
        }

        let count = |selector: Option<&str>| -> Result<Option<i64>, AdapterError> {
            Ok(first_text(&document, selector)?.as_deref().and_then(parse_count))
        };

        Ok(DetailFields {
            title: first_text(&document, s.title.as_deref())?,
            category: first_text(&document, s.category.as_deref())?,
            source_category_key: first_attr(
                &document,
                s.category_key.as_deref(),
                &s.category_key_attr,
            )?,
            mall: first_text(&document, s.mall.as_deref())?,
            price: first_text(&document, s.price.as_deref())?,
            shipping: first_text(&document, s.shipping.as_deref())?,
            deal_url: first_attr(&document, s.deal_url.as_deref(), "href")?,
            view_count: count(s.views.as_deref())?,
            upvote_count: count(s.votes.as_deref())?,
            comment_count: count(s.comments.as_deref())?,
            summary_text: first_text(&document, s.summary.as_deref())?,
            images: all_attrs(&document, s.images.as_deref(), "src")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="post">
            <h1 class="subject">[쿠팡] 로지텍 마우스 (19,900원/무료)</h1>
            <span class="cat" data-category="4">컴퓨터</span>
            <dl><dd class="mall">쿠팡</dd><dd class="price">19,900원</dd><dd class="ship">무료배송</dd></dl>
            <a class="deal" href="https://www.coupang.com/vp/products/123">구매</a>
            <span class="hit">조회 1,024</span><span class="rec">추천 15</span>
            <span class="cmt">댓글 7</span>
            <div class="body">무선 마우스 최저가</div>
            <img class="pic" src="https://img.example/1.jpg"><img class="pic" src="https://img.example/2.jpg">
          </div>
        </body></html>
    "#;

    fn selectors() -> DetailSelectors {
        DetailSelectors {
            required: Some(".post".into()),
            title: Some("h1.subject".into()),
            category: Some(".cat".into()),
            category_key: Some(".cat".into()),
            category_key_attr: "data-category".into(),
            mall: Some(".mall".into()),
            price: Some(".price".into()),
            shipping: Some(".ship".into()),
            deal_url: Some("a.deal".into()),
            views: Some(".hit".into()),
            votes: Some(".rec".into()),
            comments: Some(".cmt".into()),
            summary: Some(".body".into()),
            images: Some("img.pic".into()),
        }
    }

    #[test]
    fn extracts_every_configured_field() {
        let fields = SelectorDetailExtractor::new(selectors())
            .extract("ppomppu", PAGE)
            .unwrap();
        assert_eq!(fields.title.as_deref(), Some("[쿠팡] 로지텍 마우스 (19,900원/무료)"));
        assert_eq!(fields.source_category_key.as_deref(), Some("4"));
        assert_eq!(fields.category.as_deref(), Some("컴퓨터"));
        assert_eq!(fields.price.as_deref(), Some("19,900원"));
        assert_eq!(fields.deal_url.as_deref(), Some("https://www.coupang.com/vp/products/123"));
        assert_eq!(fields.view_count, Some(1024));
        assert_eq!(fields.upvote_count, Some(15));
        assert_eq!(fields.comment_count, Some(7));
        assert_eq!(fields.images.len(), 2);
    }

    #[test]
    fn missing_required_element_is_malformed() {
        let err = SelectorDetailExtractor::new(selectors())
            .extract("ppomppu", "<html><body><p>삭제된 게시물입니다</p></body></html>")
            .unwrap_err();
        assert!(matches!(err, AdapterError::Malformed(_)));
    }

    #[test]
    fn bad_selector_is_reported() {
        let mut bad = selectors();
        bad.price = Some("[[".into());
        let err = SelectorDetailExtractor::new(bad).extract("ppomppu", PAGE).unwrap_err();
        assert!(matches!(err, AdapterError::Selector { .. }));
    }
}
