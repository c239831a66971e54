//! External-collaborator contracts for the pipeline, plus configurable default
//! implementations: browser pages, list/detail extraction, affiliate links,
//! shop-name normalization and thumbnail caching.

use std::time::Duration;

use hotdeal_storage::FetchError;
use thiserror::Error;

pub mod affiliate;
pub mod browser;
pub mod detail;
pub mod listing;
mod select;
pub mod shop;
pub mod thumbnail;

pub use affiliate::{AffiliateTemplateConfig, AffiliateTransformer, TemplateAffiliateTransformer};
pub use browser::{BrowserDriver, BrowserPage, HttpBrowserDriver};
pub use detail::{DetailExtractor, DetailSelectors, SelectorDetailExtractor};
pub use listing::{FixtureListingSource, ListSelectors, ListingSource, SelectorListingSource};
pub use shop::{ShopNameNormalizer, TableShopNameNormalizer};
pub use thumbnail::{ArtifactThumbnailCache, PassthroughThumbnailCache, ThumbnailCache};

pub const CRATE_NAME: &str = "hotdeal-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("malformed page: {0}")]
    Malformed(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
