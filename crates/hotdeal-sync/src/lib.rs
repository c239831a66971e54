//! Hot-deal ingestion pipeline: crawl, affiliate conversion and metric refresh.
//!
//! Each stage is an independent batch run that takes only its configuration and
//! a [`hotdeal_storage::DealStore`]. Per-item failures are counted, never fatal.

pub mod affiliate;
pub mod category;
pub mod config;
pub mod fetcher;
pub mod history;
pub mod ledger;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod refresh;
pub mod runtime;
pub mod scheduler;

pub use affiliate::{AffiliateConverter, AffiliateSummary};
pub use category::{CategoryResolution, CategoryResolver, CategoryRule, ResolutionStage};
pub use config::{ConfigError, PipelineConfig};
pub use fetcher::{FetchFailure, FetchOutcome, FetchPolicy, FetchState, FetchTarget, FetchedPage, PageFetcher, UrlVariants};
pub use pipeline::{CrawlPipeline, CrawlSource, CrawlSummary, ItemError, ItemOutcome};
pub use refresh::{RefreshPass, RefreshSource, RefreshSummary};
pub use scheduler::{maybe_build_scheduler, Stages};

pub const CRATE_NAME: &str = "hotdeal-sync";
