//! Persistence contract, Postgres/in-memory stores, artifact storage and HTTP fetch
//! utilities for the hot-deal pipeline.

pub mod artifact;
pub mod http;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod throttle;

pub use artifact::{ArtifactStore, StoredArtifact};
pub use http::{BackoffPolicy, FetchError, FetchedResponse, HttpFetcher, HttpFetcherConfig};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{DealStore, StoreError, StoreResult, StoreTx};
pub use throttle::StartThrottle;

pub const CRATE_NAME: &str = "hotdeal-storage";
