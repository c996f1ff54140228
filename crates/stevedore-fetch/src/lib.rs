//! Stevedore Fetch - retrieving packaged bundle content
//!
//! A `BundleFetcher` turns a bundle source descriptor into raw archive bytes.
//! HTTP(S) is the supported transport; the trait seam exists so tests can
//! substitute an in-memory fetcher.

pub mod error;
pub mod http;

use async_trait::async_trait;
use stevedore_core::BundleSource;

pub use error::FetchError;
pub use http::HttpFetcher;

/// Retrieves raw archive bytes for a bundle source
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    async fn fetch(&self, source: &BundleSource) -> error::Result<Vec<u8>>;
}
