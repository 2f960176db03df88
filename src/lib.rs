//! # catalog-prices
//!
//! Fetches per-article prices from a vendor product catalog and appends
//! them to a spreadsheet next to the original rows.
//!
//! The pipeline has three stages:
//! - [`CatalogClient::login`] authenticates once and yields a [`Session`]
//! - [`BulkFetcher`] looks up every unique article concurrently, bounded by
//!   a semaphore, retrying transient failures and capturing the rest
//! - [`PriceMerger`] maps rows to articles and writes four price columns,
//!   using a sentinel for anything it could not resolve
//!
//! ## Quick Start
//!
//! ```no_run
//! use catalog_prices::{BulkFetcher, CatalogClient, Config, Credentials, PriceMerger};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let credentials = Credentials::from_env()?;
//!
//!     let session = CatalogClient::new(config.api.clone(), config.retry.clone())?
//!         .login(&credentials)
//!         .await?;
//!     let fetcher = BulkFetcher::new(session, &config.fetch, config.retry.clone());
//!
//!     let written = PriceMerger::new(fetcher)
//!         .process_file(
//!             Path::new("catalog.xlsx"),
//!             Path::new("catalog_prices.xlsx"),
//!             &config.sheet.article_column,
//!             config.sheet.header_row,
//!         )
//!         .await?;
//!     println!("wrote {}", written.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Catalog login and authenticated session
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Concurrent product lookups
pub mod fetcher;
/// Row grouping and price column merge
pub mod merge;
/// Product payload schema and decoding
pub mod product;
/// Retry logic with optional backoff
pub mod retry;
/// In-memory table and spreadsheet codecs
pub mod sheet;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use client::{CatalogClient, Session};
pub use config::{ApiConfig, Config, Credentials, FetchConfig, RetryConfig, SheetConfig};
pub use error::{Error, FetchError, Result};
pub use fetcher::{ArticleResult, BulkFetcher, Payload, PriceSource, ProductApi};
pub use merge::{ERROR_SENTINEL, MergeReport, PriceMerger, RowGroups};
pub use product::{PriceField, PriceRecord, ProductResponse};
pub use sheet::{Cell, Table, Workbook, Worksheet};
