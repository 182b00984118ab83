//! # Finrag Retrieval
//!
//! Search and context API over the document index.
//!
//! [`RetrievalService`] owns an embedder, a vector index and the document store that mirrors it.
//! Adds are serialized behind a write lock and persisted write-through; searches run
//! concurrently and report a confidence that is the top similarity score when it clears the
//! configured threshold, or 0 otherwise.
//!
//! ## Example
//!
//! ```no_run
//! use finrag_retrieval::{RetrievalConfig, RetrievalService};
//! use finrag_vector_store::NewDocument;
//!
//! #[tokio::main]
//! async fn main() -> finrag_retrieval::Result<()> {
//!     let mut config = RetrievalConfig::load(None)?;
//!     config.apply_env()?;
//!     let service = RetrievalService::open(&config).await?;
//!
//!     service
//!         .add_documents(vec![
//!             NewDocument::new("TSM beats earnings", "earnings").with_ticker("TSM"),
//!         ])
//!         .await;
//!
//!     let response = service.search("earnings surprise", 5, None).await;
//!     println!("{} hits, confidence {:.2}", response.total_found, response.confidence);
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod error;
mod service;
mod types;

pub use config::{parse_threshold, BackendKind, Durability, RetrievalConfig};
pub use context::{bucket_for, CONTEXT_TOP_K, KNOWN_BUCKETS};
pub use error::{Result, RetrievalError};
pub use service::RetrievalService;
pub use types::{ContextResponse, SearchResponse, StoreStats};
