//! # Finrag Vector Store
//!
//! Vector storage and exact similarity search for the finance assistant's document index.
//!
//! ## Features
//!
//! - **Exact k-NN search** by inner product over unit-norm vectors
//! - **Pluggable embeddings**: ONNX Runtime sentence encoders or a deterministic stub
//! - **Two backends behind one trait**: local flat index or a remote managed service
//! - **Positional metadata store** persisted alongside the vectors
//!
//! ## Architecture
//!
//! ```text
//! NewDocument[]
//!     │
//!     ├──> EmbeddingModel (ONNX / stub)
//!     │      └─> unit-norm Vector[D]
//!     │
//!     ├──> VectorIndex (FlatIndex | RemoteIndex)
//!     │      └─> ids 0, 1, 2, ...
//!     │
//!     └──> DocumentStore
//!            └─> metadata.json (same ordinal order)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use finrag_vector_store::{EmbeddingModel, FlatIndex, PendingVector, VectorIndex};
//!
//! #[tokio::main]
//! async fn main() -> finrag_vector_store::Result<()> {
//!     let embedder = EmbeddingModel::stub(384);
//!     let mut index = FlatIndex::new(embedder.dimension());
//!
//!     let vector = embedder.embed("TSM beats earnings").await?;
//!     index.add(vec![PendingVector::new(vector)]).await?;
//!
//!     let query = embedder.embed("earnings surprise").await?;
//!     for (id, score) in index.search(&query, 5).await? {
//!         println!("{id}: {score:.3}");
//!     }
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod flat_index;
mod index;
mod onnx;
pub mod paths;
mod remote_client;
mod remote_index;
mod store;
mod types;

pub use embeddings::{
    l2_norm, normalize, Embedder, EmbeddingConfig, EmbeddingMode, EmbeddingModel, StubEmbedder,
};
pub use error::{Result, VectorStoreError};
pub use flat_index::FlatIndex;
pub use index::{PendingVector, VectorIndex};
pub use onnx::OnnxEmbedder;
pub use remote_client::{
    HttpVectorClient, RemoteConfig, RemoteIndexStats, RemoteMatch, RemoteRecord,
    RemoteVectorClient,
};
pub use remote_index::RemoteIndex;
pub use store::DocumentStore;
pub use types::{DocId, Document, NewDocument, SearchResult, GENERAL_DOC_TYPE};
