//! An embedded hybrid search engine core: BM25 full-text, vector ANN, and
//! substring search fused into a single ranked result list over SQLite.
//!
//! - **BM25 full-text search** via SQLite FTS5 with a Unicode-aware
//!   tokenizer.
//! - **Vector search** via the `sqlite-vec` `vec0` virtual table.
//! - **Hybrid search** combining both (plus optional LIKE substring
//!   matching) with reciprocal rank fusion or weighted score fusion.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use hybridstore::{Store, OpenOptions};
//! use hybridstore::document::DocumentInput;
//! use hybridstore::write::InsertOptions;
//! use hybridstore::search::{SearchRequest, SearchQuery};
//!
//! # async fn run() -> hybridstore::Result<()> {
//! let store = Store::open(None, OpenOptions::default()).await?;
//! store.insert_document_with_embedding(
//!     "default",
//!     DocumentInput { content: Some("hello world".into()), ..Default::default() },
//!     InsertOptions::default(),
//! ).await?;
//! let results = store.search(SearchRequest {
//!     query: SearchQuery { text: Some("hello".into()), vector: None },
//!     ..Default::default()
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod prompt;
pub mod schema;
pub mod search;
pub mod store;
pub mod worker;
pub mod write;

pub use collection::{Collection, CollectionConfig, CollectionInfo, DistanceMetric};
pub use config::OpenOptions;
pub use document::{Document, DocumentId, DocumentInput};
pub use error::{Error, ErrorKind, Result};
pub use search::{SearchQuery, SearchRequest, SearchResponse, SearchResult};
pub use store::Store;
pub use write::{BatchInsertResult, InsertOptions, InsertResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
