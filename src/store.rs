//! Public facade: the `Store` type callers actually hold. Every method
//! dispatches a `Command` to the worker thread (`worker::spawn`) and awaits
//! its reply under a deadline, realizing the RPC boundary contract (C5)
//! as ordinary async methods with no visible channel plumbing.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::collection::{CollectionConfig, CollectionInfo, DEFAULT_COLLECTION};
use crate::config::OpenOptions;
use crate::document::{DocumentInput, DocumentId};
use crate::embedding::EmbeddingJob;
use crate::engine::SqlEngine;
use crate::error::{Error, Result};
use crate::schema::{self, FtsValidation};
use crate::search::{SearchRequest, SearchResponse};
use crate::worker::{self, Command};
use crate::write::{BatchInsertResult, InsertOptions, InsertResult};

pub struct Store {
    tx: mpsc::UnboundedSender<Command>,
    timeout: Duration,
}

impl Store {
    /// Opens (creating if necessary) a store at `path`, or an in-memory
    /// store if `path` is `None` / `:memory:`. Runs the C2 schema-open
    /// algorithm before the worker thread starts accepting commands, so a
    /// returned `Store` always has a usable schema or this call fails.
    pub async fn open(path: Option<&str>, options: OpenOptions) -> Result<Self> {
        let path = path.unwrap_or(":memory:");
        let mut engine = if path == ":memory:" {
            SqlEngine::open_in_memory()?
        } else {
            SqlEngine::open(path)?
        };
        let default_collection_config = CollectionConfig {
            dimensions: options.vector_dimensions,
            ..CollectionConfig::default()
        };
        schema::ensure_schema(&mut engine, options.allow_destructive_repair, default_collection_config)?;
        let worker_config = worker::WorkerConfig {
            max_queue_depth: options.max_queue_depth,
        };
        let tx = worker::spawn(engine, worker_config);
        Ok(Store {
            tx,
            timeout: Duration::from_millis(options.default_timeout_ms),
        })
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = build(reply_tx);
        self.tx
            .send(cmd)
            .map_err(|_| Error::Transport("worker thread is no longer running".into()))?;
        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Transport("worker dropped the reply channel".into())),
            Err(_) => Err(Error::Timeout),
        }
    }

    pub async fn close(self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    pub async fn exec(&self, sql: &str, params: Vec<rusqlite::types::Value>) -> Result<usize> {
        self.call(|reply| Command::Exec {
            sql: sql.to_string(),
            params,
            reply,
        })
        .await
    }

    pub async fn select(
        &self,
        sql: &str,
        params: Vec<rusqlite::types::Value>,
    ) -> Result<Vec<HashMap<String, rusqlite::types::Value>>> {
        self.call(|reply| Command::Select {
            sql: sql.to_string(),
            params,
            reply,
        })
        .await
    }

    pub async fn insert_document_with_embedding(
        &self,
        collection: &str,
        input: DocumentInput,
        options: InsertOptions,
    ) -> Result<InsertResult> {
        self.call(|reply| Command::InsertDocument {
            collection: collection.to_string(),
            input,
            options,
            reply,
        })
        .await
    }

    pub async fn bulk_insert_documents(
        &self,
        collection: &str,
        inputs: Vec<(DocumentInput, InsertOptions)>,
    ) -> Result<BatchInsertResult> {
        self.call(|reply| Command::BulkInsertDocuments {
            collection: collection.to_string(),
            inputs,
            reply,
        })
        .await
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        self.call(|reply| Command::Search { request, reply }).await
    }

    pub async fn clear(&self, collection: Option<&str>) -> Result<()> {
        self.call(|reply| Command::Clear {
            collection: collection.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn export(&self) -> Result<Vec<u8>> {
        self.call(|reply| Command::Export { reply }).await
    }

    pub async fn import(&self, bytes: Vec<u8>) -> Result<()> {
        self.call(|reply| Command::Import { bytes, reply }).await
    }

    pub async fn validate_fts_index(&self, collection: &str) -> Result<FtsValidation> {
        self.call(|reply| Command::ValidateFtsIndex {
            collection: collection.to_string(),
            reply,
        })
        .await
    }

    pub async fn rebuild_fts_index(&self, collection: Option<&str>) -> Result<()> {
        let collection = collection.unwrap_or(DEFAULT_COLLECTION).to_string();
        self.call(|reply| Command::RebuildFtsIndex { collection, reply }).await
    }

    pub async fn create_collection(&self, name: &str, dimensions: Option<usize>) -> Result<()> {
        let config = CollectionConfig {
            dimensions: dimensions.unwrap_or(crate::collection::DEFAULT_DIMENSIONS),
            ..CollectionConfig::default()
        };
        self.call(|reply| Command::CreateCollection {
            name: name.to_string(),
            config,
            reply,
        })
        .await
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        self.call(|reply| Command::ListCollections { reply }).await
    }

    pub async fn get_collection_info(&self, name: &str) -> Result<CollectionInfo> {
        self.call(|reply| Command::GetCollectionInfo {
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Polled by an external embedder worker that owns an
    /// `EmbeddingProvider` (see `embedding` module); never drained by this
    /// store's own C5 worker.
    pub async fn next_pending_embedding_job(&self, collection: Option<&str>) -> Result<Option<EmbeddingJob>> {
        self.call(|reply| Command::NextPendingEmbeddingJob {
            collection: collection.map(str::to_string),
            reply,
        })
        .await
    }

    pub async fn complete_embedding_job(
        &self,
        job_id: i64,
        vector: Option<Vec<f32>>,
        error_message: Option<String>,
    ) -> Result<()> {
        self.call(|reply| Command::CompleteEmbeddingJob {
            job_id,
            vector,
            error_message,
            reply,
        })
        .await
    }

    /// Sweeps terminal (`completed`/`failed`) `embedding_queue` rows older
    /// than `retention_days` (defaulting to
    /// `config::defaults::EMBEDDING_QUEUE_RETENTION_DAYS`). Never run
    /// automatically; callers schedule it themselves.
    pub async fn prune_embedding_queue(&self, retention_days: Option<i64>) -> Result<usize> {
        let retention_days = retention_days.unwrap_or(crate::config::defaults::EMBEDDING_QUEUE_RETENTION_DAYS);
        self.call(|reply| Command::PruneEmbeddingQueue { retention_days, reply }).await
    }
}

/// Convenience constructor for callers building a `DocumentInput` with a
/// string id without importing `DocumentId` directly.
pub fn document_id_from_str(id: impl Into<String>) -> DocumentId {
    DocumentId::Str(id.into())
}
