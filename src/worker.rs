//! RPC Boundary (C5): the single background worker thread that owns the
//! `SqlEngine`, and the `Command`/`Response` protocol callers use to talk
//! to it. One worker, many callers, single-writer discipline.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::collection::{Collection, CollectionConfig, CollectionInfo};
use crate::document::DocumentInput;
use crate::embedding::EmbeddingJob;
use crate::engine::SqlEngine;
use crate::error::{Error, Result};
use crate::schema::{self, FtsValidation};
use crate::search::{SearchRequest, SearchResponse};
use crate::write::{self, BatchInsertResult, InsertOptions, InsertResult};

pub enum Command {
    Exec {
        sql: String,
        params: Vec<rusqlite::types::Value>,
        reply: oneshot::Sender<Result<usize>>,
    },
    Select {
        sql: String,
        params: Vec<rusqlite::types::Value>,
        reply: oneshot::Sender<Result<Vec<HashMap<String, rusqlite::types::Value>>>>,
    },
    InsertDocument {
        collection: String,
        input: DocumentInput,
        options: InsertOptions,
        reply: oneshot::Sender<Result<InsertResult>>,
    },
    BulkInsertDocuments {
        collection: String,
        inputs: Vec<(DocumentInput, InsertOptions)>,
        reply: oneshot::Sender<Result<BatchInsertResult>>,
    },
    Search {
        request: SearchRequest,
        reply: oneshot::Sender<Result<SearchResponse>>,
    },
    Clear {
        collection: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Export {
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    Import {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    ValidateFtsIndex {
        collection: String,
        reply: oneshot::Sender<Result<FtsValidation>>,
    },
    RebuildFtsIndex {
        collection: String,
        reply: oneshot::Sender<Result<()>>,
    },
    CreateCollection {
        name: String,
        config: CollectionConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    ListCollections {
        reply: oneshot::Sender<Result<Vec<CollectionInfo>>>,
    },
    GetCollectionInfo {
        name: String,
        reply: oneshot::Sender<Result<CollectionInfo>>,
    },
    NextPendingEmbeddingJob {
        collection: Option<String>,
        reply: oneshot::Sender<Result<Option<EmbeddingJob>>>,
    },
    CompleteEmbeddingJob {
        job_id: i64,
        vector: Option<Vec<f32>>,
        error_message: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    PruneEmbeddingQueue {
        retention_days: i64,
        reply: oneshot::Sender<Result<usize>>,
    },
    Shutdown,
}

/// Knobs the worker thread needs at every call site rather than only at
/// open time, e.g. the embedding queue depth the write pipeline's
/// backpressure check enforces on every insert.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub max_queue_depth: usize,
}

/// Spawns the worker thread. The returned sender is the only way to reach
/// the engine; the worker thread itself owns `engine` and never shares it.
/// `rx.blocking_recv()` lets the worker loop run on a plain `std::thread`
/// with no async runtime of its own.
pub fn spawn(mut engine: SqlEngine, config: WorkerConfig) -> mpsc::UnboundedSender<Command> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    std::thread::spawn(move || {
        while let Some(cmd) = rx.blocking_recv() {
            if matches!(cmd, Command::Shutdown) {
                break;
            }
            handle(&mut engine, &config, cmd);
        }
    });
    tx
}

fn handle(engine: &mut SqlEngine, config: &WorkerConfig, cmd: Command) {
    match cmd {
        Command::Exec { sql, params, reply } => {
            let bound: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let result = engine.exec(&sql, bound.as_slice());
            let _ = reply.send(result);
        }
        Command::Select { sql, params, reply } => {
            let bound: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let result = select_as_maps(engine, &sql, bound.as_slice());
            let _ = reply.send(result);
        }
        Command::InsertDocument {
            collection,
            input,
            options,
            reply,
        } => {
            let max_queue_depth = config.max_queue_depth;
            let result = with_collection(engine, &collection, |engine, coll| {
                write::insert_document_with_embedding(engine, coll, input, options, max_queue_depth)
            });
            let _ = reply.send(result);
        }
        Command::BulkInsertDocuments {
            collection,
            inputs,
            reply,
        } => {
            let max_queue_depth = config.max_queue_depth;
            let result = with_collection(engine, &collection, |engine, coll| {
                write::bulk_insert_documents(engine, coll, inputs, max_queue_depth)
            });
            let _ = reply.send(result);
        }
        Command::Search { request, reply } => {
            let result = run_search(engine, request);
            let _ = reply.send(result);
        }
        Command::Clear { collection, reply } => {
            let result = write::clear(engine, collection.as_deref());
            let _ = reply.send(result);
        }
        Command::Export { reply } => {
            let result = engine.serialize();
            let _ = reply.send(result);
        }
        Command::Import { bytes, reply } => {
            let result = engine.deserialize(&bytes);
            let _ = reply.send(result);
        }
        Command::ValidateFtsIndex { collection, reply } => {
            let result = schema::validate_fts_index(engine, &collection);
            let _ = reply.send(result);
        }
        Command::RebuildFtsIndex { collection, reply } => {
            let result = schema::rebuild_fts_index(engine, &collection);
            let _ = reply.send(result);
        }
        Command::CreateCollection { name, config, reply } => {
            let result = create_collection(engine, &name, config);
            let _ = reply.send(result);
        }
        Command::ListCollections { reply } => {
            let result = list_collections(engine);
            let _ = reply.send(result);
        }
        Command::GetCollectionInfo { name, reply } => {
            let result = get_collection_info(engine, &name);
            let _ = reply.send(result);
        }
        Command::NextPendingEmbeddingJob { collection, reply } => {
            let result = next_pending_embedding_job(engine, collection.as_deref());
            let _ = reply.send(result);
        }
        Command::CompleteEmbeddingJob {
            job_id,
            vector,
            error_message,
            reply,
        } => {
            let result = complete_embedding_job(engine, job_id, vector, error_message);
            let _ = reply.send(result);
        }
        Command::PruneEmbeddingQueue { retention_days, reply } => {
            let result = write::prune_embedding_queue(engine, retention_days);
            let _ = reply.send(result);
        }
        Command::Shutdown => {}
    }
}

fn select_as_maps(
    engine: &SqlEngine,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<HashMap<String, rusqlite::types::Value>>> {
    let conn = engine.connection();
    let mut stmt = conn.prepare(sql).map_err(|e| Error::database(sql, params.len(), e))?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map(params, |row| {
            let mut map = HashMap::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(idx)?;
                map.insert(name.clone(), value);
            }
            Ok(map)
        })
        .map_err(|e| Error::database(sql, params.len(), e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| Error::database(sql, params.len(), e))?);
    }
    Ok(out)
}

fn load_collection(engine: &SqlEngine, name: &str) -> Result<Collection> {
    let conn = engine.connection();
    conn.query_row(
        "SELECT name, created_at, updated_at, schema_version, dimensions, distance_metric,
                embedding_provider, embedding_dimensions, embedding_status, embedding_processing_status
         FROM collections WHERE name = ?1",
        rusqlite::params![name],
        |row| {
            use crate::collection::{DistanceMetric, EmbeddingConfig, EmbeddingStatus, ProcessingStatus};
            let distance_metric_str: String = row.get(5)?;
            let distance_metric = match distance_metric_str.as_str() {
                "l2" => DistanceMetric::L2,
                "dot" => DistanceMetric::Dot,
                _ => DistanceMetric::Cosine,
            };
            let embedding_status_str: String = row.get(8)?;
            let processing_status_str: String = row.get(9)?;
            let created_at: String = row.get(1)?;
            let updated_at: String = row.get(2)?;
            Ok(Collection {
                name: row.get(0)?,
                created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
                updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
                schema_version: row.get(3)?,
                config: CollectionConfig {
                    dimensions: row.get::<_, i64>(4)? as usize,
                    distance_metric,
                },
                embedding: EmbeddingConfig {
                    provider: row.get(6)?,
                    dimensions: row.get::<_, i64>(7)? as usize,
                    status: serde_json::from_str(&embedding_status_str).unwrap_or(EmbeddingStatus::Pending),
                    processing_status: serde_json::from_str(&processing_status_str)
                        .unwrap_or(ProcessingStatus::Idle),
                },
            })
        },
    )
    .map_err(|_| Error::schema(
        format!("collection `{name}` does not exist"),
        "create it first with create_collection",
    ))
}

fn with_collection<T>(
    engine: &mut SqlEngine,
    name: &str,
    f: impl FnOnce(&mut SqlEngine, &Collection) -> Result<T>,
) -> Result<T> {
    let collection = load_collection(engine, name)?;
    f(engine, &collection)
}

fn run_search(engine: &SqlEngine, request: SearchRequest) -> Result<SearchResponse> {
    // A collection that doesn't exist yields an empty result list, not an
    // error: searching before any document has ever been written to a
    // given collection name is a normal, expected state.
    let collection = match load_collection(engine, &request.collection) {
        Ok(c) => c,
        Err(_) => return Ok(SearchResponse { results: Vec::new() }),
    };
    let vector_table = collection.vector_table_name();
    crate::search::search(engine, &request, &vector_table)
}

fn create_collection(engine: &mut SqlEngine, name: &str, config: CollectionConfig) -> Result<()> {
    let conn = engine.connection();
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM collections WHERE name = ?1",
        rusqlite::params![name],
        |row| row.get(0),
    )?;
    if exists > 0 {
        return Err(Error::validation(format!("collection `{name}` already exists")));
    }
    let collection = Collection::new(name, config, schema::CURRENT_SCHEMA_VERSION);
    schema::ensure_collection_exists(engine, &collection)
}

fn list_collections(engine: &SqlEngine) -> Result<Vec<CollectionInfo>> {
    let conn = engine.connection();
    let names: Vec<String> = {
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };
    names
        .into_iter()
        .map(|name| get_collection_info(engine, &name))
        .collect()
}

fn get_collection_info(engine: &SqlEngine, name: &str) -> Result<CollectionInfo> {
    let collection = load_collection(engine, name)?;
    let document_count: i64 = engine.connection().query_row(
        "SELECT COUNT(*) FROM documents WHERE collection = ?1",
        rusqlite::params![name],
        |row| row.get(0),
    )?;
    Ok(CollectionInfo {
        collection,
        document_count,
    })
}

fn next_pending_embedding_job(engine: &SqlEngine, collection: Option<&str>) -> Result<Option<EmbeddingJob>> {
    let conn = engine.connection();
    let sql = match collection {
        Some(_) => {
            "SELECT id, collection_name, document_id, text_content, priority, status, retry_count,
                    created_at, updated_at, error_message
             FROM embedding_queue WHERE status = 'pending' AND collection_name = ?1
             ORDER BY priority DESC, created_at ASC LIMIT 1"
        }
        None => {
            "SELECT id, collection_name, document_id, text_content, priority, status, retry_count,
                    created_at, updated_at, error_message
             FROM embedding_queue WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC LIMIT 1"
        }
    };
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<EmbeddingJob> {
        let status_str: String = row.get(5)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        Ok(EmbeddingJob {
            id: row.get(0)?,
            collection_name: row.get(1)?,
            document_id: row.get(2)?,
            text_content: row.get(3)?,
            priority: row.get(4)?,
            status: crate::embedding::JobStatus::parse(&status_str)
                .unwrap_or(crate::embedding::JobStatus::Pending),
            retry_count: row.get(6)?,
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
            error_message: row.get(9)?,
        })
    };

    let job = if let Some(name) = collection {
        conn.query_row(sql, rusqlite::params![name], map_row).ok()
    } else {
        conn.query_row(sql, [], map_row).ok()
    };

    if let Some(job) = &job {
        conn.execute(
            "UPDATE embedding_queue SET status = 'processing', updated_at = ?2 WHERE id = ?1",
            rusqlite::params![job.id, chrono::Utc::now().to_rfc3339()],
        )?;
    }
    Ok(job)
}

fn complete_embedding_job(
    engine: &mut SqlEngine,
    job_id: i64,
    vector: Option<Vec<f32>>,
    error_message: Option<String>,
) -> Result<()> {
    engine.transaction(|txn| {
        let conn: &rusqlite::Connection = txn;
        let now = chrono::Utc::now().to_rfc3339();

        if let Some(message) = &error_message {
            conn.execute(
                "UPDATE embedding_queue SET status = 'failed', error_message = ?2, updated_at = ?3,
                    retry_count = retry_count + 1
                 WHERE id = ?1",
                rusqlite::params![job_id, message, now],
            )?;
            return Ok(());
        }

        let (collection_name, document_id): (String, String) = conn.query_row(
            "SELECT collection_name, document_id FROM embedding_queue WHERE id = ?1",
            rusqlite::params![job_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if let Some(vector) = vector {
            // Reload the collection inside the transaction to pick the
            // right vector table; the write pipeline's rechecking of the
            // current row (not the queue's stale snapshot) tolerates the
            // document having been re-inserted since enqueue.
            let rowid: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM documents WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection_name, document_id],
                    |row| row.get(0),
                )
                .ok();
            if let Some(rowid) = rowid {
                let dimensions: usize = conn.query_row(
                    "SELECT dimensions FROM collections WHERE name = ?1",
                    rusqlite::params![collection_name],
                    |row| row.get::<_, i64>(0),
                ).map(|d| d as usize)?;
                let table = crate::collection::vector_table_name_for_dimensions(dimensions);
                conn.execute(&format!("DELETE FROM {table} WHERE rowid = ?1"), rusqlite::params![rowid])?;
                let bytes = crate::embedding::embedding_to_bytes(&vector);
                conn.execute(
                    &format!("INSERT INTO {table} (rowid, embedding) VALUES (?1, ?2)"),
                    rusqlite::params![rowid, bytes],
                )?;
            }
        }

        conn.execute(
            "UPDATE embedding_queue SET status = 'completed', updated_at = ?2 WHERE id = ?1",
            rusqlite::params![job_id, now],
        )?;
        Ok(())
    })
}
