//! Write Pipeline (C3): validation, id assignment, transactional
//! upsert + explicit FTS sync + post-write verification, optional vector
//! insert or embedding-queue enqueue, batch insertion under positional
//! alignment, and collection clearing.

use rusqlite::{params, Connection, OptionalExtension};

use crate::collection::Collection;
use crate::document::{generate_id, validate_document, Document, DocumentInput};
use crate::embedding::{embedding_to_bytes, EmbeddingOptions};
use crate::engine::SqlEngine;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct InsertOptions {
    pub generate_embedding: bool,
    pub embedding: Option<Vec<f32>>,
    pub embedding_options: EmbeddingOptions,
}

impl Default for InsertOptions {
    fn default() -> Self {
        InsertOptions {
            generate_embedding: true,
            embedding: None,
            embedding_options: EmbeddingOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsertResult {
    pub id: String,
    pub embedding_generated: bool,
}

/// One document plus its id/content, already validated and with a
/// canonical id assigned, ready for the positional-alignment batch
/// insert. Keeping the caller-supplied-id vs generated-id distinction
/// explicit (rather than falling back to a boolean "has id" check at
/// lookup time) is what keeps batch FTS sync from silently
/// mis-associating rows.
struct PreparedInsert {
    canonical_id: String,
    input: DocumentInput,
    options: InsertOptions,
}

fn prepare(collection: &str, input: DocumentInput, options: InsertOptions) -> Result<PreparedInsert> {
    validate_document(&input)?;
    let canonical_id = match &input.id {
        Some(id) => id.canonical()?,
        None => generate_id(),
    };
    let _ = collection;
    Ok(PreparedInsert {
        canonical_id,
        input,
        options,
    })
}

fn upsert_base_row(conn: &Connection, collection: &str, prepared: &PreparedInsert) -> Result<i64> {
    let now = chrono::Utc::now().to_rfc3339();
    let metadata = prepared
        .input
        .metadata
        .clone()
        .unwrap_or_else(|| serde_json::json!({}));
    let metadata_str = serde_json::to_string(&metadata)?;

    conn.execute(
        "INSERT INTO documents (id, title, content, collection, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(collection, id) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at",
        params![
            prepared.canonical_id,
            prepared.input.title,
            prepared.input.content,
            collection,
            metadata_str,
            now,
        ],
    )?;

    let rowid: i64 = conn.query_row(
        "SELECT rowid FROM documents WHERE collection = ?1 AND id = ?2",
        params![collection, prepared.canonical_id],
        |row| row.get(0),
    )?;
    Ok(rowid)
}

/// The `(title, content, metadata)` of a row that already exists in
/// `documents` for `collection`/`id`, read *before* `upsert_base_row` runs.
/// `documents_fts` is an external-content table: it has no column storage
/// of its own and resolves values from `documents` whenever a DML against
/// it runs. If we deleted the FTS row after the base row had already been
/// rewritten, FTS5 would compute the delete against the *new* content, not
/// the content actually indexed — leaving the old content's tokens
/// orphaned in the index. Capturing the prior values here lets
/// `sync_fts_row` issue an explicit `'delete'` naming the old content.
type PriorFtsRow = (Option<String>, Option<String>, String);

fn fetch_prior_fts_row(conn: &Connection, collection: &str, id: &str) -> Result<Option<PriorFtsRow>> {
    conn.query_row(
        "SELECT title, content, metadata FROM documents WHERE collection = ?1 AND id = ?2",
        params![collection, id],
        |row| {
            let title: Option<String> = row.get(0)?;
            let content: Option<String> = row.get(1)?;
            let metadata: String = row.get(2)?;
            Ok((title, content, metadata))
        },
    )
    .optional()
    .map_err(Error::from)
}

fn sync_fts_row(conn: &Connection, rowid: i64, prior: Option<PriorFtsRow>) -> Result<()> {
    if let Some((title, content, metadata)) = prior {
        // FTS5's 'delete' special command takes the old column values
        // explicitly, rather than re-deriving them from the (already
        // updated) external content table.
        conn.execute(
            "INSERT INTO documents_fts (documents_fts, rowid, title, content, metadata)
             VALUES ('delete', ?1, ?2, ?3, ?4)",
            params![rowid, title, content, metadata],
        )?;
    }
    conn.execute(
        "INSERT INTO documents_fts (rowid, title, content, metadata)
         SELECT rowid, title, content, metadata FROM documents WHERE rowid = ?1",
        params![rowid],
    )?;
    Ok(())
}

fn verify_fts_row(conn: &Connection, collection: &str, id: &str, rowid: i64) -> Result<()> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents_fts WHERE rowid = ?1",
        params![rowid],
        |row| row.get(0),
    )?;
    if count != 1 {
        return Err(Error::document_insert(
            collection,
            id,
            "FTS row missing after insert; this indicates FTS5 external-content sync drift — run rebuild_fts_index",
        ));
    }
    Ok(())
}

/// Inserts (replacing any prior row) `rowid`'s explicit vector. `vec0`
/// tables don't support `INSERT OR REPLACE`/upsert, so a delete-then-insert
/// pair stands in for it.
fn insert_explicit_vector(
    conn: &Connection,
    collection: &Collection,
    rowid: i64,
    vector: &[f32],
) -> Result<()> {
    if vector.len() != collection.config.dimensions {
        return Err(Error::validation_field(
            "embedding",
            format!(
                "embedding has {} dimensions, collection `{}` expects {}",
                vector.len(),
                collection.name,
                collection.config.dimensions
            ),
        ));
    }
    let table = collection.vector_table_name();
    conn.execute(&format!("DELETE FROM {table} WHERE rowid = ?1"), params![rowid])?;
    let bytes = embedding_to_bytes(vector);
    conn.execute(
        &format!("INSERT INTO {table} (rowid, embedding) VALUES (?1, ?2)"),
        params![rowid, bytes],
    )?;
    Ok(())
}

/// Pending+processing row count across the whole queue, the quantity the
/// backpressure check bounds — a store-wide resource, not a per-collection
/// one.
fn embedding_queue_depth(conn: &Connection) -> Result<i64> {
    let depth: i64 = conn.query_row(
        "SELECT COUNT(*) FROM embedding_queue WHERE status IN ('pending', 'processing')",
        [],
        |row| row.get(0),
    )?;
    Ok(depth)
}

fn enqueue_embedding_job(
    conn: &Connection,
    collection: &Collection,
    document_id: &str,
    text_content: &str,
    options: &InsertOptions,
    max_queue_depth: usize,
) -> Result<()> {
    if embedding_queue_depth(conn)? >= max_queue_depth as i64 {
        return Err(Error::Resource(format!(
            "embedding queue depth has reached its configured limit ({max_queue_depth}); throttle ingestion or drain pending jobs before retrying"
        )));
    }
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO embedding_queue
            (collection_name, document_id, text_content, priority, status, retry_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
        params![
            collection.name,
            document_id,
            text_content,
            options.embedding_options.priority.unwrap_or(0),
            now,
        ],
    )?;
    Ok(())
}

/// Single-document insertion: validate, assign id, upsert the base row,
/// sync FTS, optionally store an explicit vector or enqueue an embedding
/// job, and return the outcome. `text_content` is the text that should go
/// to the embedding provider if the document is enqueued for embedding —
/// distinct from `content` since a caller may prefer to embed `title` +
/// `content` concatenated.
pub fn insert_document_with_embedding(
    engine: &mut SqlEngine,
    collection: &Collection,
    input: DocumentInput,
    options: InsertOptions,
    max_queue_depth: usize,
) -> Result<InsertResult> {
    let text_for_embedding = format!(
        "{} {}",
        input.title.clone().unwrap_or_default(),
        input.content.clone().unwrap_or_default()
    )
    .trim()
    .to_string();
    let prepared = prepare(&collection.name, input, options)?;

    engine.transaction(|txn| {
        let conn: &Connection = txn;
        let prior = fetch_prior_fts_row(conn, &collection.name, &prepared.canonical_id)?;
        let rowid = upsert_base_row(conn, &collection.name, &prepared)?;
        sync_fts_row(conn, rowid, prior)?;
        verify_fts_row(conn, &collection.name, &prepared.canonical_id, rowid)?;

        let embedding_generated = if let Some(vector) = &prepared.options.embedding {
            insert_explicit_vector(conn, collection, rowid, vector)?;
            false
        } else if prepared.options.generate_embedding {
            enqueue_embedding_job(
                conn,
                collection,
                &prepared.canonical_id,
                &text_for_embedding,
                &prepared.options,
                max_queue_depth,
            )?;
            true
        } else {
            false
        };

        Ok(InsertResult {
            id: prepared.canonical_id.clone(),
            embedding_generated,
        })
    })
}

#[derive(Debug, Clone)]
pub struct BatchInsertResult {
    pub saved: Vec<String>,
    pub failed: Vec<usize>,
    pub errors: Vec<String>,
}

/// Batch insertion under the positional-alignment contract (I5): after a
/// sub-batch of documents is upserted, the assigned rowids are read back
/// via a single bulk `SELECT ... WHERE id IN (...)` and mapped to inputs
/// strictly by array position within the *ordered* result set, never by a
/// predicate that could fall back to "first row."
pub fn bulk_insert_documents(
    engine: &mut SqlEngine,
    collection: &Collection,
    inputs: Vec<(DocumentInput, InsertOptions)>,
    max_queue_depth: usize,
) -> Result<BatchInsertResult> {
    let mut prepared = Vec::with_capacity(inputs.len());
    let mut failed = Vec::new();
    let mut errors = Vec::new();

    for (idx, (input, options)) in inputs.into_iter().enumerate() {
        let text_for_embedding = format!(
            "{} {}",
            input.title.clone().unwrap_or_default(),
            input.content.clone().unwrap_or_default()
        )
        .trim()
        .to_string();
        match prepare(&collection.name, input, options) {
            Ok(p) => prepared.push((idx, text_for_embedding, p)),
            Err(e) => {
                failed.push(idx);
                errors.push(e.to_string());
            }
        }
    }

    let mut saved = Vec::with_capacity(prepared.len());

    engine.transaction(|txn| {
        let conn: &Connection = txn;

        // Capture each id's prior row (if any existed) before any base row
        // in this batch is upserted, so a replace's FTS delete names the
        // content that was actually indexed rather than the new content.
        let mut prior_by_id = std::collections::HashMap::new();
        for (_, _, p) in &prepared {
            if let Some(prior) = fetch_prior_fts_row(conn, &collection.name, &p.canonical_id)? {
                prior_by_id.insert(p.canonical_id.clone(), prior);
            }
        }

        // Upsert every prepared document's base row first.
        for (_, _, p) in &prepared {
            upsert_base_row(conn, &collection.name, p)?;
        }

        // Positional alignment: look up rowids for exactly this batch's ids,
        // ordered the same way the ids were supplied, and zip by index —
        // never by a fallback predicate.
        let ids: Vec<&str> = prepared.iter().map(|(_, _, p)| p.canonical_id.as_str()).collect();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT rowid, id FROM documents WHERE collection = ? AND id IN ({placeholders}) ORDER BY id"
        );
        let mut bind_params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
        bind_params.push(&collection.name);
        for id in &ids {
            bind_params.push(id);
        }

        let mut by_id = std::collections::HashMap::new();
        {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(bind_params.as_slice(), |row| {
                let rowid: i64 = row.get(0)?;
                let id: String = row.get(1)?;
                Ok((id, rowid))
            })?;
            for row in rows {
                let (id, rowid) = row?;
                by_id.insert(id, rowid);
            }
        }

        for (_idx, text_for_embedding, p) in &prepared {
            let rowid = *by_id.get(&p.canonical_id).ok_or_else(|| {
                Error::document_insert(
                    &collection.name,
                    &p.canonical_id,
                    "rowid lookup after batch upsert returned no row for this id",
                )
            })?;
            sync_fts_row(conn, rowid, prior_by_id.remove(&p.canonical_id))?;
            verify_fts_row(conn, &collection.name, &p.canonical_id, rowid)?;

            if let Some(vector) = &p.options.embedding {
                insert_explicit_vector(conn, collection, rowid, vector)?;
            } else if p.options.generate_embedding {
                enqueue_embedding_job(
                    conn,
                    collection,
                    &p.canonical_id,
                    text_for_embedding,
                    &p.options,
                    max_queue_depth,
                )?;
            }
            saved.push(p.canonical_id.clone());
        }
        Ok(())
    })?;

    Ok(BatchInsertResult {
        saved,
        failed,
        errors,
    })
}

/// Removes all rows for `collection` (or every collection, if `None`) from
/// `documents`, `documents_fts`, every `documents_vec*` table, and
/// `embedding_queue`, in one transaction, so a collection clear never
/// leaves the index out of sync with the base table.
pub fn clear(engine: &mut SqlEngine, collection: Option<&str>) -> Result<()> {
    engine.transaction(|txn| {
        let conn: &Connection = txn;
        let vec_tables: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'documents_vec%'",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        match collection {
            Some(name) => {
                let rowids: Vec<i64> = {
                    let mut stmt =
                        conn.prepare("SELECT rowid FROM documents WHERE collection = ?1")?;
                    let rows = stmt.query_map(params![name], |row| row.get(0))?;
                    rows.filter_map(|r| r.ok()).collect()
                };
                for table in &vec_tables {
                    for rowid in &rowids {
                        conn.execute(&format!("DELETE FROM {table} WHERE rowid = ?1"), params![rowid])?;
                    }
                }
                conn.execute(
                    "DELETE FROM documents_fts WHERE rowid IN (SELECT rowid FROM documents WHERE collection = ?1)",
                    params![name],
                )?;
                conn.execute("DELETE FROM documents WHERE collection = ?1", params![name])?;
                conn.execute(
                    "DELETE FROM embedding_queue WHERE collection_name = ?1",
                    params![name],
                )?;
            }
            None => {
                for table in &vec_tables {
                    conn.execute(&format!("DELETE FROM {table}"), [])?;
                }
                conn.execute("DELETE FROM documents_fts", [])?;
                conn.execute("DELETE FROM documents", [])?;
                conn.execute("DELETE FROM embedding_queue", [])?;
            }
        }
        Ok(())
    })
}

/// Deletes terminal (`completed`/`failed`) `embedding_queue` rows older than
/// `retention_days`, keeping the queue table bounded while still retaining
/// recent rows for observability. Never run automatically by the write
/// pipeline itself.
pub fn prune_embedding_queue(engine: &mut SqlEngine, retention_days: i64) -> Result<usize> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
    engine.transaction(|txn| {
        let conn: &Connection = txn;
        let deleted = conn.execute(
            "DELETE FROM embedding_queue
             WHERE status IN ('completed', 'failed') AND updated_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    })
}

pub fn get_document(engine: &SqlEngine, collection: &str, id: &str) -> Result<Option<Document>> {
    let conn = engine.connection();
    let row = conn
        .query_row(
            "SELECT rowid, id, title, content, collection, metadata, created_at, updated_at
             FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            map_document_row,
        )
        .ok();
    Ok(row)
}

pub(crate) fn map_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let metadata_str: String = row.get(5)?;
    let metadata = serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null);
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Document {
        rowid: row.get(0)?,
        id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        collection: row.get(4)?,
        metadata,
        created_at: created_at
            .parse()
            .unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: updated_at
            .parse()
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}
