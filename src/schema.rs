//! Schema Manager (C2): guarantees that on every successful open the store
//! either already matches the current schema version, has been brought to
//! it, or the caller gets a precise, recoverable error.

use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::collection::{vector_table_name_for_dimensions, Collection, CollectionConfig, DEFAULT_COLLECTION};
use crate::config::sqlite::FTS_TOKENIZE;
use crate::engine::SqlEngine;
use crate::error::{Error, Result};

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: &[&str] = &["collections", "documents", "embedding_queue", "schema_meta"];
const REQUIRED_VIRTUAL_TABLES: &[&str] = &["documents_fts"];

fn collections_ddl() -> &'static str {
    "CREATE TABLE collections (
        name TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        schema_version INTEGER NOT NULL,
        dimensions INTEGER NOT NULL,
        distance_metric TEXT NOT NULL,
        embedding_provider TEXT,
        embedding_dimensions INTEGER NOT NULL,
        embedding_status TEXT NOT NULL,
        embedding_processing_status TEXT NOT NULL
    )"
}

fn documents_ddl() -> &'static str {
    "CREATE TABLE documents (
        rowid INTEGER PRIMARY KEY,
        id TEXT NOT NULL,
        title TEXT,
        content TEXT,
        collection TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(collection, id)
    )"
}

fn documents_collection_index_ddl() -> &'static str {
    "CREATE INDEX idx_documents_collection ON documents(collection)"
}

fn documents_fts_ddl() -> String {
    format!(
        "CREATE VIRTUAL TABLE documents_fts USING fts5(
            title, content, metadata,
            content='documents', content_rowid='rowid',
            tokenize='{FTS_TOKENIZE}'
        )"
    )
}

fn embedding_queue_ddl() -> &'static str {
    "CREATE TABLE embedding_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection_name TEXT NOT NULL,
        document_id TEXT NOT NULL,
        text_content TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        error_message TEXT
    )"
}

fn embedding_queue_indexes_ddl() -> &'static [&'static str] {
    &[
        "CREATE INDEX idx_embedding_queue_status ON embedding_queue(status)",
        "CREATE INDEX idx_embedding_queue_collection ON embedding_queue(collection_name)",
        "CREATE INDEX idx_embedding_queue_priority ON embedding_queue(priority DESC)",
        "CREATE INDEX idx_embedding_queue_created_at ON embedding_queue(created_at)",
    ]
}

fn schema_meta_ddl() -> &'static str {
    "CREATE TABLE schema_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)"
}

/// The `vec0` virtual table for a given dimension, created lazily the
/// first time a collection with that dimension is created (not part of
/// bootstrap, since the default dimension is the only one guaranteed to
/// exist up front).
pub fn vector_table_ddl(dimensions: usize, distance_metric: &str) -> String {
    let table = vector_table_name_for_dimensions(dimensions);
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {table} USING vec0(
            embedding float[{dimensions}] distance_metric={distance_metric}
        )"
    )
}

fn object_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn all_objects_present(conn: &Connection) -> Result<bool> {
    for t in REQUIRED_TABLES.iter().chain(REQUIRED_VIRTUAL_TABLES.iter()) {
        if !object_exists(conn, t)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_object_present(conn: &Connection) -> Result<bool> {
    for t in REQUIRED_TABLES.iter().chain(REQUIRED_VIRTUAL_TABLES.iter()) {
        if object_exists(conn, t)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn read_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok();
    Ok(value.and_then(|v| v.parse::<i64>().ok()))
}

fn write_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![version.to_string()],
    )?;
    Ok(())
}

fn bootstrap(conn: &Connection, default_collection_config: CollectionConfig) -> Result<()> {
    info!("bootstrapping fresh schema");
    conn.execute(collections_ddl(), [])?;
    conn.execute(documents_ddl(), [])?;
    conn.execute(documents_collection_index_ddl(), [])?;
    conn.execute(&documents_fts_ddl(), [])?;
    conn.execute(embedding_queue_ddl(), [])?;
    for idx in embedding_queue_indexes_ddl() {
        conn.execute(idx, [])?;
    }
    conn.execute(schema_meta_ddl(), [])?;
    write_schema_version(conn, CURRENT_SCHEMA_VERSION)?;

    conn.execute(
        &vector_table_ddl(
            default_collection_config.dimensions,
            default_collection_config.distance_metric.as_vec0_str(),
        ),
        [],
    )?;
    insert_collection_row(
        conn,
        &Collection::new(DEFAULT_COLLECTION, default_collection_config, CURRENT_SCHEMA_VERSION),
    )?;
    Ok(())
}

fn insert_collection_row(conn: &Connection, collection: &Collection) -> Result<()> {
    conn.execute(
        "INSERT INTO collections (
            name, created_at, updated_at, schema_version, dimensions, distance_metric,
            embedding_provider, embedding_dimensions, embedding_status, embedding_processing_status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            collection.name,
            collection.created_at.to_rfc3339(),
            collection.updated_at.to_rfc3339(),
            collection.schema_version,
            collection.config.dimensions as i64,
            collection.config.distance_metric.as_vec0_str(),
            collection.embedding.provider,
            collection.embedding.dimensions as i64,
            serde_json::to_string(&collection.embedding.status).unwrap_or_default(),
            serde_json::to_string(&collection.embedding.processing_status).unwrap_or_default(),
        ],
    )?;
    Ok(())
}

/// Drops all recognized objects in dependency order (virtual tables before
/// regular tables), for the destructive partial-schema repair path.
fn drop_all(conn: &Connection) -> Result<()> {
    warn!("dropping partial schema objects for destructive repair");
    for t in REQUIRED_VIRTUAL_TABLES {
        conn.execute(&format!("DROP TABLE IF EXISTS {t}"), [])?;
    }
    // Also drop any per-dimension vector tables we can discover.
    let vec_tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'documents_vec%'")?
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    for t in vec_tables {
        conn.execute(&format!("DROP TABLE IF EXISTS {t}"), [])?;
    }
    for t in REQUIRED_TABLES {
        conn.execute(&format!("DROP TABLE IF EXISTS {t}"), [])?;
    }
    Ok(())
}

/// A single forward migration step, keyed by the version it migrates
/// *from*. No steps are registered today (`CURRENT_SCHEMA_VERSION` is 1 and
/// this crate has only ever produced this one schema shape) — this is live
/// machinery so a future schema bump has somewhere to attach a step.
type MigrationFn = fn(&Connection) -> Result<()>;

struct Migration {
    from_version: i64,
    run: MigrationFn,
}

fn migrations() -> Vec<Migration> {
    Vec::new()
}

fn run_migrations(conn: &Connection, mut current: i64) -> Result<()> {
    let steps = migrations();
    loop {
        if current >= CURRENT_SCHEMA_VERSION {
            break;
        }
        let step = steps.iter().find(|m| m.from_version == current);
        match step {
            Some(m) => {
                (m.run)(conn)?;
                current += 1;
                write_schema_version(conn, current)?;
            }
            None => {
                return Err(Error::schema(
                    format!("no migration registered from schema version {current}"),
                    "export your data, clear the store, and reimport on a compatible version",
                ));
            }
        }
    }
    Ok(())
}

/// Runs the five-branch open algorithm against an already-opened engine.
/// `allow_destructive` gates the partial-schema repair branch: when
/// `false` and a partial schema is detected, this returns a `SchemaError`
/// instead of silently dropping whatever objects exist. `default_collection_config`
/// sizes the `default` collection's vector table at bootstrap time (a store
/// reopened at `CURRENT_SCHEMA_VERSION` ignores it — the dimension of an
/// existing `default` collection is never changed implicitly).
pub fn ensure_schema(
    engine: &mut SqlEngine,
    allow_destructive: bool,
    default_collection_config: CollectionConfig,
) -> Result<()> {
    engine.transaction(|txn| {
        let conn: &Connection = txn;
        let all_present = all_objects_present(conn)?;
        let any_present = any_object_present(conn)?;

        if !any_present {
            bootstrap(conn, default_collection_config)?;
            return Ok(());
        }

        if !all_present {
            if !allow_destructive {
                return Err(Error::schema(
                    "store has a partial schema (some but not all required objects exist)",
                    "reopen with allow_destructive_repair=true to drop and recreate the schema, after exporting any data you need",
                ));
            }
            drop_all(conn)?;
            bootstrap(conn, default_collection_config)?;
            return Ok(());
        }

        let version = read_schema_version(conn)?.unwrap_or(0);
        if version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }
        if version < CURRENT_SCHEMA_VERSION {
            run_migrations(conn, version)?;
            return Ok(());
        }
        Err(Error::schema(
            format!(
                "store schema version {version} is newer than this build supports ({CURRENT_SCHEMA_VERSION})"
            ),
            "upgrade to a newer build of this crate before opening this store",
        ))
    })
}

pub fn ensure_collection_exists(engine: &mut SqlEngine, collection: &Collection) -> Result<()> {
    engine.transaction(|txn| {
        let conn: &Connection = txn;
        let table = collection.vector_table_name();
        conn.execute(
            &vector_table_ddl(collection.config.dimensions, collection.config.distance_metric.as_vec0_str()),
            [],
        )?;
        let _ = table;
        insert_collection_row(conn, collection)
    })
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FtsValidation {
    pub valid: bool,
    pub docs_count: i64,
    pub fts_count: i64,
}

/// Compares document and FTS row counts for `collection` (I2). Purely
/// observational — never mutates.
pub fn validate_fts_index(engine: &SqlEngine, collection: &str) -> Result<FtsValidation> {
    let conn = engine.connection();
    let docs_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE collection = ?1",
        params![collection],
        |row| row.get(0),
    )?;
    let fts_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents d
         JOIN documents_fts f ON d.rowid = f.rowid
         WHERE d.collection = ?1",
        params![collection],
        |row| row.get(0),
    )?;
    Ok(FtsValidation {
        valid: docs_count == fts_count,
        docs_count,
        fts_count,
    })
}

const REBUILD_BATCH_SIZE: usize = 64;

/// Clears FTS rows for `collection` and re-inserts them from `documents`
/// in batches, to bound peak memory. The official recovery path for a
/// store whose FTS coverage has drifted from `documents` (I2).
pub fn rebuild_fts_index(engine: &mut SqlEngine, collection: &str) -> Result<()> {
    engine.transaction(|txn| {
        let conn: &Connection = txn;
        conn.execute(
            "DELETE FROM documents_fts WHERE rowid IN (SELECT rowid FROM documents WHERE collection = ?1)",
            params![collection],
        )?;

        let rowids: Vec<i64> = {
            let mut stmt =
                conn.prepare("SELECT rowid FROM documents WHERE collection = ?1 ORDER BY rowid")?;
            let rows = stmt.query_map(params![collection], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        for batch in rowids.chunks(REBUILD_BATCH_SIZE) {
            for rowid in batch {
                conn.execute(
                    "INSERT INTO documents_fts (rowid, title, content, metadata)
                     SELECT rowid, title, content, metadata FROM documents WHERE rowid = ?1",
                    params![rowid],
                )?;
            }
        }
        Ok(())
    })
}

/// Opt-in, destructive repair for stores written by an external/legacy
/// writer that injected a `collection` discriminator into `metadata`
/// instead of the `collection` column. Extracts that value into the real
/// column and strips it from `metadata` to restore I1. A no-op against a
/// store that never had the bug (no document's metadata has a top-level
/// `collection` key). Never invoked automatically by `ensure_schema`.
pub fn extract_collection_discriminator(engine: &mut SqlEngine) -> Result<usize> {
    engine.transaction(|txn| {
        let conn: &Connection = txn;
        let candidates: Vec<(i64, String)> = {
            let mut stmt = conn.prepare(
                "SELECT rowid, metadata FROM documents WHERE json_extract(metadata, '$.collection') IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                let rowid: i64 = row.get(0)?;
                let metadata: String = row.get(1)?;
                Ok((rowid, metadata))
            })?;
            rows.filter_map(|r| r.ok()).collect()
        };

        let mut repaired = 0;
        for (rowid, metadata_json) in candidates {
            let mut value: serde_json::Value = serde_json::from_str(&metadata_json)?;
            let discriminator = value
                .as_object()
                .and_then(|o| o.get("collection"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let Some(discriminator) = discriminator else {
                continue;
            };
            if let Some(obj) = value.as_object_mut() {
                obj.remove("collection");
            }
            let stripped = serde_json::to_string(&value)?;
            conn.execute(
                "UPDATE documents SET collection = ?1, metadata = ?2 WHERE rowid = ?3",
                params![discriminator, stripped, rowid],
            )?;
            repaired += 1;
        }
        Ok(repaired)
    })
}
