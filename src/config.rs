//! Tunables for the storage engine, collected in one place rather than
//! scattered as magic numbers through `engine.rs`/`schema.rs`/`search.rs`.

/// SQLite pragma and schema-level constants. PRAGMA statements don't bind
/// parameters reliably, so these are interpolated via `format!` at
/// connection-open time rather than passed as bound params.
pub mod sqlite {
    /// Negative `cache_size` is interpreted by SQLite as KiB rather than pages.
    pub const PRAGMA_CACHE_SIZE_KIB_NEG: i64 = -8000;
    pub const PRAGMA_MMAP_SIZE_BYTES: i64 = 268_435_456;
    pub const PRAGMA_BUSY_TIMEOUT_MS: u32 = 5_000;
    pub const PRAGMA_WAL_AUTOCHECKPOINT_PAGES: u32 = 1_000;

    /// Unicode-aware tokenizer with diacritics folded, so `"café"` and
    /// `"cafe"` match. The default `fts5` ASCII tokenizer would silently
    /// drop non-ASCII alphabetics and break CJK/Cyrillic matching.
    pub const FTS_TOKENIZE: &str = "unicode61 remove_diacritics 2";
}

/// Defaults for a freshly created `Store`, overridable via `OpenOptions`.
pub mod defaults {
    /// Default collection name used when a caller doesn't specify one.
    pub const COLLECTION: &str = "default";

    /// Default embedding vector width, matching common small sentence
    /// embedding models (e.g. all-MiniLM-L6-v2).
    pub const VECTOR_DIMENSIONS: usize = 384;

    /// RRF constant `K`. Larger values flatten the influence of rank
    /// position; 60 is the commonly cited default in hybrid-search writeups.
    pub const RRF_K: u32 = 60;

    /// Upper bound on queued-but-undelivered RPC commands before `Store`
    /// methods start returning `Error::Resource` instead of blocking
    /// indefinitely on a stalled worker.
    pub const MAX_QUEUE_DEPTH: usize = 10_000;

    /// Default per-call RPC deadline. Advisory: once a command has been
    /// handed to SQLite there is no cooperative way to abort it mid-statement.
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    /// Warn (not reject) when a document's metadata JSON exceeds this many
    /// bytes; large free-form metadata tends to indicate misuse of the
    /// metadata field as a second content store.
    pub const METADATA_WARN_BYTES: usize = 1_048_576;

    /// Terminal (`completed`/`failed`) embedding queue rows older than this
    /// are eligible for pruning by `Store::prune_embedding_queue`.
    pub const EMBEDDING_QUEUE_RETENTION_DAYS: i64 = 30;
}

/// Options accepted by `Store::open`, distinct from the fixed defaults
/// above where a caller legitimately needs to override behavior per store.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub max_queue_depth: usize,
    pub default_timeout_ms: u64,
    pub vector_dimensions: usize,
    /// When `true`, `open` is permitted to run the destructive
    /// partial-schema repair path (see `schema::ensure_schema`). Defaults to
    /// `false`: a caller must opt into potentially dropping a half-written
    /// schema rather than have it happen silently.
    pub allow_destructive_repair: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            max_queue_depth: defaults::MAX_QUEUE_DEPTH,
            default_timeout_ms: defaults::DEFAULT_TIMEOUT_MS,
            vector_dimensions: defaults::VECTOR_DIMENSIONS,
            allow_destructive_repair: false,
        }
    }
}
