//! Search Pipeline (C4): candidate generation from up to three signals
//! (FTS, vector, LIKE), rank-based fusion, collection scoping, and result
//! assembly.

use std::collections::HashMap;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::embedding::embedding_to_bytes;
use crate::engine::SqlEngine;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    Rrf,
    Weighted,
}

impl Default for FusionMethod {
    fn default() -> Self {
        FusionMethod::Rrf
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FusionWeights {
    pub fts: Option<f64>,
    pub vec: Option<f64>,
    pub like_: Option<f64>,
}

impl FusionWeights {
    fn fts(&self) -> f64 {
        self.fts.unwrap_or(1.0)
    }
    fn vec(&self) -> f64 {
        self.vec.unwrap_or(1.0)
    }
    fn like(&self) -> f64 {
        self.like_.unwrap_or(0.5)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FusionConfig {
    pub method: FusionMethod,
    pub weights: FusionWeights,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: String,
    pub query: SearchQuery,
    pub limit: usize,
    pub fusion: FusionConfig,
    pub enable_like_search: bool,
    pub min_score: f64,
    pub include_metadata: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            collection: crate::collection::DEFAULT_COLLECTION.to_string(),
            query: SearchQuery::default(),
            limit: 10,
            fusion: FusionConfig::default(),
            enable_like_search: false,
            min_score: 0.0,
            include_metadata: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub fts: Option<f64>,
    pub vec: Option<f64>,
    pub like_: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub rowid: i64,
    pub score: f64,
    pub scores: ScoreBreakdown,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// Splits free-text input into Unicode-alphanumeric terms and builds an
/// FTS5 MATCH expression with per-term prefix matching, ANDed together.
/// Uses `char::is_alphanumeric` (not ASCII-only) so non-ASCII terms
/// (Cyrillic, CJK) survive sanitization instead of being stripped to
/// nothing.
pub fn sanitize_fts_query(query: &str) -> String {
    let query = query.trim();
    if query.is_empty() {
        return String::new();
    }

    let terms: Vec<String> = query
        .split_whitespace()
        .filter_map(|term| {
            let clean: String = term
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                .collect();
            if clean.is_empty() {
                None
            } else {
                Some(format!("\"{clean}\"*"))
            }
        })
        .collect();

    terms.join(" AND ")
}

struct Candidate {
    rowid: i64,
    rank: usize,
    native_score: f64,
    /// A signal-specific snippet already located around the match, when the
    /// signal can produce one cheaply (FTS5's `snippet()` offsets, or a
    /// LIKE match's byte position). `None` for vector candidates, which
    /// carry no textual match position.
    snippet: Option<String>,
}

/// Width, in bytes, of the FTS5 `snippet()` window (passed as its `max_tokens`
/// argument) and of the LIKE-match window computed manually below.
const SNIPPET_MAX_TOKENS: i64 = 32;
const LIKE_SNIPPET_RADIUS_BYTES: usize = 80;

fn fts_candidates(
    engine: &SqlEngine,
    collection: &str,
    text: &str,
    k: usize,
) -> Result<Vec<Candidate>> {
    let fts_query = sanitize_fts_query(text);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }
    let conn = engine.connection();
    let mut stmt = conn.prepare(
        "SELECT d.rowid, bm25(documents_fts) as score,
                snippet(documents_fts, 1, '', '', '...', ?4) as snippet
         FROM documents d
         JOIN documents_fts f ON d.rowid = f.rowid
         WHERE d.collection = ?1 AND documents_fts MATCH ?2
         ORDER BY score
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(
        params![collection, fts_query, k as i64, SNIPPET_MAX_TOKENS],
        |row| {
            let rowid: i64 = row.get(0)?;
            let score: f64 = row.get(1)?;
            let snippet: Option<String> = row.get(2)?;
            Ok((rowid, score, snippet))
        },
    )?;
    let mut out = Vec::new();
    for (rank, row) in rows.enumerate() {
        let (rowid, score, snippet) = row?;
        out.push(Candidate {
            rowid,
            rank: rank + 1,
            native_score: score,
            snippet: snippet.filter(|s| !s.is_empty()),
        });
    }
    Ok(out)
}

fn vector_candidates(
    engine: &SqlEngine,
    collection_name: &str,
    vector_table: &str,
    vector: &[f32],
    k: usize,
) -> Result<Vec<Candidate>> {
    let bytes = embedding_to_bytes(vector);
    let conn = engine.connection();
    let sql = format!(
        "SELECT v.rowid, v.distance FROM {vector_table} v
         JOIN documents d ON d.rowid = v.rowid
         WHERE v.embedding MATCH ?1 AND k = ?2 AND d.collection = ?3
         ORDER BY v.distance"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![bytes, k as i64, collection_name], |row| {
        let rowid: i64 = row.get(0)?;
        let distance: f64 = row.get(1)?;
        Ok((rowid, distance))
    })?;
    let mut out = Vec::new();
    for (rank, row) in rows.enumerate() {
        let (rowid, distance) = row?;
        out.push(Candidate {
            rowid,
            rank: rank + 1,
            native_score: distance,
            snippet: None,
        });
    }
    Ok(out)
}

/// Very short patterns and bare stop-words are rejected before issuing
/// LIKE, to bound the cost of an unindexed substring scan.
const LIKE_STOPWORDS: &[&str] = &["the", "a", "an", "of", "to", "and", "is", "in"];
const LIKE_MIN_LEN: usize = 2;

fn like_candidates(
    engine: &SqlEngine,
    collection: &str,
    text: &str,
    k: usize,
) -> Result<Vec<Candidate>> {
    let pattern = text.trim();
    if pattern.len() < LIKE_MIN_LEN || LIKE_STOPWORDS.contains(&pattern.to_ascii_lowercase().as_str()) {
        return Ok(Vec::new());
    }
    // No lower-casing of pattern or column: SQLite's built-in LOWER() is
    // ASCII-only, so lower-casing either side would silently fail to fold
    // non-ASCII case and desync the match. Non-ASCII LIKE is documented as
    // case-sensitive; case-insensitive needs go through FTS instead.
    let escaped = pattern.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    let like_pattern = format!("%{escaped}%");
    let conn = engine.connection();
    let mut stmt = conn.prepare(
        "SELECT rowid, content FROM documents
         WHERE collection = ?1 AND (content LIKE ?2 ESCAPE '\\' OR title LIKE ?2 ESCAPE '\\')
         ORDER BY rowid
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![collection, like_pattern, k as i64], |row| {
        let rowid: i64 = row.get(0)?;
        let content: Option<String> = row.get(1)?;
        Ok((rowid, content))
    })?;
    let mut out = Vec::new();
    for (rank, row) in rows.enumerate() {
        let (rowid, content) = row?;
        let snippet = content.as_deref().and_then(|c| like_match_snippet(c, pattern));
        out.push(Candidate {
            rowid,
            rank: rank + 1,
            native_score: 0.0,
            snippet,
        });
    }
    Ok(out)
}

/// Builds a snippet centered on the first occurrence of `pattern` in
/// `content`, windowed to `LIKE_SNIPPET_RADIUS_BYTES` on either side and
/// clamped to char boundaries. Returns `None` if `pattern` isn't found in
/// `content` (e.g. the match came from `title` instead).
fn like_match_snippet(content: &str, pattern: &str) -> Option<String> {
    let start_match = content.find(pattern)?;
    let mut start = start_match.saturating_sub(LIKE_SNIPPET_RADIUS_BYTES);
    while start > 0 && !content.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start_match + pattern.len() + LIKE_SNIPPET_RADIUS_BYTES).min(content.len());
    while end < content.len() && !content.is_char_boundary(end) {
        end += 1;
    }
    Some(content[start..end].to_string())
}

fn rrf_contribution(rank: usize, k: u32) -> f64 {
    1.0 / (k as f64 + rank as f64)
}

fn min_max_normalize(candidates: &[Candidate]) -> HashMap<i64, f64> {
    if candidates.is_empty() {
        return HashMap::new();
    }
    let min = candidates
        .iter()
        .map(|c| c.native_score)
        .fold(f64::INFINITY, f64::min);
    let max = candidates
        .iter()
        .map(|c| c.native_score)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut out = HashMap::new();
    for c in candidates {
        let normalized = if (max - min).abs() < f64::EPSILON {
            1.0
        } else {
            (c.native_score - min) / (max - min)
        };
        out.insert(c.rowid, normalized);
    }
    out
}

struct FusedResult {
    rowid: i64,
    score: f64,
    scores: ScoreBreakdown,
}

fn fuse(
    fts: Vec<Candidate>,
    vec: Vec<Candidate>,
    like: Vec<Candidate>,
    fusion: &FusionConfig,
) -> Vec<FusedResult> {
    let weights = &fusion.weights;
    let mut scores: HashMap<i64, ScoreBreakdown> = HashMap::new();

    match fusion.method {
        FusionMethod::Rrf => {
            for c in &fts {
                scores.entry(c.rowid).or_default().fts = Some(rrf_contribution(c.rank, defaults::RRF_K));
            }
            for c in &vec {
                scores.entry(c.rowid).or_default().vec = Some(rrf_contribution(c.rank, defaults::RRF_K));
            }
            for c in &like {
                scores.entry(c.rowid).or_default().like_ = Some(rrf_contribution(c.rank, defaults::RRF_K));
            }
        }
        FusionMethod::Weighted => {
            // bm25() and vector distance both have "lower is better" polarity,
            // so both normalized signals are inverted after min-max scaling.
            let fts_norm = min_max_normalize(&fts);
            let fts_norm: HashMap<i64, f64> = fts_norm.into_iter().map(|(k, v)| (k, 1.0 - v)).collect();
            let vec_norm = min_max_normalize(&vec);
            let vec_norm: HashMap<i64, f64> = vec_norm.into_iter().map(|(k, v)| (k, 1.0 - v)).collect();
            let like_norm = min_max_normalize(&like);
            for (rowid, v) in fts_norm {
                scores.entry(rowid).or_default().fts = Some(v);
            }
            for (rowid, v) in vec_norm {
                scores.entry(rowid).or_default().vec = Some(v);
            }
            for (rowid, v) in like_norm {
                scores.entry(rowid).or_default().like_ = Some(v);
            }
        }
    }

    let mut fused: Vec<FusedResult> = scores
        .into_iter()
        .map(|(rowid, breakdown)| {
            let score = breakdown.fts.unwrap_or(0.0) * weights.fts()
                + breakdown.vec.unwrap_or(0.0) * weights.vec()
                + breakdown.like_.unwrap_or(0.0) * weights.like();
            FusedResult {
                rowid,
                score,
                scores: breakdown,
            }
        })
        .collect();

    // Higher score first; ties broken by lower rowid (earlier inserted),
    // deterministic and stable across runs.
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.rowid.cmp(&b.rowid))
    });
    fused
}

fn assemble(
    engine: &SqlEngine,
    collection: &str,
    fused: Vec<FusedResult>,
    limit: usize,
    min_score: f64,
    include_metadata: bool,
    fts_snippets: &HashMap<i64, String>,
    like_snippets: &HashMap<i64, String>,
) -> Result<Vec<SearchResult>> {
    let conn = engine.connection();
    let mut out = Vec::with_capacity(limit.min(fused.len()));

    for f in fused.into_iter().filter(|f| f.score >= min_score).take(limit) {
        let row = conn.query_row(
            "SELECT id, title, content, metadata FROM documents WHERE rowid = ?1 AND collection = ?2",
            params![f.rowid, collection],
            |row| {
                let id: String = row.get(0)?;
                let title: Option<String> = row.get(1)?;
                let content: Option<String> = row.get(2)?;
                let metadata: String = row.get(3)?;
                Ok((id, title, content, metadata))
            },
        );
        let Ok((id, title, content, metadata_str)) = row else {
            continue;
        };
        // Prefer a snippet located around the actual match: FTS offsets when
        // FTS contributed this result, a LIKE-match window when LIKE did,
        // and only fall back to a bare content prefix when neither signal
        // contributed (e.g. a vector-only hit).
        let snippet = fts_snippets
            .get(&f.rowid)
            .or_else(|| like_snippets.get(&f.rowid))
            .cloned()
            .or_else(|| {
                content.as_deref().map(|c| {
                    let max = 200.min(c.len());
                    let mut end = max;
                    while end > 0 && !c.is_char_boundary(end) {
                        end -= 1;
                    }
                    c[..end].to_string()
                })
            });
        let metadata = if include_metadata {
            serde_json::from_str(&metadata_str).ok()
        } else {
            None
        };
        out.push(SearchResult {
            id,
            rowid: f.rowid,
            score: f.score,
            scores: f.scores,
            title,
            snippet,
            metadata,
        });
    }
    Ok(out)
}

/// Runs a hybrid search: generates up to three candidate sets scoped to
/// `request.collection`, fuses them, and assembles the fused, truncated
/// result list.
pub fn search(
    engine: &SqlEngine,
    request: &SearchRequest,
    vector_table: &str,
) -> Result<SearchResponse> {
    if request.limit == 0 {
        return Ok(SearchResponse { results: Vec::new() });
    }

    let k = (request.limit * 4).max(50);

    let fts = match &request.query.text {
        Some(text) if !text.trim().is_empty() => fts_candidates(engine, &request.collection, text, k)?,
        _ => Vec::new(),
    };

    let vec = match &request.query.vector {
        Some(vector) => vector_candidates(engine, &request.collection, vector_table, vector, k)?,
        None => Vec::new(),
    };

    let like = if request.enable_like_search {
        match &request.query.text {
            Some(text) if !text.trim().is_empty() => like_candidates(engine, &request.collection, text, k)?,
            _ => Vec::new(),
        }
    } else {
        Vec::new()
    };

    let fts_snippets: HashMap<i64, String> = fts
        .iter()
        .filter_map(|c| c.snippet.clone().map(|s| (c.rowid, s)))
        .collect();
    let like_snippets: HashMap<i64, String> = like
        .iter()
        .filter_map(|c| c.snippet.clone().map(|s| (c.rowid, s)))
        .collect();

    let fused = fuse(fts, vec, like, &request.fusion);
    let results = assemble(
        engine,
        &request.collection,
        fused,
        request.limit,
        request.min_score,
        request.include_metadata,
        &fts_snippets,
        &like_snippets,
    )?;
    Ok(SearchResponse { results })
}
