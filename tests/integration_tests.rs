//! Integration tests exercising the hybrid-search core end-to-end: schema
//! lifecycle, the write pipeline's FTS-sync and positional-alignment
//! guarantees, the three-signal search pipeline, and the RPC boundary
//! (`Store`) that fronts all of it.
//!
//! Covers fresh-store insert/search, Cyrillic correctness, metadata
//! purity, FTS repair, hybrid fusion, and collection scoping end to end.

use hybridstore::document::{DocumentId, DocumentInput};
use hybridstore::search::{FusionConfig, FusionMethod, FusionWeights, SearchQuery, SearchRequest};
use hybridstore::write::InsertOptions;
use hybridstore::{OpenOptions, Store};

fn doc_id(id: &str) -> DocumentId {
    DocumentId::Str(id.to_string())
}

async fn open_store() -> Store {
    Store::open(None, OpenOptions::default()).await.unwrap()
}

// Scenario 1: fresh store, default collection.
#[tokio::test]
async fn fresh_store_insert_and_search_default_collection() {
    let store = open_store().await;
    let result = store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("d1")),
                content: Some("hello world".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.id, "d1");
    assert!(result.embedding_generated);

    let response = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("hello".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, "d1");
    assert!(response.results[0].scores.fts.is_some());
}

// Scenario 2: Cyrillic correctness — Unicode tokenizer and the documented
// case-sensitivity of LIKE on non-ASCII text.
#[tokio::test]
async fn cyrillic_is_searchable_via_fts_and_case_sensitive_via_like() {
    let store = open_store().await;
    store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("ru1")),
                content: Some("Пушкин написал роман".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    let fts_response = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("Пушкин".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(fts_response.results.len(), 1);
    assert_eq!(fts_response.results[0].id, "ru1");
    assert!(fts_response.results[0].scores.fts.is_some());

    // lower-cased prefix also matches via FTS: the tokenizer folds case.
    let prefix_response = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("пуш".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(prefix_response.results.len(), 1);
    assert_eq!(prefix_response.results[0].id, "ru1");

    // LIKE on the exact stored casing matches.
    let like_exact = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("Пушкин".into()),
                vector: None,
            },
            enable_like_search: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(like_exact.results.len(), 1);

    // LIKE on a lower-cased Cyrillic pattern does not match (documented
    // case-sensitivity: SQLite's built-in LOWER is ASCII-only, so neither
    // side is folded).
    let like_lower = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("пушкин".into()),
                vector: None,
            },
            enable_like_search: true,
            fusion: FusionConfig {
                method: FusionMethod::Weighted,
                weights: FusionWeights {
                    fts: Some(0.0),
                    vec: Some(0.0),
                    like_: Some(1.0),
                },
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(like_lower.results.is_empty());
}

// Scenario 3: metadata purity — a user-supplied `collection` key inside
// metadata is preserved verbatim and never confused with the real
// discriminator column.
#[tokio::test]
async fn metadata_purity_collection_key_is_user_data() {
    let store = open_store().await;
    store.create_collection("docs", None).await.unwrap();
    store
        .insert_document_with_embedding(
            "docs",
            DocumentInput {
                id: Some(doc_id("m1")),
                content: Some("x".into()),
                metadata: Some(serde_json::json!({"collection": "user-value", "tags": ["a"]})),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    let rows = store
        .select(
            "SELECT collection, metadata FROM documents WHERE id = ?1",
            vec![rusqlite::types::Value::Text("m1".into())],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let collection = match &rows[0]["collection"] {
        rusqlite::types::Value::Text(s) => s.clone(),
        other => panic!("unexpected collection value: {other:?}"),
    };
    assert_eq!(collection, "docs");
    let metadata_str = match &rows[0]["metadata"] {
        rusqlite::types::Value::Text(s) => s.clone(),
        other => panic!("unexpected metadata value: {other:?}"),
    };
    let metadata: serde_json::Value = serde_json::from_str(&metadata_str).unwrap();
    assert_eq!(metadata["collection"], "user-value");
    assert_eq!(metadata["tags"][0], "a");
}

// Scenario 4: FTS repair — simulate a store produced by a buggy external
// writer (one document's FTS row silently missing), detect it with
// `validate_fts_index`, and recover with `rebuild_fts_index`.
#[tokio::test]
async fn validate_and_rebuild_fts_index_recovers_missing_rows() {
    let store = open_store().await;
    for i in 0..11 {
        store
            .insert_document_with_embedding(
                "default",
                DocumentInput {
                    id: Some(doc_id(&format!("d{i}"))),
                    content: Some(format!("document number {i}")),
                    ..Default::default()
                },
                InsertOptions::default(),
            )
            .await
            .unwrap();
    }

    // Directly delete one FTS row to simulate drift produced outside this
    // crate's write pipeline (which itself never leaves FTS out of sync).
    store
        .exec(
            "DELETE FROM documents_fts WHERE rowid = (SELECT rowid FROM documents WHERE id = 'd5')",
            vec![],
        )
        .await
        .unwrap();

    let before = store.validate_fts_index("default").await.unwrap();
    assert!(!before.valid);
    assert_eq!(before.docs_count, 11);
    assert_eq!(before.fts_count, 10);

    // The missing document is invisible to FTS search before repair.
    let missing = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("number".into()),
                vector: None,
            },
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(missing.results.iter().all(|r| r.id != "d5"));

    store.rebuild_fts_index(Some("default")).await.unwrap();

    let after = store.validate_fts_index("default").await.unwrap();
    assert!(after.valid);
    assert_eq!(after.docs_count, 11);
    assert_eq!(after.fts_count, 11);

    let recovered = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("number".into()),
                vector: None,
            },
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(recovered.results.iter().any(|r| r.id == "d5"));
}

// Scenario 5: hybrid fusion — a text query strongly favors one document, a
// vector query strongly favors another; RRF surfaces both in the top 2,
// while zeroing a signal's weight isolates the other signal's winner.
#[tokio::test]
async fn hybrid_fusion_combines_and_isolates_signals() {
    let store = open_store().await;
    store.create_collection("hybrid", Some(4)).await.unwrap();

    store
        .insert_document_with_embedding(
            "hybrid",
            DocumentInput {
                id: Some(doc_id("a")),
                content: Some("xylophone marmalade xylophone marmalade xylophone".into()),
                ..Default::default()
            },
            InsertOptions {
                generate_embedding: false,
                embedding: Some(vec![1.0, 0.0, 0.0, 0.0]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    store
        .insert_document_with_embedding(
            "hybrid",
            DocumentInput {
                id: Some(doc_id("b")),
                content: Some("completely unrelated filler text about nothing".into()),
                ..Default::default()
            },
            InsertOptions {
                generate_embedding: false,
                embedding: Some(vec![0.0, 1.0, 0.0, 0.0]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Pad with a few more documents so both signals have a nontrivial
    // candidate pool to rank against.
    for i in 0..10 {
        store
            .insert_document_with_embedding(
                "hybrid",
                DocumentInput {
                    id: Some(doc_id(&format!("pad{i}"))),
                    content: Some(format!("padding document {i}")),
                    ..Default::default()
                },
                InsertOptions {
                    generate_embedding: false,
                    embedding: Some(vec![0.0, 0.0, 1.0, 0.0]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let rrf = store
        .search(SearchRequest {
            collection: "hybrid".into(),
            query: SearchQuery {
                text: Some("xylophone".into()),
                vector: Some(vec![0.0, 1.0, 0.0, 0.0]),
            },
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    let top_ids: Vec<&str> = rrf.results.iter().map(|r| r.id.as_str()).collect();
    assert!(top_ids.contains(&"a"));
    assert!(top_ids.contains(&"b"));

    let vec_only = store
        .search(SearchRequest {
            collection: "hybrid".into(),
            query: SearchQuery {
                text: Some("xylophone".into()),
                vector: Some(vec![0.0, 1.0, 0.0, 0.0]),
            },
            limit: 1,
            fusion: FusionConfig {
                method: FusionMethod::Weighted,
                weights: FusionWeights {
                    fts: Some(0.0),
                    vec: Some(1.0),
                    like_: Some(0.0),
                },
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(vec_only.results[0].id, "b");

    let fts_only = store
        .search(SearchRequest {
            collection: "hybrid".into(),
            query: SearchQuery {
                text: Some("xylophone".into()),
                vector: Some(vec![0.0, 1.0, 0.0, 0.0]),
            },
            limit: 1,
            fusion: FusionConfig {
                method: FusionMethod::Weighted,
                weights: FusionWeights {
                    fts: Some(1.0),
                    vec: Some(0.0),
                    like_: Some(0.0),
                },
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(fts_only.results[0].id, "a");
}

// Scenario 6: collection scoping — identical content in two collections
// never leaks across the boundary.
#[tokio::test]
async fn collection_scoping_prevents_cross_collection_leakage() {
    let store = open_store().await;
    store.create_collection("c1", None).await.unwrap();
    store.create_collection("c2", None).await.unwrap();

    store
        .insert_document_with_embedding(
            "c1",
            DocumentInput {
                id: Some(doc_id("a")),
                content: Some("apple".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();
    store
        .insert_document_with_embedding(
            "c2",
            DocumentInput {
                id: Some(doc_id("b")),
                content: Some("apple".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    let r1 = store
        .search(SearchRequest {
            collection: "c1".into(),
            query: SearchQuery {
                text: Some("apple".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(r1.results.len(), 1);
    assert_eq!(r1.results[0].id, "a");

    let r2 = store
        .search(SearchRequest {
            collection: "c2".into(),
            query: SearchQuery {
                text: Some("apple".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(r2.results.len(), 1);
    assert_eq!(r2.results[0].id, "b");
}

#[tokio::test]
async fn rejects_document_with_no_title_or_content() {
    let store = open_store().await;
    let result = store
        .insert_document_with_embedding(
            "default",
            DocumentInput::default(),
            InsertOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(hybridstore::Error::Validation { .. })));
}

#[tokio::test]
async fn search_with_limit_zero_returns_empty_without_error() {
    let store = open_store().await;
    let response = store
        .search(SearchRequest {
            collection: "default".into(),
            limit: 0,
            query: SearchQuery {
                text: Some("anything".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn search_against_nonexistent_collection_returns_empty_not_error() {
    let store = open_store().await;
    let response = store
        .search(SearchRequest {
            collection: "never-created".into(),
            query: SearchQuery {
                text: Some("x".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(response.results.is_empty());
}

// Batch insert where every third document lacks a caller-supplied id: all
// documents must still end up searchable, with no shared rowids and full
// FTS coverage (the positional-alignment invariant, I5).
#[tokio::test]
async fn bulk_insert_with_missing_ids_keeps_positional_alignment() {
    let store = open_store().await;
    let inputs: Vec<(DocumentInput, InsertOptions)> = (0..30)
        .map(|i| {
            let input = if i % 3 == 0 {
                DocumentInput {
                    content: Some(format!("bulk doc {i}")),
                    ..Default::default()
                }
            } else {
                DocumentInput {
                    id: Some(doc_id(&format!("bulk-{i}"))),
                    content: Some(format!("bulk doc {i}")),
                    ..Default::default()
                }
            };
            (input, InsertOptions::default())
        })
        .collect();

    let result = store.bulk_insert_documents("default", inputs).await.unwrap();
    assert_eq!(result.saved.len(), 30);
    assert!(result.failed.is_empty());

    let validation = store.validate_fts_index("default").await.unwrap();
    assert_eq!(validation.docs_count, 30);
    assert_eq!(validation.fts_count, 30);

    let every_doc_searchable = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("bulk".into()),
                vector: None,
            },
            limit: 50,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(every_doc_searchable.results.len(), 30);
}

#[tokio::test]
async fn reinsert_with_same_id_replaces_atomically() {
    let store = open_store().await;
    store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("d1")),
                content: Some("version one".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();
    store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("d1")),
                content: Some("version two".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    let rows = store
        .select(
            "SELECT content FROM documents WHERE id = 'd1'",
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let response = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("version".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].snippet.as_deref(), Some("version two"));
}

#[tokio::test]
async fn export_import_round_trip_preserves_search_results() {
    let store = open_store().await;
    for i in 0..5 {
        store
            .insert_document_with_embedding(
                "default",
                DocumentInput {
                    id: Some(doc_id(&format!("d{i}"))),
                    content: Some(format!("round trip content {i}")),
                    ..Default::default()
                },
                InsertOptions::default(),
            )
            .await
            .unwrap();
    }
    let before = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("round trip".into()),
                vector: None,
            },
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    let bytes = store.export().await.unwrap();
    let restored = open_store().await;
    restored.import(bytes).await.unwrap();

    let after = restored
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("round trip".into()),
                vector: None,
            },
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    let before_ids: Vec<&str> = before.results.iter().map(|r| r.id.as_str()).collect();
    let after_ids: Vec<&str> = after.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(before_ids, after_ids);
}

#[tokio::test]
async fn create_collection_rejects_duplicate_name() {
    let store = open_store().await;
    store.create_collection("dup", None).await.unwrap();
    let result = store.create_collection("dup", None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn list_and_get_collection_info_reports_document_counts() {
    let store = open_store().await;
    store.create_collection("counted", None).await.unwrap();
    store
        .insert_document_with_embedding(
            "counted",
            DocumentInput {
                content: Some("one".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();
    store
        .insert_document_with_embedding(
            "counted",
            DocumentInput {
                content: Some("two".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    let info = store.get_collection_info("counted").await.unwrap();
    assert_eq!(info.document_count, 2);

    let all = store.list_collections().await.unwrap();
    assert!(all.iter().any(|c| c.collection.name == "counted" && c.document_count == 2));
}

#[tokio::test]
async fn clear_collection_removes_docs_fts_and_queue_rows() {
    let store = open_store().await;
    store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                content: Some("to be cleared".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    store.clear(Some("default")).await.unwrap();

    let docs = store.select("SELECT id FROM documents", vec![]).await.unwrap();
    assert!(docs.is_empty());
    let queue = store
        .select("SELECT id FROM embedding_queue", vec![])
        .await
        .unwrap();
    assert!(queue.is_empty());

    let validation = store.validate_fts_index("default").await.unwrap();
    assert!(validation.valid);
    assert_eq!(validation.docs_count, 0);
}

#[tokio::test]
async fn embedding_queue_drain_cycle_completes_with_explicit_vector() {
    let store = open_store().await;
    store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("needs-embedding")),
                content: Some("please embed me".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    let job = store
        .next_pending_embedding_job(Some("default"))
        .await
        .unwrap()
        .expect("a job should have been enqueued");
    assert_eq!(job.document_id, "needs-embedding");
    assert_eq!(job.status, hybridstore::embedding::JobStatus::Processing);

    let vector = vec![0.1_f32; 384];
    store
        .complete_embedding_job(job.id, Some(vector.clone()), None)
        .await
        .unwrap();

    let response = store
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: None,
                vector: Some(vector),
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, "needs-embedding");
}

#[tokio::test]
async fn schema_is_noop_on_reopen_at_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.sqlite3");
    let path_str = path.to_str().unwrap();

    let first = Store::open(Some(path_str), OpenOptions::default()).await.unwrap();
    first
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("persisted")),
                content: Some("still here after reopen".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();
    first.close().await;

    let second = Store::open(Some(path_str), OpenOptions::default()).await.unwrap();
    let response = second
        .search(SearchRequest {
            collection: "default".into(),
            query: SearchQuery {
                text: Some("reopen".into()),
                vector: None,
            },
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, "persisted");
}

#[tokio::test]
async fn prune_embedding_queue_removes_terminal_rows_past_retention() {
    let store = open_store().await;
    store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("to-complete")),
                content: Some("will finish embedding".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();
    store
        .insert_document_with_embedding(
            "default",
            DocumentInput {
                id: Some(doc_id("to-fail")),
                content: Some("will fail embedding".into()),
                ..Default::default()
            },
            InsertOptions::default(),
        )
        .await
        .unwrap();

    let job1 = store.next_pending_embedding_job(None).await.unwrap().unwrap();
    store
        .complete_embedding_job(job1.id, Some(vec![0.1; 384]), None)
        .await
        .unwrap();

    let job2 = store.next_pending_embedding_job(None).await.unwrap().unwrap();
    store
        .complete_embedding_job(job2.id, None, Some("provider unavailable".into()))
        .await
        .unwrap();

    let count_rows = |value: &rusqlite::types::Value| -> i64 {
        match value {
            rusqlite::types::Value::Integer(n) => *n,
            other => panic!("unexpected count value: {other:?}"),
        }
    };

    let rows = store
        .select("SELECT COUNT(*) AS n FROM embedding_queue", Vec::new())
        .await
        .unwrap();
    assert_eq!(count_rows(&rows[0]["n"]), 2);

    // A negative retention window makes the cutoff strictly in the
    // future, so both terminal rows qualify for pruning regardless of
    // clock resolution.
    let pruned = store.prune_embedding_queue(Some(-1)).await.unwrap();
    assert_eq!(pruned, 2);

    let rows = store
        .select("SELECT COUNT(*) AS n FROM embedding_queue", Vec::new())
        .await
        .unwrap();
    assert_eq!(count_rows(&rows[0]["n"]), 0);
}
