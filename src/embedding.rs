//! Embedding job queue and the `EmbeddingProvider` collaborator seam.
//!
//! This crate never generates embeddings itself. The write pipeline (C3)
//! enqueues `EmbeddingJob` rows; draining them is the responsibility of an
//! external, caller-supplied worker that owns an `EmbeddingProvider` and
//! polls `Store::next_pending_embedding_job` / `Store::complete_embedding_job`.
//! This keeps the single-writer thread (C5) from ever blocking on a model
//! inference call.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingJob {
    pub id: i64,
    pub collection_name: String,
    pub document_id: String,
    pub text_content: String,
    pub priority: i32,
    pub status: JobStatus,
    pub retry_count: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub error_message: Option<String>,
}

/// Options accepted alongside a document insert that affect embedding
/// generation.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingOptions {
    pub priority: Option<i32>,
}

#[derive(Debug, ThisError)]
pub enum EmbeddingError {
    #[error("embedding provider returned a vector of the wrong dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider failed: {0}")]
    ProviderFailure(String),
}

/// External collaborator contract. This crate ships no production
/// implementation; a caller supplies one (e.g. backed by `fastembed` behind
/// the `fastembed-provider` feature, or a remote HTTP embedding service).
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Encodes a vector as the little-endian `f32` byte blob `sqlite-vec`'s
/// `vec0` tables accept.
pub fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(feature = "fastembed-provider")]
pub mod fastembed_provider {
    use super::{EmbeddingError, EmbeddingProvider};
    use fastembed::{InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Wraps `fastembed::TextEmbedding` behind a mutex since its `embed`
    /// call takes `&mut self`, while `EmbeddingProvider::embed` takes `&self`
    /// so it can be shared across a caller's polling loop without extra
    /// synchronization of its own.
    pub struct FastEmbedProvider {
        model: Mutex<TextEmbedding>,
        dimensions: usize,
    }

    impl FastEmbedProvider {
        pub fn try_new(dimensions: usize) -> Result<Self, EmbeddingError> {
            let model = TextEmbedding::try_new(InitOptions::default())
                .map_err(|e| EmbeddingError::ProviderFailure(e.to_string()))?;
            Ok(FastEmbedProvider {
                model: Mutex::new(model),
                dimensions,
            })
        }
    }

    impl EmbeddingProvider for FastEmbedProvider {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::ProviderFailure("embedding model lock poisoned".into()))?;
            let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
            model
                .embed(owned, None)
                .map_err(|e| EmbeddingError::ProviderFailure(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_byte_roundtrip() {
        let v = vec![1.0_f32, -2.5, 0.0, 384.25];
        let bytes = embedding_to_bytes(&v);
        assert_eq!(bytes.len(), v.len() * 4);
        let back = bytes_to_embedding(&bytes);
        assert_eq!(v, back);
    }

    #[test]
    fn test_job_status_round_trip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_terminal_status() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }
}
