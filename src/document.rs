//! Document domain type and input validation for the write pipeline (C3).

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::defaults;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub rowid: i64,
    pub id: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub collection: String,
    pub metadata: Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A caller-supplied identifier, accepted as either a string or a number
/// and canonicalized to its string form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Str(String),
    Num(f64),
}

impl DocumentId {
    pub fn canonical(&self) -> Result<String> {
        match self {
            DocumentId::Str(s) => {
                if s.is_empty() {
                    Err(Error::validation_field("id", "id must be a non-empty string"))
                } else {
                    Ok(s.clone())
                }
            }
            DocumentId::Num(n) => {
                if !n.is_finite() {
                    Err(Error::validation_field("id", "numeric id must be finite"))
                } else if n.fract() == 0.0 {
                    Ok(format!("{}", *n as i64))
                } else {
                    Ok(n.to_string())
                }
            }
        }
    }
}

/// The input accepted by `insert_document_with_embedding`, prior to id
/// assignment and validation.
#[derive(Debug, Clone, Default)]
pub struct DocumentInput {
    pub id: Option<DocumentId>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<Value>,
}

/// Validates a `DocumentInput`'s rejection rules (title/content presence,
/// metadata shape). Does not assign an id; that happens during insertion.
pub fn validate_document(input: &DocumentInput) -> Result<()> {
    let title_empty = input.title.as_deref().map(str::is_empty).unwrap_or(true);
    let content_empty = input.content.as_deref().map(str::is_empty).unwrap_or(true);
    if title_empty && content_empty {
        return Err(Error::validation(
            "document must have a non-empty title or content",
        ));
    }

    if let Some(metadata) = &input.metadata {
        if metadata.is_array() {
            return Err(Error::validation_field(
                "metadata",
                "metadata must be a structured object, not an array",
            ));
        }
        if !metadata.is_object() && !metadata.is_null() {
            return Err(Error::validation_field(
                "metadata",
                "metadata must be a JSON object",
            ));
        }
        if let Some(obj) = metadata.as_object() {
            if obj.is_empty() {
                // an explicitly empty object is valid; nothing further to check
            } else {
                let size = serde_json::to_vec(metadata).map(|v| v.len()).unwrap_or(0);
                if size > defaults::METADATA_WARN_BYTES {
                    tracing::warn!(
                        size,
                        threshold = defaults::METADATA_WARN_BYTES,
                        "document metadata exceeds warn threshold"
                    );
                }
            }
        }
    }

    Ok(())
}

/// Generates a fresh id when the caller didn't supply one: a monotonic
/// millisecond timestamp plus a random suffix, guaranteeing global
/// uniqueness within a store without a round-trip to check for collisions.
pub fn generate_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..u32::MAX);
    format!("{millis:x}-{suffix:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_missing_title_and_content() {
        let input = DocumentInput::default();
        assert!(validate_document(&input).is_err());
    }

    #[test]
    fn test_accept_title_only() {
        let input = DocumentInput {
            title: Some("hello".into()),
            ..Default::default()
        };
        assert!(validate_document(&input).is_ok());
    }

    #[test]
    fn test_reject_array_metadata() {
        let input = DocumentInput {
            content: Some("x".into()),
            metadata: Some(serde_json::json!([1, 2, 3])),
            ..Default::default()
        };
        assert!(validate_document(&input).is_err());
    }

    #[test]
    fn test_numeric_id_canonicalizes_without_decimal() {
        let id = DocumentId::Num(42.0);
        assert_eq!(id.canonical().unwrap(), "42");
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
