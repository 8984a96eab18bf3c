//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Per-file failures ([`IndexError::Parse`], [`IndexError::Transcription`])
//! are recorded in the run report and the run continues. Run-level failures
//! ([`IndexError::ModelUnavailable`], [`IndexError::DimensionMismatch`], and
//! a [`IndexError::StoreUnavailable`] that survives its retries) abort the
//! run while keeping everything already committed.

use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Unreadable or corrupt input file.
    #[error("failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },

    /// Embedding or transcription model cannot be resolved (e.g. offline with
    /// no cached artifact).
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Embedder output disagrees with the collection's established dimension.
    #[error("dimension mismatch: collection '{collection}' has {expected} dims, embedder produced {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// The vector store cannot be reached. Retryable.
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// The vector store rejected an operation.
    #[error("vector store error: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// An upsert call contained malformed units; nothing was written.
    #[error("invalid batch, rejected {} unit(s): {}", .0.len(), format_rejections(.0))]
    InvalidBatch(Vec<(String, String)>),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("transcription failed for {file}: {reason}")]
    Transcription { file: String, reason: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_rejections(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(id, reason)| format!("{} ({})", id, reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl IndexError {
    /// Whether the orchestrator should retry the failed operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::StoreUnavailable(_))
    }

    /// Whether the error aborts a whole ingestion run rather than one file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::ModelUnavailable(_)
                | IndexError::DimensionMismatch { .. }
                | IndexError::StoreUnavailable(_)
                | IndexError::Store(_)
        )
    }

    pub fn parse(file: impl Into<String>, err: ExtractError) -> Self {
        IndexError::Parse {
            file: file.into(),
            reason: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_) => IndexError::StoreUnavailable(err.to_string()),
            other => IndexError::Store(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(IndexError::StoreUnavailable("down".into()).is_retryable());
        assert!(!IndexError::ModelUnavailable("clip".into()).is_retryable());
        assert!(!IndexError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn per_file_errors_are_not_fatal() {
        let parse = IndexError::Parse {
            file: "a.pdf".into(),
            reason: "bad xref".into(),
        };
        assert!(!parse.is_fatal());
        assert!(IndexError::DimensionMismatch {
            collection: "c".into(),
            expected: 512,
            actual: 384
        }
        .is_fatal());
    }

    #[test]
    fn invalid_batch_lists_rejected_ids() {
        let err = IndexError::InvalidBatch(vec![
            ("a_chunk_0".into(), "vector has 3 dims".into()),
            ("b_image_0".into(), "empty document_text".into()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 unit(s)"));
        assert!(msg.contains("a_chunk_0 (vector has 3 dims)"));
        assert!(msg.contains("b_image_0"));
    }

    #[test]
    fn pool_timeout_maps_to_store_unavailable() {
        let err: IndexError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, IndexError::StoreUnavailable(_)));
    }
}
