use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds a caller may want to branch on.
///
/// Parse-level anomalies (malformed page records, unknown namespaces) are
/// recovered locally and counted in [`crate::stats::PipelineStats`]; only
/// resource-level failures surface through this enum.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no MediaWiki export found at {path:?}; pass --input or place a .xml/.xml.bz2 file there")]
    DumpNotFound { path: PathBuf },

    #[error("embedding dimension mismatch: index holds {expected}-dimensional vectors, batch produced {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector index not found at {path:?}; run `theseus build` to create it")]
    IndexNotBuilt { path: PathBuf },

    #[error("vector index is empty; nothing to search or export")]
    EmptyIndex,

    #[error("embedding backend failure: {0}")]
    Backend(String),
}
