//! Fragment-level errors.
//!
//! These never abort a job: the pipeline reports them to the aggregator,
//! which logs them and adds them to `num_errors`.

use thiserror::Error;

/// Why a single fragment could not be ingested.
#[derive(Error, Debug)]
pub enum FragmentError {
    #[error("connector reported: {0:#}")]
    Source(anyhow::Error),

    #[error("failed to check chunk hash: {0:#}")]
    HashLookup(anyhow::Error),

    #[error("failed to get embeddings: {0:#}")]
    Embed(anyhow::Error),

    #[error("failed to add vector: {0:#}")]
    Write(anyhow::Error),
}

impl FragmentError {
    /// Short stage name, used as a structured log field.
    pub fn stage(&self) -> &'static str {
        match self {
            FragmentError::Source(_) => "source",
            FragmentError::HashLookup(_) => "hash_lookup",
            FragmentError::Embed(_) => "embed",
            FragmentError::Write(_) => "write",
        }
    }
}
