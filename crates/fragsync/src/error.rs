//! Typed errors for callers that branch on what went wrong.
//!
//! Most plumbing returns `anyhow::Result`; these variants are wrapped into
//! it and recovered with `downcast_ref` by the HTTP layer and the CLI.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("unknown connector: {0}")]
    UnknownConnector(String),

    #[error("unknown connector type: {0}")]
    UnknownConnectorType(String),

    #[error("connector state not found: {0}")]
    StateNotFound(String),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

impl SyncError {
    /// Find a `SyncError` anywhere in an error chain.
    pub fn find(err: &anyhow::Error) -> Option<&SyncError> {
        err.chain().find_map(|e| e.downcast_ref::<SyncError>())
    }
}
