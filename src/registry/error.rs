//! Registry error types

use thiserror::Error;

/// Error type for registry operations
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A session for this share id is already tracked
    #[error("share `{share_id}` already exists")]
    DuplicateShare { share_id: String },
}

impl RegistryError {
    pub fn duplicate(share_id: impl Into<String>) -> Self {
        RegistryError::DuplicateShare {
            share_id: share_id.into(),
        }
    }
}
