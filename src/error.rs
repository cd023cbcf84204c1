use thiserror::Error;

use crate::store::StoreError;

/// Library error type for configuration and collaborator setup.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration or seed file error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
