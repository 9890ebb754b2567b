use std::path::PathBuf;

use relauth_core::engine::CheckError;
use relauth_core::schema::SchemaError;
use relauth_storage::StorageError;

use crate::config::ConfigError;
use crate::loader::TupleFileError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("tuple file error: {0}")]
    TupleFile(#[from] TupleFileError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("evaluation error: {0}")]
    Engine(#[from] CheckError),
}

impl AppError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
