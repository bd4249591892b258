mod store;
mod sweep;

pub use store::{CheckpointMeta, CheckpointStore, InMemoryCheckpointStore};
pub use sweep::run_ttl_sweep;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("serializer error: {0}")]
    Serializer(#[from] surveyengine_serializer::SerializerError),
    #[error("no checkpoint for thread {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;
