//! Error taxonomy for geocluster.

use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    /// A required configuration key is missing or holds the wrong type.
    #[error("configuration error: {0}")]
    Config(String),

    /// A strategy reference did not resolve to a known implementation.
    #[error("unknown strategy: {0}")]
    Strategy(String),

    /// Store read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    /// The compute engine could not run a job at all.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
