//! Crate-wide error taxonomy.
//!
//! Every error the pipeline raises carries one of the [`ErrorKind`]s below.
//! The retry/DLQ state machine dispatches on `kind()` rather than matching
//! every variant, so adding a new wrapped error never requires touching the
//! state machine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Coarse classification used by the retry/DLQ state machine and by HTTP
/// status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Timeout,
    Unavailable,
    Internal,
    SerializationError,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("grpc status: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("consumer already running")]
    AlreadyRunning,

    #[error("producer closed")]
    ProducerClosed,

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("similarity search failed: {0}")]
    SimilaritySearchFailed(String),
}

impl PipelineError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::SerializationError(msg.into())
    }

    pub fn similarity_search_failed<S: Into<String>>(msg: S) -> Self {
        Self::SimilaritySearchFailed(msg.into())
    }

    /// Classification used by the worker pool to decide retry vs.
    /// committed-and-dropped vs. surfaced-to-caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Kafka(_) => ErrorKind::Unavailable,
            Self::Transport(_) | Self::Grpc(_) => ErrorKind::Unavailable,
            Self::Json(_) | Self::SerializationError(_) => ErrorKind::SerializationError,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) | Self::ProducerClosed => {
                ErrorKind::Internal
            }
            Self::AlreadyRunning => ErrorKind::Conflict,
            Self::PublishFailed(_) => ErrorKind::Unavailable,
            Self::SimilaritySearchFailed(_) => ErrorKind::Unavailable,
        }
    }
}
