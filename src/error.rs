use thiserror::Error;

/// Coarse classification of an [`Error`].
///
/// Callers map these onto their own transport status codes; nothing in this crate knows about transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown cluster, topic, partition or consumer group.
    NotFound,

    /// A broker could not be reached or an admin call failed.
    Unavailable,

    /// The request deadline passed before any usable partial result existed.
    Timeout,

    /// Malformed input, e.g. an offset range with `start > end`.
    InvalidArgument,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cluster \"{0}\" is not registered")]
    UnknownCluster(String),

    #[error("Topic \"{0}\" not found")]
    UnknownTopic(String),

    #[error("Partition {partition} of topic \"{topic}\" not found")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("Consumer group \"{0}\" not found")]
    UnknownGroup(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: &'static str },

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// The coarse [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCluster(_)
            | Self::UnknownTopic(_)
            | Self::UnknownPartition { .. }
            | Self::UnknownGroup(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::DeadlineExceeded { .. } => ErrorKind::Timeout,
            Self::Unavailable(_) | Self::InvalidResponse(_) => ErrorKind::Unavailable,
        }
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn unavailable(msg: impl std::fmt::Display) -> Self {
        Self::Unavailable(msg.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Unavailable(format!("background task failed: {e}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
