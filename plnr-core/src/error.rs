use crate::plan::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unknown plan node `{0}`")]
    UnknownNode(NodeId),

    #[error("plan node `{0}` is not a controller")]
    NotAController(NodeId),

    #[error("plan node `{0}` cannot hold children of this kind")]
    NotAContainer(NodeId),

    #[error("plan has no root controller")]
    MissingRoot,

    #[error("plan root is already set")]
    RootAlreadySet,

    #[error("plan has no usable root controller")]
    NoUsableRoot,

    #[error("thread has already been run")]
    AlreadyRun,

    #[error("`num_threads` must be a positive integer")]
    InvalidThreads,

    #[error("scheduled end time must be after the start time")]
    InvalidSchedule,
}

/// Raised by a pipeline stage (sampler, processor, listener).
///
/// `StopThread` and `StopTest` are control signals rather than failures; everything else is
/// logged and the thread moves on to the next sample.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stop thread requested: {0}")]
    StopThread(String),

    #[error("stop test requested: {0}")]
    StopTest(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    #[must_use]
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::StopThread(_) | Self::StopTest(_))
    }
}
