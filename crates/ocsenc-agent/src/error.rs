/// Errors that can occur while running an encoder agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ocsenc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ocsenc_frame::FrameError),

    /// A message was published to a feed that was never registered.
    #[error("feed {0} is not registered")]
    UnknownFeed(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing feed output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background worker thread panicked.
    #[error("worker thread failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
