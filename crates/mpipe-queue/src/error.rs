//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("Malformed stream reply: {0}")]
    MalformedReply(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn unknown_delivery(id: impl Into<String>) -> Self {
        Self::UnknownDelivery(id.into())
    }
}
