use std::time::Duration;

use thiserror::Error;

/// Coarse error classification used by backoff policies and capacity
/// accounting.
///
/// The dispatcher never inspects user error types directly; it only sees the
/// class reported through [`ClassifyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Network I/O failures, remote 5xx, timeouts. Retried with backoff.
    Transient,
    /// Remote 429. Retried with backoff; additionally penalizes the
    /// backend's capacity.
    RateLimited,
    /// Remote 4xx (non-429), schema violations. The current backend gives
    /// up; the dispatcher fails over or propagates.
    Fatal,
    /// Task cancellation. Propagated immediately, never retried.
    Cancelled,
}

/// Maps a user error type to an [`ErrorClass`].
///
/// Implement this for the error type produced by the operations you dispatch
/// through [`LoadBalancer::call`](crate::LoadBalancer::call). [`CallError`]
/// ships a ready-made HTTP-flavored implementation.
pub trait ClassifyError {
    fn classify(&self) -> ErrorClass;

    /// Whether the error is worth retrying on the same backend.
    fn is_retryable(&self) -> bool {
        matches!(
            self.classify(),
            ErrorClass::Transient | ErrorClass::RateLimited
        )
    }
}

/// HTTP-flavored remote call error.
///
/// Applications wrapping an HTTP or JSON-RPC client can map their transport
/// errors into this type and get the standard classification for free: 429 is
/// rate-limited, other 4xx are fatal, 5xx and transport failures are
/// transient.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("rate limited by remote")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassifyError for CallError {
    fn classify(&self) -> ErrorClass {
        match self {
            CallError::Transport(_) | CallError::Timeout(_) | CallError::Io(_) => {
                ErrorClass::Transient
            }
            CallError::RateLimited { .. } => ErrorClass::RateLimited,
            CallError::Remote { status, .. } => match status {
                429 => ErrorClass::RateLimited,
                400..=499 => ErrorClass::Fatal,
                _ => ErrorClass::Transient,
            },
            CallError::InvalidResponse(_) => ErrorClass::Fatal,
            CallError::Cancelled => ErrorClass::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
