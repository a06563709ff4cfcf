//! Errors of the streaming layer.
use nicompiler_backend::NiCompError;
use thiserror::Error;

/// Failure reported by a [`StreamSink`](crate::sink::StreamSink).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{msg}")]
pub struct SinkError {
    pub msg: String,
}

impl SinkError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("a stream is already in flight")]
    Busy,
    #[error("stream cancelled")]
    Cancelled,
    #[error("stream did not finish within the requested timeout")]
    Timeout,
    #[error("experiment has no compiled device, compile before streaming")]
    NotCompiled,
    #[error("invalid stream configuration: {0}")]
    InvalidCfg(String),
    /// `chan` is `None` when the sink failed to start or stop the whole card
    #[error("sink failed on card {card}, channel {}: {source}", .chan.as_deref().unwrap_or("<all>"))]
    Sink {
        card: String,
        chan: Option<String>,
        #[source]
        source: SinkError,
    },
    #[error("worker error: {0}")]
    Worker(String),
    #[error(transparent)]
    Compile(#[from] NiCompError),
}

impl From<crossbeam::channel::RecvError> for StreamError {
    fn from(_value: crossbeam::channel::RecvError) -> Self {
        Self::Worker("worker encountered RecvError".to_string())
    }
}

impl<T> From<crossbeam::channel::SendError<T>> for StreamError {
    fn from(_value: crossbeam::channel::SendError<T>) -> Self {
        Self::Worker("worker encountered SendError".to_string())
    }
}

#[cfg(feature = "python")]
impl From<StreamError> for pyo3::PyErr {
    fn from(err: StreamError) -> Self {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}
