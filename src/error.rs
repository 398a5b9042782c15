// Error taxonomy and the shared error channel
//
// Every failure in the recording pipeline ends up as a `RecordError`. Errors that
// happen on worker threads are never propagated across the thread boundary; they
// are handed to an `ErrorReporter`, which the host installs once and which is
// cloned into every worker.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};

/// Error type for recording operations
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Invalid stream parameters; no resources are held
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Directory or file creation failed
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested codec path could not be created
    #[error("Encoder not available: {0}")]
    BackendUnavailable(String),

    /// Producer outpaced the stream worker; the stream is poisoned
    #[error("{stream} buffer has overflowed")]
    QueueFull { stream: String },

    /// The backend failed mid-stream; output was finalised best-effort
    #[error("{stream} encoding aborted: {reason}")]
    EncodeAborted { stream: String, reason: String },

    #[error("Invalid player id {0} (expected 100-999)")]
    InvalidPlayerId(u32),

    #[error("No data types selected for recording")]
    NothingToRecord,

    #[error("Operation not allowed while {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, RecordError>;

impl RecordError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecordError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn queue_full(stream: impl fmt::Display) -> Self {
        RecordError::QueueFull {
            stream: stream.to_string(),
        }
    }

    pub fn aborted(stream: impl fmt::Display, reason: impl Into<String>) -> Self {
        RecordError::EncodeAborted {
            stream: stream.to_string(),
            reason: reason.into(),
        }
    }
}

type ErrorCallback = dyn Fn(&RecordError) + Send + Sync;

/// Error channel shared by the controller and every worker thread.
///
/// Cheap to clone; safe to invoke from any thread.
#[derive(Clone)]
pub struct ErrorReporter {
    callback: Arc<ErrorCallback>,
}

impl ErrorReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&RecordError) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Reporter that only logs
    pub fn log_only() -> Self {
        Self::new(|_| {})
    }

    /// Reporter backed by a channel, for hosts that poll for errors.
    ///
    /// Messages are the `Display` form of the error.
    pub fn channel() -> (Self, Receiver<String>) {
        let (tx, rx) = unbounded();
        let reporter = Self::new(move |err| {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(err.to_string());
        });
        (reporter, rx)
    }

    pub fn report(&self, err: &RecordError) {
        log::error!("{}", err);
        (self.callback)(err);
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter").finish_non_exhaustive()
    }
}
