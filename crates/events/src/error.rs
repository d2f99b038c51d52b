//! Error types returned by the event notifier.

use std::io;

use thiserror::Error;

use crate::framing::FramingError;

/// Result type for all notifier operations.
pub type Result<T> = std::result::Result<T, NotifierError>;

/// Failures surfaced by [`EventNotifier`](crate::EventNotifier) and its parts.
///
/// Every error raised while the read loop is active is returned from
/// `start` only after the control channel and the transport have been closed.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// The remote host cannot be reached, authentication failed, or the
    /// `stream-events` command could not be started.
    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// `start` called while a loop is already running on this instance.
    #[error("event notifier already running")]
    AlreadyRunning,

    /// `stop` called while no loop is running.
    #[error("event loop not listening")]
    NotRunning,

    /// A complete record is not valid JSON.
    #[error("malformed event record: {record}")]
    MalformedRecord {
        record: String,
        #[source]
        source: serde_json::Error,
    },

    /// A complete record is not valid UTF-8.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Reading from or waiting on the event channel failed.
    #[error("event stream failure: {0}")]
    Transport(#[source] io::Error),

    /// A registered callback returned an error.
    #[error("listener for '{event_type}' failed")]
    Callback {
        event_type: String,
        #[source]
        source: anyhow::Error,
    },

    /// Local resource allocation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl NotifierError {
    pub(crate) fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn connection_caused_by<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// True for errors caused by a misuse of the lifecycle API.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }
}
