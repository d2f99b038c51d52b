//! Remote side of the notifier: how the event byte stream is obtained.

pub mod ssh;

use std::fmt;
use std::io;
use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SSH_PORT, STREAM_EVENTS_COMMAND};
use ssh::HostKeyPolicy;

/// Where and as whom to connect.
#[derive(Clone, Default)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub keyfile: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub host_key_policy: HostKeyPolicy,
    /// Limit for the TCP connect and for each SSH exchange before streaming
    /// starts. Zero waits forever.
    pub connect_timeout: Duration,
    /// Event types the server should restrict the stream to (`-s`).
    pub subscriptions: Vec<String>,
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ..Default::default()
        }
    }

    /// The remote command line to execute.
    pub fn command(&self) -> String {
        let mut command = STREAM_EVENTS_COMMAND.to_string();
        for kind in &self.subscriptions {
            command.push_str(" -s ");
            command.push_str(kind);
        }
        command
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("keyfile", &self.keyfile)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("host_key_policy", &self.host_key_policy)
            .field("connect_timeout", &self.connect_timeout)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

/// Opens event streams.
pub trait Connector: Send + Sync {
    type Stream: EventStream;

    /// Connect, authenticate and start the streaming command.
    ///
    /// Every failure is reported as [`NotifierError::Connection`](crate::NotifierError::Connection).
    fn connect(&self, params: &ConnectionParams) -> Result<Self::Stream>;
}

/// A started `stream-events` command.
pub trait EventStream: Send {
    /// Descriptor that becomes readable when new data may be available.
    fn poll_fd(&self) -> BorrowedFd<'_>;

    /// Non-blocking read: `WouldBlock` when nothing is buffered, `Ok(0)` once
    /// the remote end closed the stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// True once the remote command has exited.
    fn remote_closed(&self) -> bool;

    /// Tear the stream down. Idempotent, never fails.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_gerrit_port() {
        let params = ConnectionParams::new("review.example.org");
        assert_eq!(params.port, 29418);
        assert!(params.username.is_none());
        assert_eq!(params.host_key_policy, HostKeyPolicy::AcceptNew);
        assert_eq!(params.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(params.command(), "gerrit stream-events");
    }

    #[test]
    fn subscriptions_become_server_side_filters() {
        let mut params = ConnectionParams::new("review.example.org");
        params.subscriptions = vec!["comment-added".into(), "change-merged".into()];
        assert_eq!(
            params.command(),
            "gerrit stream-events -s comment-added -s change-merged"
        );
    }

    #[test]
    fn debug_hides_the_passphrase() {
        let mut params = ConnectionParams::new("review.example.org");
        params.passphrase = Some("hunter2".into());
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
