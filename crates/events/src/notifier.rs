//! The event notifier state machine.
//!
//! `start` blocks the calling thread for the lifetime of the stream. Any other
//! thread (or a signal handler) stops it through [`EventNotifier::stop`] or a
//! [`StopHandle`]. Stopping is cooperative: the loop notices the request the
//! next time it waits for input, and the control channel is always checked
//! before more transport data is processed.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info};

use crate::control::{ControlChannel, ControlSignal};
use crate::dispatch::ListenerTable;
use crate::error::{NotifierError, Result};
use crate::event::Event;
use crate::framing::FrameBuffer;
use crate::transport::ssh::{HostKeyPolicy, SshConnector};
use crate::transport::{ConnectionParams, Connector, EventStream};
use crate::RECV_BUFFER_SIZE;

/// Lifecycle of one notifier instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    Idle,
    Running,
    Closing,
}

#[derive(Debug)]
struct Lifecycle {
    state: NotifierState,
    signal: Option<ControlSignal>,
}

type SharedLifecycle = Arc<Mutex<Lifecycle>>;

fn lock(lifecycle: &SharedLifecycle) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stops a running notifier from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    lifecycle: SharedLifecycle,
}

impl StopHandle {
    /// Request the loop to exit and return immediately.
    pub fn stop(&self) -> Result<()> {
        let guard = lock(&self.lifecycle);
        match (&guard.state, &guard.signal) {
            (NotifierState::Running, Some(signal)) => signal.signal(),
            _ => Err(NotifierError::NotRunning),
        }
    }

    pub fn state(&self) -> NotifierState {
        lock(&self.lifecycle).state
    }
}

/// Listens to `gerrit stream-events` and fires callbacks per event type.
pub struct EventNotifier<C: Connector = SshConnector> {
    params: ConnectionParams,
    connector: C,
    listeners: ListenerTable,
    lifecycle: SharedLifecycle,
}

impl EventNotifier<SshConnector> {
    /// Notifier for `host` on the default Gerrit SSH port.
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_connector(ConnectionParams::new(host), SshConnector::new())
    }
}

impl<C: Connector> EventNotifier<C> {
    pub fn with_connector(params: ConnectionParams, connector: C) -> Self {
        Self {
            params,
            connector,
            listeners: ListenerTable::new(),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: NotifierState::Idle,
                signal: None,
            })),
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn set_port(&mut self, port: u16) {
        self.params.port = port;
    }

    pub fn set_ssh_username(&mut self, username: impl Into<String>) {
        self.params.username = Some(username.into());
    }

    /// Authenticate with `keyfile`, unlocked by `passphrase` when encrypted.
    pub fn set_ssh_private_key(&mut self, keyfile: impl Into<PathBuf>, passphrase: Option<String>) {
        self.params.keyfile = Some(keyfile.into());
        self.params.passphrase = passphrase;
    }

    pub fn set_host_key_policy(&mut self, policy: HostKeyPolicy) {
        self.params.host_key_policy = policy;
    }

    /// Bound the TCP connect and each SSH exchange made by `start` before
    /// streaming begins.
    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.params.connect_timeout = timeout;
    }

    /// Ask the server to only send events of `event_type`.
    pub fn subscribe(&mut self, event_type: impl Into<String>) {
        self.params.subscriptions.push(event_type.into());
    }

    /// Call `callback` for every event of `event_type`.
    pub fn listen<F>(&mut self, event_type: impl Into<String>, callback: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.register(event_type, callback);
    }

    /// Call `callback` for every event.
    pub fn listen_all<F>(&mut self, callback: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.register_all(callback);
    }

    pub fn state(&self) -> NotifierState {
        lock(&self.lifecycle).state
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Request the running loop to exit. Does not wait for it.
    pub fn stop(&self) -> Result<()> {
        self.stop_handle().stop()
    }

    /// Connect and dispatch events until stopped or the remote end closes.
    ///
    /// Returns `Ok(())` on `stop` and on remote close. Connection, protocol
    /// and callback errors are returned after the control channel and the
    /// transport have been released.
    ///
    /// A `stop` issued while connecting takes effect once the connector
    /// returns, at the latest after the connect timeout; the outcome of that
    /// connection attempt is then discarded.
    pub fn start(&self) -> Result<()> {
        let mut run = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != NotifierState::Idle {
                return Err(NotifierError::AlreadyRunning);
            }
            let control = ControlChannel::create()?;
            lifecycle.signal = Some(control.signaller());
            lifecycle.state = NotifierState::Running;
            RunGuard {
                lifecycle: &self.lifecycle,
                control,
                stream: None,
            }
        };

        let connected = self.connector.connect(&self.params);
        if run.control.take_signal() {
            debug!("stop requested while connecting");
            run.stream = connected.ok();
            return Ok(());
        }
        let stream = run.stream.insert(connected?);
        let result = self.read_loop(stream, &run.control);
        match &result {
            Ok(()) => info!("event stream closed"),
            Err(err) => debug!("event loop failed: {}", err),
        }
        result
    }

    fn read_loop(&self, stream: &mut C::Stream, control: &ControlChannel) -> Result<()> {
        let mut frames = FrameBuffer::new();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        // Data may sit in the transport's own buffers, received along with the
        // connection setup or after a full read, so such a wait must not block.
        let mut pending = true;

        loop {
            if stream.remote_closed() {
                debug!("remote command exited");
                return Ok(());
            }

            let Some(control_fd) = control.poll_fd() else {
                return Ok(());
            };
            let (transport_ready, control_ready) = {
                let mut fds = [
                    PollFd::new(stream.poll_fd(), PollFlags::POLLIN),
                    PollFd::new(control_fd, PollFlags::POLLIN),
                ];
                let timeout = if pending {
                    PollTimeout::ZERO
                } else {
                    PollTimeout::NONE
                };
                match poll(&mut fds, timeout) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(errno) => return Err(NotifierError::Transport(io::Error::from(errno))),
                }
                (is_ready(&fds[0]), is_ready(&fds[1]))
            };

            if control_ready {
                debug!("stop requested");
                return Ok(());
            }
            if !transport_ready && !pending {
                continue;
            }

            match stream.read(&mut buf) {
                Ok(0) => {
                    debug!("remote end closed the stream");
                    return Ok(());
                }
                Ok(n) => {
                    pending = true;
                    frames.feed(&buf[..n]);
                    for record in frames.pop_complete_records()? {
                        self.handle_record(&record)?;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => pending = false,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(NotifierError::Transport(err)),
            }
        }
    }

    fn handle_record(&self, record: &str) -> Result<()> {
        if record.trim().is_empty() {
            debug!("skipping blank record");
            return Ok(());
        }
        let event = Event::from_json(record).map_err(|source| NotifierError::MalformedRecord {
            record: record.to_string(),
            source,
        })?;
        self.listeners.dispatch(&event).map(|_| ())
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|revents| {
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Owns the resources of one `start` call and releases them on every exit
/// path, unwinding included.
struct RunGuard<'a, S: EventStream> {
    lifecycle: &'a SharedLifecycle,
    control: ControlChannel,
    stream: Option<S>,
}

impl<S: EventStream> Drop for RunGuard<'_, S> {
    fn drop(&mut self) {
        lock(self.lifecycle).state = NotifierState::Closing;
        self.control.close();
        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
        let mut lifecycle = lock(self.lifecycle);
        lifecycle.signal = None;
        lifecycle.state = NotifierState::Idle;
    }
}
