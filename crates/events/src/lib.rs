//! Gerrit Events
//!
//! Listener for the Gerrit Code Review `stream-events` feed. An
//! [`EventNotifier`] holds one SSH channel running `gerrit stream-events`,
//! splits the newline-delimited JSON it receives into [`Event`] records and
//! hands each record to the callbacks registered for its type.
//!
//! ```no_run
//! use gerrit_events::EventNotifier;
//!
//! let mut notifier = EventNotifier::new("review.example.org");
//! notifier.set_ssh_username("jdoe");
//! notifier.listen("comment-added", |event| {
//!     println!("{}", event);
//!     Ok(())
//! });
//!
//! let stopper = notifier.stop_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     let _ = stopper.stop();
//! });
//!
//! notifier.start()?;
//! # Ok::<(), gerrit_events::NotifierError>(())
//! ```

pub mod control;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod framing;
pub mod notifier;
pub mod transport;

pub use dispatch::{Callback, ListenerTable};
pub use error::{NotifierError, Result};
pub use event::Event;
pub use framing::FrameBuffer;
pub use notifier::{EventNotifier, NotifierState, StopHandle};
pub use transport::ssh::{home_dir, HostKeyPolicy, SshConnector};
pub use transport::{ConnectionParams, Connector, EventStream};

/// Default Gerrit SSH daemon port.
pub const DEFAULT_SSH_PORT: u16 = 29418;

/// Upper bound for each blocking step of the connection phase.
pub const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Remote command streaming the events.
pub const STREAM_EVENTS_COMMAND: &str = "gerrit stream-events";

/// Separator between two event records on the wire.
pub const EVENT_SEPARATOR: u8 = b'\n';

/// Number of bytes read from the transport per wake-up.
pub const RECV_BUFFER_SIZE: usize = 4096;
