//! SSH transport built on libssh2.
//!
//! Authentication is public-key only; the Gerrit SSH daemon does not accept
//! passwords.

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{Channel, CheckResult, KnownHostFileKind, Session};
use tracing::{debug, info, warn};

use super::{ConnectionParams, Connector, EventStream};
use crate::error::{NotifierError, Result};

/// Identity files tried when no key file is configured, in order.
const DEFAULT_IDENTITIES: &[&str] = &["id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

/// What to do with a host key missing from `known_hosts`.
///
/// A key that is present but different is always rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Trust unknown hosts on first use.
    #[default]
    AcceptNew,
    /// Only connect to hosts listed in `known_hosts`.
    Strict,
}

/// Connects to the Gerrit SSH daemon and runs `gerrit stream-events`.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    home: Option<PathBuf>,
}

impl SshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look for `.ssh/` under `home` instead of the user's home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
        }
    }

    fn ssh_dir(&self) -> Option<PathBuf> {
        self.home
            .clone()
            .or_else(home_dir)
            .map(|home| home.join(".ssh"))
    }

    fn verify_host_key(&self, session: &Session, params: &ConnectionParams) -> Result<()> {
        let (key, _) = session
            .host_key()
            .ok_or_else(|| NotifierError::connection("remote host did not present a host key"))?;
        let mut known_hosts = session
            .known_hosts()
            .map_err(|err| NotifierError::connection_caused_by("cannot load known hosts", err))?;

        if let Some(path) = self.ssh_dir().map(|dir| dir.join("known_hosts")) {
            if path.is_file() {
                if let Err(err) = known_hosts.read_file(&path, KnownHostFileKind::OpenSSH) {
                    warn!("cannot read {}: {}", path.display(), err);
                }
            }
        }

        match known_hosts.check_port(&params.host, params.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch => Err(NotifierError::connection(format!(
                "host key for {}:{} does not match known_hosts",
                params.host, params.port
            ))),
            CheckResult::NotFound => match params.host_key_policy {
                HostKeyPolicy::AcceptNew => {
                    warn!(
                        "accepting unknown host key for {}:{}",
                        params.host, params.port
                    );
                    Ok(())
                }
                HostKeyPolicy::Strict => Err(NotifierError::connection(format!(
                    "no host key known for {}:{}",
                    params.host, params.port
                ))),
            },
            CheckResult::Failure => Err(NotifierError::connection(format!(
                "cannot verify host key for {}:{}",
                params.host, params.port
            ))),
        }
    }

    fn authenticate(&self, session: &Session, params: &ConnectionParams) -> Result<()> {
        let username = params
            .username
            .as_deref()
            .ok_or_else(|| NotifierError::connection("ssh username not set"))?;

        if let Some(keyfile) = &params.keyfile {
            debug!("authenticating as {} with {}", username, keyfile.display());
            session
                .userauth_pubkey_file(username, None, keyfile, params.passphrase.as_deref())
                .map_err(|err| {
                    NotifierError::connection_caused_by(
                        format!("authentication failed with {}", keyfile.display()),
                        err,
                    )
                })?;
        } else {
            match session.userauth_agent(username) {
                Ok(()) => debug!("authenticated as {} via ssh-agent", username),
                Err(err) => debug!("ssh-agent authentication unavailable: {}", err),
            }
            if !session.authenticated() {
                let identities = self.ssh_dir().map(|dir| default_identities(&dir));
                for identity in identities.unwrap_or_default() {
                    debug!("trying identity {}", identity.display());
                    match session.userauth_pubkey_file(
                        username,
                        None,
                        &identity,
                        params.passphrase.as_deref(),
                    ) {
                        Ok(()) => break,
                        Err(err) => debug!("{} rejected: {}", identity.display(), err),
                    }
                }
            }
        }

        if session.authenticated() {
            Ok(())
        } else {
            Err(NotifierError::connection(format!(
                "authentication failed for {}@{}",
                username, params.host
            )))
        }
    }
}

impl Connector for SshConnector {
    type Stream = SshEventStream;

    fn connect(&self, params: &ConnectionParams) -> Result<SshEventStream> {
        if let Some(invalid) = params
            .subscriptions
            .iter()
            .find(|kind| !is_valid_event_type(kind))
        {
            return Err(NotifierError::connection(format!(
                "invalid event type '{invalid}'"
            )));
        }

        let address = format!("{}:{}", params.host, params.port);
        debug!("connecting to {}", address);
        let tcp = connect_tcp(&params.host, params.port, params.connect_timeout).map_err(|err| {
            NotifierError::connection_caused_by(format!("unable to connect to {address}"), err)
        })?;
        let socket = tcp
            .try_clone()
            .map_err(|err| NotifierError::connection_caused_by("cannot share socket", err))?;

        let mut session = Session::new()
            .map_err(|err| NotifierError::connection_caused_by("cannot create ssh session", err))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(params.connect_timeout));
        session.handshake().map_err(|err| {
            NotifierError::connection_caused_by(format!("ssh handshake with {address} failed"), err)
        })?;

        self.verify_host_key(&session, params)?;
        self.authenticate(&session, params)?;

        let mut channel = session.channel_session().map_err(|err| {
            NotifierError::connection_caused_by("cannot open ssh channel", err)
        })?;
        let command = params.command();
        channel.exec(&command).map_err(|err| {
            NotifierError::connection_caused_by(format!("cannot run '{command}'"), err)
        })?;
        info!("streaming events from {}", address);

        session.set_timeout(0);
        session.set_blocking(false);
        Ok(SshEventStream {
            session,
            channel,
            socket,
            closed: false,
        })
    }
}

/// A running `gerrit stream-events` over SSH.
pub struct SshEventStream {
    session: Session,
    channel: Channel,
    socket: TcpStream,
    closed: bool,
}

impl EventStream for SshEventStream {
    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream closed"));
        }
        self.channel.read(buf)
    }

    fn remote_closed(&self) -> bool {
        self.closed || self.channel.eof()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Non-blocking: these may not complete, the socket shutdown below
        // ends the session regardless.
        let _ = self.channel.close();
        let _ = self.session.disconnect(None, "closing event stream", None);
        let _ = self.socket.shutdown(Shutdown::Both);
        debug!("event stream closed");
    }
}

impl Drop for SshEventStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Existing default identity files under `ssh_dir`.
pub fn default_identities(ssh_dir: &Path) -> Vec<PathBuf> {
    DEFAULT_IDENTITIES
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|path| path.is_file())
        .collect()
}

/// Gerrit event types are lowercase words joined by dashes.
pub fn is_valid_event_type(kind: &str) -> bool {
    !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    if timeout.is_zero() {
        return TcpStream::connect((host, port));
    }
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} has no address"))
    }))
}

// libssh2 takes milliseconds, 0 meaning no limit.
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// The user's home directory from the environment.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::net::TcpListener;

    #[test]
    fn identities_are_tried_in_fixed_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("id_ed25519"), "key").unwrap();
        fs::write(dir.path().join("id_rsa"), "key").unwrap();
        fs::write(dir.path().join("id_rsa.pub"), "key").unwrap();

        let found = default_identities(dir.path());

        assert_eq!(
            found,
            vec![dir.path().join("id_rsa"), dir.path().join("id_ed25519")]
        );
    }

    #[test]
    fn missing_ssh_dir_has_no_identities() {
        let dir = tempfile::tempdir().unwrap();
        assert!(default_identities(&dir.path().join(".ssh")).is_empty());
    }

    #[test]
    fn event_type_validation() {
        assert!(is_valid_event_type("comment-added"));
        assert!(is_valid_event_type("ref-replication-done"));
        assert!(!is_valid_event_type(""));
        assert!(!is_valid_event_type("comment-added; rm -rf /"));
        assert!(!is_valid_event_type("Comment-Added"));
    }

    #[test]
    fn refused_connection_is_a_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut params = ConnectionParams::new("127.0.0.1");
        params.port = port;
        params.username = Some("jdoe".into());

        let err = SshConnector::new().connect(&params).err().expect("must fail");

        assert!(matches!(err, NotifierError::Connection { .. }), "{err:?}");
        assert!(err.to_string().contains("unable to connect"));
    }

    #[test]
    fn silent_server_fails_within_the_connect_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and hold the socket without ever sending a banner.
        let holder = std::thread::spawn(move || listener.accept().map(|(socket, _)| socket));
        let mut params = ConnectionParams::new("127.0.0.1");
        params.port = port;
        params.username = Some("jdoe".into());
        params.connect_timeout = Duration::from_millis(300);

        let started = std::time::Instant::now();
        let err = SshConnector::new().connect(&params).err().expect("must fail");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, NotifierError::Connection { .. }), "{err:?}");
        assert!(err.to_string().starts_with("ssh handshake with 127.0.0.1"), "{err}");
        drop(holder.join().unwrap());
    }

    #[test]
    fn connect_timeout_is_clamped_for_libssh2() {
        assert_eq!(timeout_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn invalid_subscription_is_rejected_before_connecting() {
        let mut params = ConnectionParams::new("127.0.0.1");
        params.port = 1;
        params.subscriptions = vec!["bad type".into()];

        let err = SshConnector::new().connect(&params).err().expect("must fail");

        assert_eq!(err.to_string(), "invalid event type 'bad type'");
    }
}
