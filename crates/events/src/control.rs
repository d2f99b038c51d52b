//! Loopback wake-up channel used to interrupt the blocking wait.
//!
//! The read end sits next to the transport socket in the readiness wait; a
//! [`ControlSignal`] writes a single byte to the other end to make that wait
//! return. The bytes carry no information.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{NotifierError, Result};

const WAKE_BYTE: u8 = 0x43;

/// Receiving side, owned by the read loop.
#[derive(Debug)]
pub struct ControlChannel {
    reader: Option<UnixStream>,
    writer: Arc<Mutex<Option<UnixStream>>>,
}

/// Cloneable sending side.
#[derive(Debug, Clone)]
pub struct ControlSignal {
    writer: Arc<Mutex<Option<UnixStream>>>,
}

impl ControlChannel {
    pub fn create() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            reader: Some(reader),
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    pub fn signaller(&self) -> ControlSignal {
        ControlSignal {
            writer: Arc::clone(&self.writer),
        }
    }

    /// Handle to include in the readiness wait; `None` once closed.
    pub fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.reader.as_ref().map(AsFd::as_fd)
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Consume pending wake-ups. True if at least one was sent.
    pub fn take_signal(&self) -> bool {
        let Some(mut reader) = self.reader.as_ref() else {
            return false;
        };
        let mut buf = [0u8; 64];
        let mut signalled = false;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return signalled,
                Ok(_) => signalled = true,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return signalled,
            }
        }
    }

    /// Release both ends. Safe to call more than once.
    pub fn close(&mut self) {
        self.reader.take();
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl ControlSignal {
    /// Make the read end report readiness.
    ///
    /// Several signals before the loop wakes up collapse into one wake-up.
    pub fn signal(&self) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = guard.as_mut().ok_or(NotifierError::NotRunning)?;
        match writer.write(&[WAKE_BYTE]) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(NotifierError::Io(err)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
