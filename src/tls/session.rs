//! TLS session state machine
//!
//! Drives a [`TlsEngine`] through the connection lifecycle:
//!
//! ```text
//! Stopped -> Connecting -> Connected -> DataExchanging -> ShuttingDown -> Stopped
//! ```
//!
//! A would-block result from the engine re-arms the identical operation
//! after a readiness wait and is never surfaced to the caller. Partial
//! writes resume from their byte offset, never from zero. Close-notify is
//! best-effort: the session is being torn down regardless, so failures to
//! send it are swallowed.

use std::time::Duration;

use super::config::TlsError;
use super::engine::{Interest, Progress, SessionInfo, TlsEngine};
use super::Result;

/// Per-step wait during the handshake; lapsing is handshake-fatal
const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-step wait while flushing a write; lapsing is I/O-fatal
const WRITE_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long close-notify retries a blocked send before abandoning the socket
const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Connecting,
    Connected,
    DataExchanging,
    ShuttingDown,
}

/// Outcome of one read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// Bytes arrived; count of valid bytes in the caller's buffer
    Data(usize),
    /// Nothing to read yet; not an event, poll again later
    NotReady,
    /// The peer closed cleanly; proceed to graceful teardown
    PeerClosed,
}

/// One TLS connection to exactly one remote
pub struct Session<E: TlsEngine> {
    engine: E,
    state: SessionState,
    info: Option<SessionInfo>,
}

impl<E: TlsEngine> Session<E> {
    pub fn new(engine: E) -> Self {
        Session {
            engine,
            state: SessionState::Stopped,
            info: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated-session facts, populated once the handshake completed.
    ///
    /// Callers relying on strict verification must check
    /// [`SessionInfo::verify_ok`] here; the permissive default records a
    /// failed chain instead of aborting.
    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    /// Drive the handshake to completion.
    ///
    /// Loops the engine's handshake step, waiting for socket readiness on
    /// every would-block result. Any fatal outcome moves straight to
    /// teardown.
    pub fn handshake(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        loop {
            match self.engine.handshake_step() {
                Ok(Progress::Done(_)) => {
                    self.info = Some(self.engine.info());
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Ok(Progress::WantRead) => {
                    self.wait_for(Interest::Read)?;
                }
                Ok(Progress::WantWrite) => {
                    self.wait_for(Interest::Write)?;
                }
                Ok(Progress::PeerClosed) => {
                    self.state = SessionState::ShuttingDown;
                    return Err(TlsError::HandshakeFailed(
                        "peer closed during handshake".to_string(),
                    ));
                }
                Err(e) => {
                    self.state = SessionState::ShuttingDown;
                    return Err(e);
                }
            }
        }
    }

    fn wait_for(&mut self, interest: Interest) -> Result<()> {
        if !self.engine.wait(interest, Some(HANDSHAKE_STEP_TIMEOUT))? {
            self.state = SessionState::ShuttingDown;
            return Err(TlsError::HandshakeFailed("handshake timed out".to_string()));
        }
        Ok(())
    }

    /// Write all of `buf`, resuming partial writes by offset.
    ///
    /// At most one write is in flight at a time; this call returns only once
    /// every byte has been accepted or a fatal error occurred.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Connected | SessionState::DataExchanging
        ) {
            return Err(TlsError::NotConnected);
        }

        let mut written = 0;
        while written < buf.len() {
            match self.engine.write(&buf[written..]) {
                Ok(Progress::Done(n)) => {
                    written += n;
                    self.state = SessionState::DataExchanging;
                }
                Ok(Progress::WantRead) => {
                    self.write_wait(Interest::Read)?;
                }
                Ok(Progress::WantWrite) => {
                    self.write_wait(Interest::Write)?;
                }
                Ok(Progress::PeerClosed) => {
                    self.state = SessionState::ShuttingDown;
                    return Err(TlsError::PeerClosed);
                }
                Err(e) => {
                    self.state = SessionState::ShuttingDown;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn write_wait(&mut self, interest: Interest) -> Result<()> {
        if !self.engine.wait(interest, Some(WRITE_STEP_TIMEOUT))? {
            self.state = SessionState::ShuttingDown;
            return Err(TlsError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write stalled",
            )));
        }
        Ok(())
    }

    /// Attempt one read.
    ///
    /// Would-block comes back as [`ReadEvent::NotReady`] and is never
    /// forwarded as a tunnel event; a clean close comes back as
    /// [`ReadEvent::PeerClosed`].
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<ReadEvent> {
        match self.engine.read(buf) {
            Ok(Progress::Done(n)) => {
                self.state = SessionState::DataExchanging;
                Ok(ReadEvent::Data(n))
            }
            Ok(Progress::WantRead) | Ok(Progress::WantWrite) => Ok(ReadEvent::NotReady),
            Ok(Progress::PeerClosed) => {
                self.state = SessionState::ShuttingDown;
                Ok(ReadEvent::PeerClosed)
            }
            Err(e) => {
                self.state = SessionState::ShuttingDown;
                Err(e)
            }
        }
    }

    /// Block until the socket may be readable, up to `timeout`
    pub fn wait_readable(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.engine.wait(Interest::Read, timeout)
    }

    /// Best-effort close-notify, then release the connection.
    ///
    /// A blocked send is retried until the wait lapses; nothing here is
    /// escalated since the connection is going away regardless.
    pub fn close(&mut self) {
        self.state = SessionState::ShuttingDown;
        loop {
            match self.engine.close_notify() {
                Ok(Progress::WantWrite) => {
                    match self.engine.wait(Interest::Write, Some(CLOSE_NOTIFY_TIMEOUT)) {
                        Ok(true) => continue,
                        _ => break,
                    }
                }
                _ => break,
            }
        }
        self.state = SessionState::Stopped;
    }
}
