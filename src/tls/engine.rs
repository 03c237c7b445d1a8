//! Non-blocking TLS engine
//!
//! [`TlsEngine`] is the seam between the session state machine and the
//! crypto: one step of handshake, read, write or close-notify at a time,
//! each reporting [`Progress`] instead of blocking. [`SslEngine`] is the
//! OpenSSL implementation over a non-blocking `TcpStream`.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::time::Duration;

use openssl::ssl::{ErrorCode, Ssl, SslStream};
use openssl::x509::X509VerifyResult;
use socket2::{Domain, Protocol, Socket, Type};

use super::config::{TlsClientConfig, TlsError};
use super::Result;

/// Outcome of a single non-blocking engine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Step finished; for read/write this is the byte count
    Done(usize),
    /// No progress until the socket is readable; retry the same step
    WantRead,
    /// No progress until the socket is writable; retry the same step
    WantWrite,
    /// The peer ended the stream cleanly (close-notify or EOF)
    PeerClosed,
}

/// Socket readiness of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Negotiated-session facts, available once the handshake completed
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Negotiated protocol version (e.g. "TLSv1.3")
    pub version: String,
    /// Negotiated cipher suite
    pub cipher: String,
    /// Whether the peer chain verified cleanly
    pub verify_ok: bool,
    /// Verification failure detail, if any
    pub verify_error: Option<String>,
}

impl Default for SessionInfo {
    fn default() -> Self {
        SessionInfo {
            version: "<undef>".to_string(),
            cipher: "<undef>".to_string(),
            verify_ok: true,
            verify_error: None,
        }
    }
}

/// One step of the TLS protocol at a time.
///
/// A would-block result is not an error: the caller waits for readiness and
/// retries the identical operation. Fatal failures come back as `Err`.
pub trait TlsEngine: Send {
    /// Drive the handshake one step
    fn handshake_step(&mut self) -> Result<Progress>;

    /// Read decrypted bytes into `buf`
    fn read(&mut self, buf: &mut [u8]) -> Result<Progress>;

    /// Write plaintext bytes from `buf`
    fn write(&mut self, buf: &[u8]) -> Result<Progress>;

    /// Send the close-notify alert
    fn close_notify(&mut self) -> Result<Progress>;

    /// Block until the socket is ready for `interest` or the timeout lapses.
    /// Returns false on timeout.
    fn wait(&mut self, interest: Interest, timeout: Option<Duration>) -> Result<bool>;

    /// Negotiated-session facts; meaningful after the handshake
    fn info(&self) -> SessionInfo {
        SessionInfo::default()
    }
}

/// OpenSSL engine over a non-blocking TCP stream
pub struct SslEngine {
    stream: SslStream<TcpStream>,
}

impl SslEngine {
    /// Open the transport socket, set it non-blocking and prepare the TLS
    /// state. The handshake itself is driven step by step afterwards.
    pub fn connect(config: &TlsClientConfig, host: &str, port: u16) -> Result<Self> {
        let addr = resolve(host, port)?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.connect(&addr.into())?;
        let tcp: TcpStream = socket.into();
        tcp.set_nonblocking(true)?;

        let mut ssl = Ssl::new(&config.ctx)?;
        if let Some(name) = config.servername() {
            ssl.set_hostname(name)?;
        }
        let stream = SslStream::new(ssl, tcp)?;

        Ok(SslEngine { stream })
    }
}

/// Millisecond poll timeout; `None` polls forever, huge durations saturate
/// instead of wrapping negative.
fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
        None => -1,
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TlsError::Resolve(format!("{}:{}", host, port)))
}

/// Map an OpenSSL error into a progress value or a fatal classification
fn classify(err: openssl::ssl::Error) -> Result<Progress> {
    match err.code() {
        ErrorCode::WANT_READ => Ok(Progress::WantRead),
        ErrorCode::WANT_WRITE => Ok(Progress::WantWrite),
        ErrorCode::ZERO_RETURN => Ok(Progress::PeerClosed),
        ErrorCode::SYSCALL => match err.into_io_error() {
            Ok(io_err) if io_err.kind() == io::ErrorKind::ConnectionReset => {
                Err(TlsError::PeerReset)
            }
            Ok(io_err) => Err(TlsError::Io(io_err)),
            // EOF without close-notify; the stream ends here either way.
            Err(_) => Ok(Progress::PeerClosed),
        },
        _ => Err(TlsError::Protocol(err.to_string())),
    }
}

impl TlsEngine for SslEngine {
    fn handshake_step(&mut self) -> Result<Progress> {
        match self.stream.connect() {
            Ok(()) => Ok(Progress::Done(0)),
            Err(e) => classify(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Progress> {
        match self.stream.ssl_read(buf) {
            Ok(0) => Ok(Progress::PeerClosed),
            Ok(n) => Ok(Progress::Done(n)),
            Err(e) => classify(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<Progress> {
        match self.stream.ssl_write(buf) {
            Ok(n) => Ok(Progress::Done(n)),
            Err(e) => classify(e),
        }
    }

    fn close_notify(&mut self) -> Result<Progress> {
        match self.stream.shutdown() {
            Ok(_) => Ok(Progress::Done(0)),
            Err(e) => classify(e),
        }
    }

    fn wait(&mut self, interest: Interest, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        // Decrypted bytes already buffered count as readable.
        if interest == Interest::Read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        let mut pfd = pollfd {
            fd: self.stream.get_ref().as_raw_fd(),
            events: match interest {
                Interest::Read => POLLIN,
                Interest::Write => POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = poll_timeout_ms(timeout);

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            return Err(TlsError::Io(io::Error::last_os_error()));
        }

        Ok(result > 0)
    }

    fn info(&self) -> SessionInfo {
        let ssl = self.stream.ssl();
        let verify = ssl.verify_result();
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            verify_ok: verify == X509VerifyResult::OK,
            verify_error: (verify != X509VerifyResult::OK)
                .then(|| verify.error_string().to_string()),
        }
    }
}
