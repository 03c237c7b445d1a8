//! Tunnel transport adapter
//!
//! Owns the worker thread that runs the whole TLS lifecycle and adapts it to
//! the tunnel's callback slots. Outbound payload handed to [`Transport::send`]
//! is framed and written by the worker; inbound bytes cross the notification
//! bridge, lose their one response head, and reach `on_data`. However the
//! session ends (handshake failure, read or write failure, explicit
//! shutdown), `on_closed` is delivered exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::masq::{RequestFramer, ResponseHeadParser, MAX_REQUEST_SIZE};
use crate::tls::{
    ReadEvent, Session, SessionInfo, SessionState, SslEngine, TlsClientConfig, TlsEngine,
};

use super::bridge::{self, NotifyReceiver, NotifySender};
use super::{Error, Result, TunnelCallbacks};

/// Read buffer size, matching the request cap
const READ_CHUNK: usize = MAX_REQUEST_SIZE;

/// How long the worker waits for socket readability before re-checking its
/// command queue
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long teardown waits for the worker to wind down
const TEARDOWN_DEADLINE: Duration = Duration::from_secs(2);

/// Immutable per-session configuration
#[derive(Clone)]
pub struct TransportConfig {
    /// Remote host to dial
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Request path used in the masquerade envelope
    pub path: String,
    /// TLS client configuration
    pub tls: TlsClientConfig,
}

impl TransportConfig {
    /// The Host header follows the expected server name when one is set,
    /// falling back to the dialed host.
    fn framer(&self) -> RequestFramer {
        let host = self.tls.servername().unwrap_or(&self.host).to_string();
        RequestFramer::new(self.path.clone(), host, self.port)
    }
}

enum Command {
    Send(Bytes),
    Shutdown,
}

/// Inbound stream state: one response head is stripped, then everything is
/// forwarded verbatim with no further parsing.
enum Inbound {
    AwaitingHead(ResponseHeadParser),
    Streaming,
}

/// The tunnel-facing transport handle
pub struct Transport {
    cmd_tx: mpsc::Sender<Command>,
    notices: NotifyReceiver,
    worker: Option<thread::JoinHandle<()>>,
    info: Arc<Mutex<Option<SessionInfo>>>,
    rejected: Arc<AtomicUsize>,
    inbound: Inbound,
    closed_delivered: bool,
    finished: bool,
}

impl Transport {
    /// Launch a session against the configured remote.
    ///
    /// Connecting, the handshake and all subsequent I/O run on the worker;
    /// failures surface through the callbacks on the pumping thread.
    pub fn launch(config: TransportConfig) -> Self {
        let framer = config.framer();
        let TransportConfig {
            host, port, tls, ..
        } = config;
        Self::spawn(framer, move || SslEngine::connect(&tls, &host, port))
    }

    /// Launch over an already-built engine. The production path uses
    /// [`launch`](Self::launch); this entry exists for driving the transport
    /// against a scripted engine.
    pub fn launch_with<E>(config: TransportConfig, engine: E) -> Self
    where
        E: TlsEngine + 'static,
    {
        let framer = config.framer();
        Self::spawn(framer, move || Ok(engine))
    }

    fn spawn<E, F>(framer: RequestFramer, make_engine: F) -> Self
    where
        E: TlsEngine + 'static,
        F: FnOnce() -> crate::tls::Result<E> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (notify_tx, notices) = bridge::channel();
        let info = Arc::new(Mutex::new(None));
        let worker_info = Arc::clone(&info);
        let rejected = Arc::new(AtomicUsize::new(0));
        let worker_rejected = Arc::clone(&rejected);

        let worker = thread::Builder::new()
            .name("cloakwire-tls".to_string())
            .spawn(move || {
                worker_main(
                    make_engine,
                    framer,
                    cmd_rx,
                    notify_tx,
                    worker_info,
                    worker_rejected,
                )
            })
            .expect("failed to spawn TLS worker");

        Transport {
            cmd_tx,
            notices,
            worker: Some(worker),
            info,
            rejected,
            inbound: Inbound::AwaitingHead(ResponseHeadParser::new()),
            closed_delivered: false,
            finished: false,
        }
    }

    /// Queue payload for transmission. Fire-and-forget: I/O failures surface
    /// later as `on_closed`; an oversized payload is rejected before any
    /// write and counted in [`rejected_sends`](Self::rejected_sends).
    pub fn send(&self, payload: Bytes) {
        let _ = self.cmd_tx.send(Command::Send(payload));
    }

    /// Number of sends dropped because the framed request would have
    /// exceeded the envelope buffer
    pub fn rejected_sends(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Request a graceful teardown
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    /// Negotiated-session facts, available once `on_connected` has fired.
    /// Strict deployments check `verify_ok` here; the handshake itself is
    /// permissive by default.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.info.lock().unwrap().clone()
    }

    /// Wait up to `timeout` for one event and dispatch it to the callbacks.
    ///
    /// Returns `Ok(true)` while the session is alive (including timeouts
    /// with no event) and `Ok(false)` once it has fully terminated;
    /// `on_closed` has fired exactly once by then.
    pub fn pump(
        &mut self,
        callbacks: &mut dyn TunnelCallbacks,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }

        let notice = match self.notices.recv(timeout) {
            Ok(Some(notice)) => notice,
            Ok(None) => return Ok(true),
            Err(Error::BridgeClosed) => {
                // Worker vanished without a final notification; still owe
                // the tunnel its close.
                self.deliver_closed(callbacks);
                self.finish();
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        match notice.state {
            SessionState::Connected => callbacks.on_connected(),
            SessionState::DataExchanging => {
                if let Some(raw) = notice.payload {
                    self.deliver_data(callbacks, raw)?;
                }
            }
            SessionState::ShuttingDown => {
                self.deliver_closed(callbacks);
                self.finish();
                return Ok(false);
            }
            state => debug_assert!(false, "unexpected notification state {:?}", state),
        }
        Ok(true)
    }

    fn deliver_data(&mut self, callbacks: &mut dyn TunnelCallbacks, raw: Bytes) -> Result<()> {
        match &mut self.inbound {
            Inbound::AwaitingHead(parser) => match parser.advance(&raw) {
                Ok(Some((_head, body))) => {
                    self.inbound = Inbound::Streaming;
                    if !body.is_empty() {
                        callbacks.on_data(body);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Malformed head: the stream cannot be trusted further.
                    self.shutdown();
                    return Err(Error::Framing(e));
                }
            },
            Inbound::Streaming => callbacks.on_data(raw),
        }
        Ok(())
    }

    fn deliver_closed(&mut self, callbacks: &mut dyn TunnelCallbacks) {
        if !self.closed_delivered {
            self.closed_delivered = true;
            callbacks.on_closed();
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        // Drain remaining notifications so a blocked worker can exit.
        let deadline = Instant::now() + TEARDOWN_DEADLINE;
        while self.worker.is_some() {
            match self.notices.recv(Some(POLL_INTERVAL)) {
                Ok(_) if Instant::now() < deadline => {}
                _ => break,
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker entry point: the entire connect/handshake/read/write/close
/// sequence runs here. Tunnel callbacks are never invoked from this thread;
/// every observable event goes through the bridge.
fn worker_main<E, F>(
    make_engine: F,
    framer: RequestFramer,
    cmds: mpsc::Receiver<Command>,
    notices: NotifySender,
    info: Arc<Mutex<Option<SessionInfo>>>,
    rejected: Arc<AtomicUsize>,
) where
    E: TlsEngine,
    F: FnOnce() -> crate::tls::Result<E>,
{
    let engine = match make_engine() {
        Ok(engine) => engine,
        Err(_) => {
            let _ = notices.notify(SessionState::ShuttingDown, None);
            return;
        }
    };

    let mut session = Session::new(engine);
    if session.handshake().is_err() {
        let _ = notices.notify(SessionState::ShuttingDown, None);
        return;
    }
    *info.lock().unwrap() = session.info().cloned();

    if notices.notify(SessionState::Connected, None).is_err() {
        session.close();
        return;
    }

    let mut buf = vec![0u8; READ_CHUNK];
    'session: loop {
        // Outbound first: frame and write everything queued.
        loop {
            match cmds.try_recv() {
                Ok(Command::Send(payload)) => {
                    let framed = match framer.wrap(&payload) {
                        Ok(framed) => framed,
                        // Oversized payload is rejected before any write;
                        // the session stays up and the drop is counted.
                        Err(_) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    };
                    if session.write_all(&framed).is_err() {
                        break 'session;
                    }
                }
                Ok(Command::Shutdown) => break 'session,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'session,
            }
        }

        match session.wait_readable(Some(POLL_INTERVAL)) {
            Ok(true) => {
                match session.read_some(&mut buf) {
                    Ok(ReadEvent::Data(n)) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if notices
                            .notify(SessionState::DataExchanging, Some(chunk))
                            .is_err()
                        {
                            break 'session;
                        }
                    }
                    Ok(ReadEvent::NotReady) => {}
                    // Clean close or fatal error: no further reads.
                    Ok(ReadEvent::PeerClosed) => break 'session,
                    Err(_) => break 'session,
                }
            }
            Ok(false) => {}
            Err(_) => break 'session,
        }
    }

    session.close();
    let _ = notices.notify(SessionState::ShuttingDown, None);
}
