//! Tunnel-facing transport
//!
//! Glue between the TLS session and the generic tunnel abstraction: the
//! tunnel pushes outbound payload through [`Transport::send`] and receives
//! everything back through three callback slots. All TLS work runs on a
//! dedicated worker; every observable event crosses the single-slot
//! [`bridge`] before a callback executes, so callbacks always run on the
//! thread that pumps the transport, never on the worker.

pub mod bridge;
pub mod transport;

pub use bridge::{Notification, NotifyReceiver, NotifySender};
pub use transport::{Transport, TransportConfig};

/// Result type for tunnel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Tunnel transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("TLS error: {0}")]
    Tls(#[from] crate::tls::TlsError),

    #[error("framing error: {0}")]
    Framing(#[from] crate::masq::Error),

    #[error("notification bridge closed")]
    BridgeClosed,

    #[error("a notification is already in flight")]
    BridgeBusy,
}

/// Inbound callback slots implemented by the tunnel.
///
/// For one session the calls arrive in order: `on_connected` first, then
/// `on_data` zero or more times, then `on_closed` exactly once.
pub trait TunnelCallbacks {
    fn on_connected(&mut self);
    fn on_data(&mut self, data: bytes::Bytes);
    fn on_closed(&mut self);
}
