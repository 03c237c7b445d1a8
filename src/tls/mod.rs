//! TLS session layer
//!
//! Wraps the OpenSSL engine behind a non-blocking step protocol: every
//! handshake, read, write and close-notify call either completes, asks to be
//! retried when the socket is readable/writable, or fails for good. The
//! [`session::Session`] state machine drives those steps and classifies the
//! outcomes; [`engine::SslEngine`] is the production engine and anything
//! implementing [`engine::TlsEngine`] can stand in for it.

pub mod config;
pub mod engine;
pub mod session;

pub use config::{ClientConfigBuilder, TlsClientConfig, TlsError, TlsVersion, PSK_IDENTITY};
pub use engine::{Interest, Progress, SessionInfo, SslEngine, TlsEngine};
pub use session::{ReadEvent, Session, SessionState};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
