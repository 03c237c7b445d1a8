//! Client TLS configuration
//!
//! Immutable configuration built once and shared by the session that uses
//! it. Authentication inputs are all optional: a client certificate + key
//! pair from one PEM file, a pre-shared key under a fixed identity, and a
//! root CA bundle for server verification.
//!
//! Verification defaults to "optional": a chain that fails to verify does
//! not abort the handshake, the result is recorded in
//! [`SessionInfo`](super::engine::SessionInfo) instead. Deployments that
//! need strict verification opt in with [`ClientConfigBuilder::verify_peer`].

use std::fs::File;
use std::io::Read;
use std::path::Path;

use openssl::pkey::PKey;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;

/// Identity string presented alongside a pre-shared key
pub const PSK_IDENTITY: &str = "Client_identity";

/// TLS version bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("TLS protocol error: {0}")]
    Protocol(String),

    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("connection reset by peer")]
    PeerReset,

    #[error("connection closed by peer")]
    PeerClosed,

    #[error("session is not connected")]
    NotConnected,
}

/// Client TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsClientConfig {
    pub(crate) ctx: SslContext,
    pub(crate) servername: Option<String>,
    pub(crate) verify_peer: bool,
}

impl TlsClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Expected server name, used for SNI and the masquerade Host header
    pub fn servername(&self) -> Option<&str> {
        self.servername.as_deref()
    }

    /// Whether a failed chain verification aborts the handshake
    pub fn verify_peer(&self) -> bool {
        self.verify_peer
    }
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    ctx_builder: SslContextBuilder,
    servername: Option<String>,
    verify_peer: bool,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())
            .expect("Failed to create SSL context");

        // Permissive default: verification runs but does not abort, the
        // result is read back after the handshake.
        ctx_builder.set_verify(SslVerifyMode::NONE);

        ClientConfigBuilder {
            ctx_builder,
            servername: None,
            verify_peer: false,
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.ctx_builder
            .set_min_proto_version(Some(min.to_openssl_version()))
            .expect("Failed to set min proto version");
        self.ctx_builder
            .set_max_proto_version(Some(max.to_openssl_version()))
            .expect("Failed to set max proto version");
        self
    }

    /// Set ALPN protocols
    pub fn alpn(mut self, protocols: &[&str]) -> Result<Self, TlsError> {
        let mut alpn_bytes = Vec::new();
        for proto in protocols {
            alpn_bytes.push(proto.len() as u8);
            alpn_bytes.extend_from_slice(proto.as_bytes());
        }
        self.ctx_builder.set_alpn_protos(&alpn_bytes)?;
        Ok(self)
    }

    /// Set the expected server name (SNI and Host header)
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Escalate a failed chain verification to handshake-fatal
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        if verify {
            self.ctx_builder.set_verify(SslVerifyMode::PEER);
        } else {
            self.ctx_builder.set_verify(SslVerifyMode::NONE);
        }
        self
    }

    /// Load client certificate and private key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        let mut cert_pem = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut cert_pem)?;

        let cert = X509::from_pem(&cert_pem)
            .map_err(|e| TlsError::Certificate(format!("failed to load certificate: {}", e)))?;
        self.ctx_builder.set_certificate(&cert)?;

        let key = PKey::private_key_from_pem(&cert_pem)
            .map_err(|e| TlsError::Certificate(format!("failed to load private key: {}", e)))?;
        self.ctx_builder.set_private_key(&key)?;

        Ok(self)
    }

    /// Set the root CA bundle used for server verification
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        self.ctx_builder.set_ca_file(path.as_ref())?;
        Ok(self)
    }

    /// Configure a pre-shared key, presented as [`PSK_IDENTITY`]
    pub fn psk(mut self, secret: &[u8]) -> Self {
        let key = secret.to_vec();
        self.ctx_builder
            .set_psk_client_callback(move |_ssl, _hint, identity, psk| {
                if identity.len() < PSK_IDENTITY.len() + 1 || psk.len() < key.len() {
                    return Ok(0);
                }
                identity[..PSK_IDENTITY.len()].copy_from_slice(PSK_IDENTITY.as_bytes());
                identity[PSK_IDENTITY.len()] = 0;
                psk[..key.len()].copy_from_slice(&key);
                Ok(key.len())
            });
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<TlsClientConfig, TlsError> {
        Ok(TlsClientConfig {
            ctx: self.ctx_builder.build(),
            servername: self.servername,
            verify_peer: self.verify_peer,
        })
    }
}
