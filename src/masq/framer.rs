//! Outbound request envelope
//!
//! Renders the fixed browser-like POST envelope around raw tunnel payload.
//! The header set is reproduced byte-for-byte; a deployed server-side
//! counterpart may match on it, so it is a constant rather than anything
//! configurable.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Error, Result, MAX_REQUEST_SIZE};

/// Fixed headers between the Host line and Content-Length.
pub const MASQUERADE_HEADERS: &str = concat!(
    "User-Agent: Mozilla/5.0 (Windows NT 5.1; rv:52.0) Gecko/20100101 Firefox/52.0\r\n",
    "Accept: text/html,application/xhtml+xml,application/octet-stream;q=0.9,*/*;q=0.8\r\n",
    "Accept-Language: en-US,en;q=0.5\r\n",
    "Accept-Encoding: gzip, deflate\r\n",
    "Connection: keep-alive\r\n",
    "Upgrade-Insecure-Requests: 1\r\n",
    "Content-Type: application/octet-stream\r\n",
);

/// Builds POST request envelopes for one (path, host, port) target.
///
/// All sessions to the same remote share the same immutable template; the
/// only per-send variation is the Content-Length value and the payload.
#[derive(Debug, Clone)]
pub struct RequestFramer {
    path: String,
    host: String,
    port: u16,
}

impl RequestFramer {
    /// Create a framer for the given request path and Host header target
    pub fn new(path: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        RequestFramer {
            path: path.into(),
            host: host.into(),
            port,
        }
    }

    /// Wrap payload in the request envelope.
    ///
    /// Fails with [`Error::Overflow`] when envelope plus payload would exceed
    /// [`MAX_REQUEST_SIZE`]; an oversized payload is rejected outright, never
    /// truncated.
    pub fn wrap(&self, payload: &[u8]) -> Result<Bytes> {
        let head = format!(
            "POST {} HTTP/1.1\r\nHost: {}:{}\r\n{}Content-Length: {}\r\n\r\n",
            self.path,
            self.host,
            self.port,
            MASQUERADE_HEADERS,
            payload.len()
        );

        let size = head.len() + payload.len();
        if size > MAX_REQUEST_SIZE {
            return Err(Error::Overflow {
                size,
                max: MAX_REQUEST_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(head.as_bytes());
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}
