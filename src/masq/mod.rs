//! HTTP masquerade framing
//!
//! Outgoing tunnel payload is wrapped in a fixed POST request envelope so the
//! stream resembles a browser upload; the inbound side strips one response
//! head and forwards the rest of the stream untouched.
//!
//! The framer is a pure transformation: it allocates buffers but performs no
//! I/O, and once the response head has been located it is never re-parsed.

pub mod framer;
pub mod headers;
pub mod response;

pub use framer::{RequestFramer, MASQUERADE_HEADERS};
pub use headers::Headers;
pub use response::{ResponseHead, ResponseHeadParser};

/// Result type for framing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Framing errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request of {size} bytes exceeds the {max} byte envelope buffer")]
    Overflow { size: usize, max: usize },

    #[error("malformed response head: {0}")]
    MalformedResponse(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

/// Hard cap on a framed request (envelope plus payload)
pub const MAX_REQUEST_SIZE: usize = 0x8000;

/// Cap on a buffered response head while waiting for its end
pub const MAX_RESPONSE_HEAD: usize = 0x2000;

/// Maximum number of headers retained from a response head
pub const MAX_HEADERS: usize = 64;
