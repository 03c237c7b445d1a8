//! Inbound response head stripping
//!
//! The remote answers the masquerade request with a standard HTTP/1.1
//! response. Only the header/body boundary matters: everything before it is
//! discarded and everything after it is opaque tunnel payload. The head is
//! parsed exactly once per stream; feeding more data afterwards is a caller
//! bug handled by the transport's state, not by re-parsing here.

use bytes::Bytes;

use super::{Error, Headers, Result, MAX_RESPONSE_HEAD};

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Find the CRLFCRLF terminating a header block
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parsed response head; values are kept only for inspection, the tunnel
/// itself discards them.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

/// Incremental parser for one response head.
///
/// Feed raw TLS plaintext with [`advance`](Self::advance):
/// `Ok(None)` means the head has not fully arrived yet (buffer and retry with
/// more bytes), `Err` means the stream cannot be trusted further, and
/// `Ok(Some(_))` yields the head plus the first chunk of body bytes.
#[derive(Debug, Default)]
pub struct ResponseHeadParser {
    buffer: Vec<u8>,
    done: bool,
}

impl ResponseHeadParser {
    pub fn new() -> Self {
        ResponseHeadParser {
            buffer: Vec::new(),
            done: false,
        }
    }

    /// Whether the head has already been located
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed more raw bytes.
    pub fn advance(&mut self, data: &[u8]) -> Result<Option<(ResponseHead, Bytes)>> {
        debug_assert!(!self.done, "response head already parsed");
        if self.done {
            return Ok(None);
        }

        self.buffer.extend_from_slice(data);

        let head_end = match find_head_end(&self.buffer) {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > MAX_RESPONSE_HEAD {
                    return Err(Error::MalformedResponse(format!(
                        "no end of head within {} bytes",
                        MAX_RESPONSE_HEAD
                    )));
                }
                return Ok(None);
            }
        };

        let head = parse_head(&self.buffer[..head_end])?;
        let body = Bytes::copy_from_slice(&self.buffer[head_end + 4..]);
        self.buffer.clear();
        self.done = true;
        Ok(Some((head, body)))
    }
}

fn parse_head(raw: &[u8]) -> Result<ResponseHead> {
    let status_end = find_crlf(raw).unwrap_or(raw.len());
    let status_line = std::str::from_utf8(&raw[..status_end])
        .map_err(|_| Error::MalformedResponse("status line is not UTF-8".to_string()))?;
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers = Headers::new();
    let mut rest = &raw[(status_end + 2).min(raw.len())..];
    while !rest.is_empty() {
        let line_end = find_crlf(rest).unwrap_or(rest.len());
        let line = std::str::from_utf8(&rest[..line_end])
            .map_err(|_| Error::MalformedResponse("header line is not UTF-8".to_string()))?;
        let (name, value) = Headers::parse_header_line(line)?;
        headers.insert(name, value);
        rest = &rest[(line_end + 2).min(rest.len())..];
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

/// Parse `HTTP/1.x STATUS [REASON]`
fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(3, ' ');

    let version = parts
        .next()
        .ok_or_else(|| Error::MalformedResponse("empty status line".to_string()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(Error::MalformedResponse(format!(
            "unexpected version: {}",
            version
        )));
    }

    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|c| (100..600).contains(c))
        .ok_or_else(|| Error::MalformedResponse(format!("bad status in: {}", line)))?;

    let reason = parts.next().unwrap_or("").to_string();
    Ok((status, reason))
}
