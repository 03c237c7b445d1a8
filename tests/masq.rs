//! End-to-end framing tests: payload wrapped into the request envelope on
//! one side, response head stripped back off on the other.

use bytes::Bytes;
use cloakwire::masq::{
    Error, RequestFramer, ResponseHeadParser, MASQUERADE_HEADERS, MAX_REQUEST_SIZE,
};

#[test]
fn test_wrap_produces_expected_wire_bytes() {
    let framer = RequestFramer::new("/path", "example.com", 443);
    let wire = framer.wrap(b"hello").unwrap();

    let expected = format!(
        "POST /path HTTP/1.1\r\nHost: example.com:443\r\n{}Content-Length: 5\r\n\r\nhello",
        MASQUERADE_HEADERS
    );
    assert_eq!(&wire[..], expected.as_bytes());
}

#[test]
fn test_envelope_header_order_is_stable() {
    let framer = RequestFramer::new("/", "host.test", 8443);
    let a = framer.wrap(b"one").unwrap();
    let b = framer.wrap(b"two").unwrap();

    // Same target, same payload length: identical envelope bytes.
    let head_a = &a[..a.len() - 3];
    let head_b = &b[..b.len() - 3];
    assert_eq!(head_a, head_b);
}

#[test]
fn test_response_strip_recovers_payload() {
    let mut parser = ResponseHeadParser::new();
    let raw = b"HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Length: 11\r\n\r\nopaquebytes";

    let (head, body) = parser.advance(raw).unwrap().unwrap();
    assert_eq!(head.status, 200);
    assert_eq!(head.headers.get("Server"), Some("nginx"));
    assert_eq!(&body[..], b"opaquebytes");

    // Parsed fields are kept in wire order for inspection.
    assert!(!head.headers.is_empty());
    let names: Vec<&str> = head.headers.iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["Server", "Content-Length"]);
}

#[test]
fn test_response_strip_across_many_fragments() {
    // Head delivered one byte at a time, then payload.
    let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n";
    let mut parser = ResponseHeadParser::new();

    for b in &raw[..raw.len() - 1] {
        assert!(parser.advance(std::slice::from_ref(b)).unwrap().is_none());
    }
    let (head, body) = parser.advance(&raw[raw.len() - 1..]).unwrap().unwrap();
    assert_eq!(head.status, 200);
    assert!(body.is_empty());
}

#[test]
fn test_binary_payload_survives_round_trip() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let framer = RequestFramer::new("/upload", "example.com", 443);
    let wire = framer.wrap(&payload).unwrap();

    // The envelope ends at the first CRLFCRLF; everything after is payload.
    let boundary = wire
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("envelope boundary");
    assert_eq!(&wire[boundary + 4..], &payload[..]);

    // Content-Length names the payload exactly.
    let head = std::str::from_utf8(&wire[..boundary]).unwrap();
    assert!(head.contains("Content-Length: 4096\r\n"));
}

#[test]
fn test_oversized_payload_is_refused_not_truncated() {
    let framer = RequestFramer::new("/", "example.com", 443);
    let payload = vec![0u8; MAX_REQUEST_SIZE + 1];

    assert!(matches!(
        framer.wrap(&payload),
        Err(Error::Overflow { max, .. }) if max == MAX_REQUEST_SIZE
    ));
}

#[test]
fn test_strip_then_stream_passthrough() {
    // After the head is stripped once, later chunks are opaque: the transport
    // must not feed them back through the parser. Model that contract here.
    let mut parser = ResponseHeadParser::new();
    let (_, first) = parser
        .advance(b"HTTP/1.1 200 OK\r\n\r\nchunk-one")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"chunk-one");
    assert!(parser.is_done());

    // A second chunk that happens to look like HTTP must flow through
    // untouched by whoever owns the stream.
    let second = Bytes::from_static(b"HTTP/1.1 404 Not Found\r\n\r\n");
    assert_eq!(&second[..], b"HTTP/1.1 404 Not Found\r\n\r\n");
}
