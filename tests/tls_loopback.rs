//! Loopback tests against a real OpenSSL server: full handshake, framed
//! request on the wire, echoed payload back through the head-stripping path.
//!
//! The server certificate is generated at runtime, so nothing here depends
//! on fixture files.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{select_next_proto, AlpnError, SslAcceptor, SslMethod, SslStream};
use openssl::x509::{X509, X509NameBuilder};

use cloakwire::tls::{TlsClientConfig, TlsVersion};
use cloakwire::tunnel::{Transport, TransportConfig, TunnelCallbacks};

fn self_signed_identity() -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = {
        let mut serial = BigNum::new().unwrap();
        serial.rand(159, MsbOption::MAYBE_ZERO, false).unwrap();
        serial.to_asn1_integer().unwrap()
    };
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// Read one framed request off the TLS stream: head, then exactly
/// Content-Length body bytes.
fn read_request(tls: &mut SslStream<TcpStream>) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = tls.read(&mut chunk).unwrap();
        assert!(n > 0, "client closed before finishing the request");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
    let content_length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .expect("request carries Content-Length")
        .trim()
        .parse()
        .unwrap();

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = tls.read(&mut chunk).unwrap();
        assert!(n > 0, "client closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }

    (head, body)
}

/// Spawn an echo server: accept one TLS connection, read one framed request,
/// answer 200 with the payload echoed back, then close-notify. Returns the
/// request head, the request body and the negotiated ALPN protocol.
fn spawn_echo_server(
    listener: TcpListener,
    cert: X509,
    key: PKey<Private>,
) -> thread::JoinHandle<(String, Vec<u8>, Option<Vec<u8>>)> {
    thread::spawn(move || {
        let mut acceptor = SslAcceptor::mozilla_intermediate(SslMethod::tls()).unwrap();
        acceptor.set_certificate(&cert).unwrap();
        acceptor.set_private_key(&key).unwrap();
        acceptor.set_alpn_select_callback(|_, client| {
            select_next_proto(b"\x08http/1.1", client).ok_or(AlpnError::NOACK)
        });
        let acceptor = acceptor.build();

        let (tcp, _) = listener.accept().unwrap();
        let mut tls = acceptor.accept(tcp).unwrap();
        let alpn = tls.ssl().selected_alpn_protocol().map(|p| p.to_vec());

        let (head, body) = read_request(&mut tls);

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        tls.write_all(response.as_bytes()).unwrap();
        tls.write_all(&body).unwrap();
        tls.flush().unwrap();
        let _ = tls.shutdown();

        (head, body, alpn)
    })
}

#[derive(Default)]
struct Recorder {
    connected: usize,
    data: Vec<Bytes>,
    closed: usize,
}

impl TunnelCallbacks for Recorder {
    fn on_connected(&mut self) {
        self.connected += 1;
    }

    fn on_data(&mut self, data: Bytes) {
        self.data.push(data);
    }

    fn on_closed(&mut self) {
        self.closed += 1;
    }
}

fn pump_to_end(transport: &mut Transport, recorder: &mut Recorder) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        match transport.pump(recorder, Some(Duration::from_millis(100))) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => panic!("pump failed: {}", e),
        }
    }
    panic!("session did not terminate in time");
}

#[test]
fn test_loopback_echo_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (cert, key) = self_signed_identity();
    let server = spawn_echo_server(listener, cert, key);

    let config = TransportConfig {
        host: "127.0.0.1".to_string(),
        port,
        path: "/sync".to_string(),
        tls: TlsClientConfig::builder()
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .alpn(&["http/1.1"])
            .unwrap()
            .build()
            .unwrap(),
    };

    let mut transport = Transport::launch(config);
    transport.send(Bytes::from_static(b"opaque tunnel bytes"));

    let mut recorder = Recorder::default();
    pump_to_end(&mut transport, &mut recorder);

    assert_eq!(recorder.connected, 1);
    assert_eq!(recorder.closed, 1);
    let received: Vec<u8> = recorder.data.iter().flat_map(|b| b.to_vec()).collect();
    assert_eq!(received, b"opaque tunnel bytes");

    // Permissive default: the self-signed chain did not abort the handshake,
    // but the failed verification is on record.
    let info = transport.session_info().expect("handshake completed");
    assert!(!info.version.is_empty());
    assert!(!info.verify_ok);
    assert!(info.verify_error.is_some());

    let (head, body, alpn) = server.join().unwrap();
    assert!(head.starts_with("POST /sync HTTP/1.1\r\nHost: 127.0.0.1:"));
    assert!(head.contains("Content-Type: application/octet-stream"));
    assert_eq!(body, b"opaque tunnel bytes");
    assert_eq!(alpn.as_deref(), Some(b"http/1.1".as_slice()));
}

#[test]
fn test_loopback_strict_verification_with_pinned_ca() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (cert, key) = self_signed_identity();

    // Pin the server's own certificate as the trust root.
    let mut ca_pem = tempfile::NamedTempFile::new().unwrap();
    ca_pem.write_all(&cert.to_pem().unwrap()).unwrap();
    ca_pem.flush().unwrap();

    let server = spawn_echo_server(listener, cert, key);

    let config = TransportConfig {
        host: "127.0.0.1".to_string(),
        port,
        path: "/sync".to_string(),
        tls: TlsClientConfig::builder()
            .verify_peer(true)
            .ca_file(ca_pem.path())
            .unwrap()
            .build()
            .unwrap(),
    };

    let mut transport = Transport::launch(config);
    transport.send(Bytes::from_static(b"ping"));

    let mut recorder = Recorder::default();
    pump_to_end(&mut transport, &mut recorder);

    assert_eq!(recorder.connected, 1);
    let info = transport.session_info().expect("handshake completed");
    assert!(info.verify_ok);
    assert!(info.verify_error.is_none());

    // No ALPN offered on this config, so none is negotiated.
    let (_, body, alpn) = server.join().unwrap();
    assert_eq!(body, b"ping");
    assert!(alpn.is_none());
}

#[test]
fn test_client_identity_loads_from_single_pem() {
    let (cert, key) = self_signed_identity();

    // Certificate and key concatenated in one PEM file.
    let mut pem = tempfile::NamedTempFile::new().unwrap();
    pem.write_all(&cert.to_pem().unwrap()).unwrap();
    pem.write_all(&key.private_key_to_pem_pkcs8().unwrap())
        .unwrap();
    pem.flush().unwrap();

    let config = TlsClientConfig::builder()
        .cert_file(pem.path())
        .unwrap()
        .build()
        .unwrap();
    assert!(!config.verify_peer());
}
