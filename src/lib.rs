//! Cloakwire - HTTPS-masqueraded TLS tunnel transport
//!
//! This crate carries an opaque tunnel byte stream over TLS while looking
//! like an ordinary browser HTTPS session: outgoing payload is wrapped in a
//! fixed POST request envelope, the first incoming response head is stripped,
//! and everything after it is forwarded verbatim.

pub mod masq;
pub mod tls;
pub mod tunnel;
