//! Response header collection
//!
//! Headers are stored in insertion order with case-insensitive lookups.
//! The tunnel discards response header values after the body offset is
//! known, so only the small read-side surface is provided.

use super::{Error, Result, MAX_HEADERS};

#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header; names may repeat. Silently capped at [`MAX_HEADERS`].
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.headers.len() >= MAX_HEADERS {
            return;
        }
        self.headers.push((name.into(), value.into()));
    }

    /// Get the first value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a `Name: value` line
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let colon_pos = line
            .find(':')
            .ok_or_else(|| Error::InvalidHeader(format!("no colon in header: {}", line)))?;

        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();

        if name.is_empty() {
            return Err(Error::InvalidHeader("empty header name".to_string()));
        }

        Ok((name, value))
    }
}
