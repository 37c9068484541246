//! HTTP Upgrade negotiation (RFC 6455 section 4).
//!
//! The server side classifies an incoming HTTP head into one of three
//! outcomes: a WebSocket upgrade, a plain HTTP request that never asked for
//! an upgrade, or a broken upgrade attempt. Callers must be able to tell
//! "just HTTP" apart from "broken WebSocket handshake", so the first two
//! come back as [`Negotiation`] values and only the last is an error.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Sub-protocol tag sent by CSAP clients.
pub const CSAP_SUBPROTOCOL: &str = "cfs-websocket-generic";

/// Response sent to plain HTTP requests on a CSAP listener.
pub const BAD_REQUEST_RESPONSE: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// Parse header lines into a map keyed by lowercase name.
///
/// Security-relevant headers must not repeat.
fn parse_headers<'a, I>(lines: I) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    const SINGLE: [&str; 4] = [
        "upgrade",
        "connection",
        "sec-websocket-key",
        "sec-websocket-version",
    ];
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHandshake(format!("Malformed header line: {line}")))?;
        let name = name.trim().to_ascii_lowercase();
        if SINGLE.contains(&name.as_str()) && headers.contains_key(&name) {
            return Err(Error::InvalidHandshake(format!("Duplicate header: {name}")));
        }
        headers.insert(name, value.trim().to_string());
    }

    Ok(headers)
}

/// Whether a comma-separated header value contains `token`, ignoring case.
///
/// Handles composite values such as `keep-alive, Upgrade`.
#[must_use]
pub fn header_has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use csap::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// assert_eq!(compute_accept_key(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh Sec-WebSocket-Key: 16 random bytes, Base64-encoded.
///
/// # Errors
///
/// Returns `Error::Io` if the system random source is unavailable.
pub fn generate_client_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(format!("getrandom: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Request line and headers of an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target, e.g. `/`.
    pub path: String,
    /// Headers keyed by lowercase name.
    pub headers: HashMap<String, String>,
}

impl HttpRequestHead {
    /// Parse the head of an HTTP/1.x request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the data is not UTF-8, the
    /// request line is malformed, or a header line has no colon.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 || !parts[2].starts_with("HTTP/1.") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid request line: {request_line}"
            )));
        }

        Ok(Self {
            method: parts[0].to_string(),
            path: parts[1].to_string(),
            headers: parse_headers(lines)?,
        })
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Validated WebSocket upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path.
    pub path: String,
    /// The Host header value, empty if absent.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Protocol values.
    pub protocols: Vec<String>,
}

/// Outcome of classifying a request head on the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// A valid WebSocket upgrade.
    Upgrade(HandshakeRequest),
    /// A plain HTTP request that did not ask for an upgrade.
    PlainHttp(HttpRequestHead),
}

impl Negotiation {
    /// Classify a parsed request head.
    ///
    /// - not `GET`, or `Connection` lacks the `Upgrade` token: plain HTTP
    /// - `Upgrade` header missing: `Error::NoUpgradeProtocol`
    /// - `Upgrade` is not `websocket`: `Error::UnsupportedUpgrade`
    /// - key missing or version other than 13: `Error::InvalidHandshake`
    ///
    /// # Errors
    ///
    /// See above.
    pub fn classify(head: HttpRequestHead) -> Result<Self> {
        if head.method != "GET" {
            return Ok(Negotiation::PlainHttp(head));
        }
        match head.header("connection") {
            Some(value) if header_has_token(value, "upgrade") => {}
            _ => return Ok(Negotiation::PlainHttp(head)),
        }

        let upgrade = head.header("upgrade").ok_or(Error::NoUpgradeProtocol)?;
        if !header_has_token(upgrade, "websocket") {
            return Err(Error::UnsupportedUpgrade(upgrade.to_string()));
        }

        let key = head
            .header("sec-websocket-key")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?
            .to_string();
        if let Some(version) = head.header("sec-websocket-version") {
            if version != "13" {
                return Err(Error::InvalidHandshake(format!(
                    "Unsupported WebSocket version: {version} (expected 13)"
                )));
            }
        }

        let protocols = head
            .header("sec-websocket-protocol")
            .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Negotiation::Upgrade(HandshakeRequest {
            path: head.path.clone(),
            host: head.header("host").unwrap_or_default().to_string(),
            key,
            protocols,
        }))
    }
}

/// Server's 101 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// Echoed Sec-WebSocket-Protocol.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Build the response for a validated request.
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
            protocol: req.protocols.first().cloned(),
        }
    }

    /// Write the HTTP response to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        if let Some(ref proto) = self.protocol {
            if !proto.contains(['\r', '\n']) {
                buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {proto}\r\n").as_bytes());
            }
        }
        buf.extend_from_slice(b"\r\n");
    }

    /// Parse a server response and check it against the key we sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the status is not 101, the
    /// accept header is missing, or it does not match `key`.
    pub fn parse(data: &[u8], key: &str) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        let status = status_line.split_whitespace().nth(1);
        if !status_line.starts_with("HTTP/1.") || status != Some("101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines)?;
        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();
        if accept != compute_accept_key(key) {
            return Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Accept mismatch: {accept}"
            )));
        }

        Ok(Self {
            accept,
            protocol: headers.get("sec-websocket-protocol").cloned(),
        })
    }
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Value for the Host header.
    pub host: String,
    /// Sec-WebSocket-Key nonce.
    pub key: String,
}

impl ClientRequest {
    /// Request for `host` with a fresh random key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if no random key can be generated.
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Ok(Self {
            host: host.into(),
            key: generate_client_key()?,
        })
    }

    /// Write the HTTP request to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"GET / HTTP/1.1\r\n");
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {CSAP_SUBPROTOCOL}\r\n").as_bytes());
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
        buf.extend_from_slice(b"\r\n");
    }
}
