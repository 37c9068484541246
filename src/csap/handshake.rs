//! CSAP open-handshake records.
//!
//! The first exchange on a fresh channel: the client names a service, the
//! broker answers with a status, a reason and a session id. Two wire
//! formats exist. The JSON one:
//!
//! ```text
//! -> {"op":"open","service":"ECHO","u":"alice","p":"secret"}
//! <- {"handshake":{"version":"7.0","status":"000","reason":"0000000000","sid":"<uuid>"}}
//! ```
//!
//! and the fixed one, a 98-byte padded service name answered by a 49-byte
//! record `status(3) reason(10) sid(36)`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Session id carried by every failure reply.
pub const NULL_SESSION_ID: &str = "000000000000000000000000000000000000";

/// Version tag of JSON replies.
pub const HANDSHAKE_VERSION: &str = "7.0";

/// Size of a fixed-format request.
pub const FIXED_REQUEST_LEN: usize = 98;

/// Size of a fixed-format reply.
pub const FIXED_REPLY_LEN: usize = 49;

/// Passwords longer than this are truncated.
pub const MAX_PASSWORD_LEN: usize = 512;

const STATUS_LEN: usize = 3;
const REASON_LEN: usize = 10;
const SID_LEN: usize = 36;

/// A status/reason pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeCode {
    /// Three-digit status.
    pub status: &'static str,
    /// Ten-digit reason.
    pub reason: &'static str,
}

impl HandshakeCode {
    pub const SUCCESS: Self = Self::new("000", "0000000000");
    pub const UNKNOWN_SERVICE: Self = Self::new("101", "1000010011");
    pub const NO_SERVICE: Self = Self::new("101", "1000010015");
    pub const READ_FAILED: Self = Self::new("101", "1000010061");
    pub const MALFORMED: Self = Self::new("101", "1000010062");
    pub const MISSING_USER: Self = Self::new("701", "1000010111");
    pub const MISSING_PASSWORD: Self = Self::new("701", "1000010222");
    pub const REJECTED: Self = Self::new("701", "1000010333");
    pub const RECEIVE_FAILED: Self = Self::new("802", "0000000000");
    pub const SEND_FAILED: Self = Self::new("803", "0000000000");
    pub const CONNECT_FAILED: Self = Self::new("804", "0000000000");
    pub const PROTOCOL_FAILURE: Self = Self::new("850", "0000000000");

    const fn new(status: &'static str, reason: &'static str) -> Self {
        Self { status, reason }
    }
}

/// Encoding of the open-handshake records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireFormat {
    /// JSON objects.
    #[default]
    Json,
    /// Fixed-width records.
    Fixed,
}

impl WireFormat {
    /// Detect the format of a request.
    ///
    /// A leading `{` means JSON; otherwise the payload must be exactly
    /// [`FIXED_REQUEST_LEN`] bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        match data.first() {
            Some(b'{') => Some(WireFormat::Json),
            _ if data.len() == FIXED_REQUEST_LEN => Some(WireFormat::Fixed),
            _ => None,
        }
    }
}

/// Client request opening a service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, rename = "u", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, rename = "p", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl OpenRequest {
    /// Request for `service` without credentials.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            op: Some("open".into()),
            service: Some(service.into()),
            user: None,
            password: None,
        }
    }

    /// Attach credentials. The password is cut to [`MAX_PASSWORD_LEN`] bytes.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(truncate(password.into(), MAX_PASSWORD_LEN));
        self
    }

    /// Service name, if non-empty.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref().filter(|s| !s.is_empty())
    }

    /// Encode for the wire.
    ///
    /// # Errors
    ///
    /// `Error::Size` if a fixed request names a service longer than
    /// [`FIXED_REQUEST_LEN`] bytes.
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>> {
        match format {
            WireFormat::Json => Ok(serde_json::to_vec(self)?),
            WireFormat::Fixed => {
                let name = self.service.as_deref().unwrap_or_default().as_bytes();
                if name.len() > FIXED_REQUEST_LEN {
                    return Err(Error::Size(format!(
                        "service name of {} bytes does not fit a fixed request",
                        name.len()
                    )));
                }
                let mut out = vec![b' '; FIXED_REQUEST_LEN];
                out[..name.len()].copy_from_slice(name);
                Ok(out)
            }
        }
    }

    /// Decode a request, detecting its format.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the format cannot be detected or the
    /// payload does not parse.
    pub fn decode(data: &[u8]) -> Result<(Self, WireFormat)> {
        let format = WireFormat::detect(data).ok_or_else(|| {
            Error::InvalidHandshake(format!("unrecognized open request of {} bytes", data.len()))
        })?;
        let mut request = match format {
            WireFormat::Json => serde_json::from_slice::<OpenRequest>(data)
                .map_err(|e| Error::InvalidHandshake(format!("open request: {e}")))?,
            WireFormat::Fixed => {
                let name = std::str::from_utf8(data)
                    .map_err(|_| Error::InvalidHandshake("service name is not UTF-8".into()))?
                    .trim_end_matches([' ', '\0']);
                OpenRequest {
                    op: None,
                    service: Some(name.to_string()),
                    user: None,
                    password: None,
                }
            }
        };
        if let Some(p) = request.password.take() {
            request.password = Some(truncate(p, MAX_PASSWORD_LEN));
        }
        Ok((request, format))
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut at = max;
        while !s.is_char_boundary(at) {
            at -= 1;
        }
        s.truncate(at);
    }
    s
}

/// Broker reply to an [`OpenRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReply {
    #[serde(default = "default_version")]
    pub version: String,
    pub status: String,
    pub reason: String,
    pub sid: String,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    handshake: HandshakeReply,
}

fn default_version() -> String {
    HANDSHAKE_VERSION.to_string()
}

impl HandshakeReply {
    /// Successful reply carrying `sid`.
    pub fn success(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            ..Self::failure(HandshakeCode::SUCCESS)
        }
    }

    /// Reply for `code` with the null session id.
    pub fn failure(code: HandshakeCode) -> Self {
        Self {
            version: default_version(),
            status: code.status.to_string(),
            reason: code.reason.to_string(),
            sid: NULL_SESSION_ID.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == HandshakeCode::SUCCESS.status
    }

    /// Whether this reply carries `code`.
    pub fn is(&self, code: HandshakeCode) -> bool {
        self.status == code.status && self.reason == code.reason
    }

    /// Encode for the wire.
    ///
    /// # Errors
    ///
    /// `Error::Size` if a field does not fit the fixed layout.
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>> {
        match format {
            WireFormat::Json => Ok(serde_json::to_vec(&Envelope {
                handshake: self.clone(),
            })?),
            WireFormat::Fixed => {
                let mut out = Vec::with_capacity(FIXED_REPLY_LEN);
                for (field, width) in [
                    (&self.status, STATUS_LEN),
                    (&self.reason, REASON_LEN),
                    (&self.sid, SID_LEN),
                ] {
                    if field.len() != width {
                        return Err(Error::Size(format!(
                            "reply field {field:?} is not {width} bytes"
                        )));
                    }
                    out.extend_from_slice(field.as_bytes());
                }
                Ok(out)
            }
        }
    }

    /// Decode a reply in the given format.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the payload does not parse.
    pub fn decode(data: &[u8], format: WireFormat) -> Result<Self> {
        match format {
            WireFormat::Json => serde_json::from_slice::<Envelope>(data)
                .map(|e| e.handshake)
                .map_err(|e| Error::InvalidHandshake(format!("handshake reply: {e}"))),
            WireFormat::Fixed => {
                if data.len() != FIXED_REPLY_LEN {
                    return Err(Error::InvalidHandshake(format!(
                        "fixed reply of {} bytes, expected {FIXED_REPLY_LEN}",
                        data.len()
                    )));
                }
                let (status, rest) = data.split_at(STATUS_LEN);
                let (reason, sid) = rest.split_at(REASON_LEN);
                if !status.iter().chain(reason).all(u8::is_ascii_digit) {
                    return Err(Error::InvalidHandshake(
                        "fixed reply status is not decimal".into(),
                    ));
                }
                if !sid.is_ascii() {
                    return Err(Error::InvalidHandshake("fixed reply is not ASCII".into()));
                }
                let field = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
                Ok(Self {
                    version: default_version(),
                    status: field(status),
                    reason: field(reason),
                    sid: field(sid),
                })
            }
        }
    }
}
