//! HTTP upgrade handshake.
//!
//! Parses the client's opening HTTP request head and validates it as a
//! WebSocket upgrade per RFC 6455 §4.2.2. Validation never performs I/O;
//! the caller writes the returned response and, on acceptance, flips the
//! engine out of its upgrade state.

use crate::protocol::error::{ProtocolError, ProtocolResult};
use base64::Engine;
use bytes::Bytes;
use sha1::{Digest, Sha1};

/// Fixed GUID concatenated with the client key to form the accept token.
/// From RFC 6455 §4.2.2.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A parsed HTTP request head.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: String,

    /// Request target (path).
    pub target: String,

    /// HTTP major version.
    pub version_major: u8,

    /// HTTP minor version.
    pub version_minor: u8,

    /// Header fields in arrival order, names preserved as sent.
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parse a request head (request line plus header fields, up to but not
    /// including the terminating blank line).
    pub fn parse(head: &[u8]) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| ProtocolError::BadRequest("request head is not UTF-8".to_string()))?;

        let mut lines = text.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| ProtocolError::BadRequest("empty request".to_string()))?;

        let mut parts = request_line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => {
                return Err(ProtocolError::BadRequest(
                    "malformed request line".to_string(),
                ))
            }
        };

        if method != "GET" {
            return Err(ProtocolError::BadRequest(format!(
                "expected GET, got {method}"
            )));
        }

        let (version_major, version_minor) = parse_http_version(version)?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ProtocolError::BadRequest(format!("malformed header field: {line}"))
            })?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version_major,
            version_minor,
            headers,
        })
    }

    /// Look up a header value by name (ASCII case-insensitive). The first
    /// occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn parse_http_version(version: &str) -> ProtocolResult<(u8, u8)> {
    let digits = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .and_then(|(major, minor)| Some((major.parse().ok()?, minor.parse().ok()?)));
    digits.ok_or_else(|| ProtocolError::BadRequest(format!("malformed HTTP version: {version}")))
}

/// An HTTP response under construction.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    /// Create a response with the given status code.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Get the status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Append a header field.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Look up a header value by name (ASCII case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Render the response head as wire bytes.
    pub fn render(&self) -> Bytes {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status,
            reason_phrase(self.status)
        );
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        Bytes::from(out)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        505 => "HTTP Version Not Supported",
        _ => "Error",
    }
}

/// The outcome of validating an upgrade request.
#[derive(Debug)]
pub enum Upgrade {
    /// The request was accepted; write the 101 response and switch the
    /// engine to frame parsing.
    Accepted(HttpResponse),
    /// The request was rejected; write the response and drop the client.
    Rejected(HttpResponse),
}

fn reject(status: u16) -> HttpResponse {
    let mut response = HttpResponse::new(status);
    response.add_header("Connection", "Close");
    response
}

/// Validate an upgrade request, short-circuiting on the first failed check.
///
/// On success the response carries `Upgrade`, `Connection`, and the
/// `Sec-WebSocket-Accept` token computed as
/// `base64(SHA1(key || GUID))`.
pub fn accept_upgrade(req: &HttpRequest) -> Upgrade {
    // HTTP/1.1 or later within the 1.x family.
    if req.version_major != 1 || req.version_minor < 1 {
        return Upgrade::Rejected(reject(505));
    }

    // `Upgrade: websocket`, case-insensitive.
    match req.header("Upgrade") {
        Some(v) if v.eq_ignore_ascii_case("websocket") => {}
        _ => return Upgrade::Rejected(reject(400)),
    }

    // `Connection: upgrade`, case-insensitive.
    match req.header("Connection") {
        Some(v) if v.eq_ignore_ascii_case("upgrade") => {}
        _ => return Upgrade::Rejected(reject(400)),
    }

    // An `Origin` header must be present for browser clients.
    if req.header("Origin").is_none() {
        return Upgrade::Rejected(reject(403));
    }

    // `Sec-WebSocket-Version: 13`, exact. The rejection advertises the
    // version we speak.
    match req.header("Sec-WebSocket-Version") {
        Some("13") => {}
        _ => {
            let mut response = reject(400);
            response.add_header("Sec-WebSocket-Version", "13");
            return Upgrade::Rejected(response);
        }
    }

    let key = match req.header("Sec-WebSocket-Key") {
        Some(key) => key,
        None => return Upgrade::Rejected(reject(400)),
    };

    let mut response = HttpResponse::new(101);
    response.add_header("Connection", "Upgrade");
    response.add_header("Upgrade", "websocket");
    response.add_header("Sec-WebSocket-Accept", compute_accept_key(key));
    Upgrade::Accepted(response)
}

/// Compute the `Sec-WebSocket-Accept` token for a client key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}
