//! Minimal HTTP/1.x head handling for the public listener
//!
//! The dispatcher only needs the request head: the method and path for
//! control-plane routing, the `Host` header for tunnel lookup, and the exact
//! head bytes for verbatim forwarding. Everything after the head is relayed
//! untouched, so there is no body or transfer-encoding handling here.

use crate::error::TunnelError;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the size of a request head
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Maximum number of headers accepted in a request head
pub const MAX_HEADERS: usize = 64;

/// A parsed HTTP/1.x request head
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method, e.g. `GET`
    pub method: String,
    /// Request target as received, e.g. `/api/status` or `/x?q=1`
    pub path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1
    pub version: u8,
    /// Headers in wire order, names as received
    pub headers: Vec<(String, String)>,
    /// The exact head bytes as received, including the terminating blank line
    pub raw: Vec<u8>,
    /// Bytes read past the end of the head (start of the body, if any)
    pub buffered: Vec<u8>,
}

impl RequestHead {
    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Host` header value, if present
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// Whether this request asks for a protocol upgrade
    pub fn is_upgrade(&self) -> bool {
        self.header("upgrade").is_some()
    }

    /// Reconstruct the head in wire form from its parsed parts: request
    /// line, headers pair-wise in original order, terminated by a blank
    /// line.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.raw.len());
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(format!(" HTTP/1.{}\r\n", self.version).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Read a complete request head from `stream`.
///
/// Reads incrementally until httparse reports a complete head, the buffer
/// limit is hit, or the peer closes. Bytes past the head stay in
/// [`RequestHead::buffered`] and must be forwarded ahead of any relaying.
pub async fn read_request_head<R>(stream: &mut R) -> Result<RequestHead, TunnelError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(&buf[..]) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = req.method.ok_or(TunnelError::MalformedHead)?.to_string();
                let path = req.path.ok_or(TunnelError::MalformedHead)?.to_string();
                let version = req.version.ok_or(TunnelError::MalformedHead)?;

                let parsed = req
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_string(),
                            String::from_utf8_lossy(h.value).into_owned(),
                        )
                    })
                    .collect();

                return Ok(RequestHead {
                    method,
                    path,
                    version,
                    headers: parsed,
                    raw: buf[..head_len].to_vec(),
                    buffered: buf[head_len..].to_vec(),
                });
            }
            Ok(httparse::Status::Partial) => {}
            Err(_) => return Err(TunnelError::MalformedHead),
        }

        if buf.len() >= MAX_HEAD_SIZE {
            return Err(TunnelError::HeadTooLarge(MAX_HEAD_SIZE));
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(TunnelError::TruncatedHead);
        }
    }
}

/// Build a plain HTTP/1.1 response with the given body.
///
/// Responses carry `Connection: close`; the dispatcher drops the socket
/// after writing.
pub fn build_response(
    status: u16,
    reason: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    for (name, value) in extra_headers {
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Build a JSON response with the proper content type
pub fn build_json_response(status: u16, reason: &str, body: &serde_json::Value) -> Vec<u8> {
    build_response(
        status,
        reason,
        &[("Content-Type", "application/json; charset=utf-8")],
        body.to_string().as_bytes(),
    )
}
