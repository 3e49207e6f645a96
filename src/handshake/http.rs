//! The HTTP/1.1 shell around the handshake.
//!
//! The shell is cosmetic: all cryptographic material lives in the body.
//! Parsing goes through `httparse` under a hard size cap; behaving exactly
//! like a stock HTTP stack on malformed input is part of the probing
//! resistance.

use std::fmt::Write as _;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::HandshakeHttpConfig;
use crate::core::{HandshakeError, MAX_HTTP_REQUEST_SIZE};

/// A fully buffered inbound HTTP request.
#[derive(Debug, Clone)]
pub struct ParsedHttpRequest {
    /// Request method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Request body (empty when no Content-Length was given).
    pub body: Vec<u8>,
    /// The exact bytes consumed for this request, head and body.
    pub raw: Vec<u8>,
    /// Bytes read past the end of the request, if any.
    pub leftover: Vec<u8>,
}

impl ParsedHttpRequest {
    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read and parse one HTTP request, including its body.
///
/// `prefix` holds bytes the caller already consumed (the sniffed prefix).
/// The whole request is bounded by [`MAX_HTTP_REQUEST_SIZE`].
pub async fn read_request<R>(
    reader: &mut R,
    prefix: &[u8],
) -> Result<ParsedHttpRequest, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = prefix.to_vec();

    loop {
        let head = {
            let mut headers = [httparse::EMPTY_HEADER; 64];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(&buf) {
                Ok(httparse::Status::Complete(head_len)) => {
                    let method = req.method.unwrap_or_default().to_string();
                    let path = req.path.unwrap_or_default().to_string();
                    let headers = req
                        .headers
                        .iter()
                        .map(|h| {
                            (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned())
                        })
                        .collect::<Vec<_>>();
                    Some((head_len, method, path, headers))
                }
                Ok(httparse::Status::Partial) => None,
                Err(_) => return Err(HandshakeError::MalformedHttp),
            }
        };

        if let Some((head_len, method, path, headers)) = head {
            let content_length = headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let total = head_len + content_length;
            if total > MAX_HTTP_REQUEST_SIZE {
                return Err(HandshakeError::HttpTooLarge);
            }

            while buf.len() < total {
                let mut chunk = [0u8; 4096];
                let n = reader.read(&mut chunk).await?;
                if n == 0 {
                    return Err(HandshakeError::MalformedHttp);
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let body = buf[head_len..total].to_vec();
            let leftover = buf[total..].to_vec();
            buf.truncate(total);

            return Ok(ParsedHttpRequest { method, path, headers, body, raw: buf, leftover });
        }

        if buf.len() >= MAX_HTTP_REQUEST_SIZE {
            return Err(HandshakeError::HttpTooLarge);
        }
        let mut chunk = [0u8; 4096];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::MalformedHttp);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Read one HTTP response and return its body.
///
/// Responses without a Content-Length are read to end-of-stream, still
/// under the size cap.
pub async fn read_response_body<R>(reader: &mut R) -> Result<Vec<u8>, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        let head = {
            let mut headers = [httparse::EMPTY_HEADER; 64];
            let mut resp = httparse::Response::new(&mut headers);
            match resp.parse(&buf) {
                Ok(httparse::Status::Complete(head_len)) => {
                    let content_length = resp
                        .headers
                        .iter()
                        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                        .and_then(|h| std::str::from_utf8(h.value).ok())
                        .and_then(|v| v.trim().parse::<usize>().ok());
                    Some((head_len, content_length))
                }
                Ok(httparse::Status::Partial) => None,
                Err(_) => return Err(HandshakeError::MalformedHttp),
            }
        };

        if let Some((head_len, content_length)) = head {
            match content_length {
                Some(len) => {
                    let total = head_len + len;
                    if total > MAX_HTTP_REQUEST_SIZE {
                        return Err(HandshakeError::HttpTooLarge);
                    }
                    while buf.len() < total {
                        let mut chunk = [0u8; 4096];
                        let n = reader.read(&mut chunk).await?;
                        if n == 0 {
                            return Err(HandshakeError::MalformedHttp);
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    return Ok(buf[head_len..total].to_vec());
                }
                None => {
                    // Read until the peer closes.
                    loop {
                        let mut chunk = [0u8; 4096];
                        let n = reader.read(&mut chunk).await?;
                        if n == 0 {
                            return Ok(buf[head_len..].to_vec());
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if buf.len() > MAX_HTTP_REQUEST_SIZE {
                            return Err(HandshakeError::HttpTooLarge);
                        }
                    }
                }
            }
        }

        if buf.len() >= MAX_HTTP_REQUEST_SIZE {
            return Err(HandshakeError::HttpTooLarge);
        }
        let mut chunk = [0u8; 4096];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::MalformedHttp);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Build the client's HTTP request around a handshake body.
pub fn build_request(cfg: &HandshakeHttpConfig, body: &[u8]) -> Vec<u8> {
    let mut head = String::with_capacity(256);
    let _ = write!(head, "{} {} HTTP/{}\r\n", cfg.method, cfg.path, cfg.http_version);
    let _ = write!(head, "Host: {}\r\n", cfg.host);
    let _ = write!(head, "User-Agent: {}\r\n", cfg.user_agent);
    let _ = write!(head, "Connection: {}\r\n", cfg.connection_header);
    head.push_str("Content-Type: application/octet-stream\r\n");
    let _ = write!(head, "Content-Length: {}\r\n", body.len());
    for (name, value) in &cfg.headers {
        let _ = write!(head, "{name}: {value}\r\n");
    }
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Build the server's HTTP 200 around a handshake (or decoy) body.
pub fn build_response(body: &[u8]) -> Vec<u8> {
    let mut head = String::with_capacity(192);
    head.push_str("HTTP/1.1 200 OK\r\n");
    head.push_str("Server: nginx/1.24.0\r\n");
    head.push_str("Content-Type: application/json\r\n");
    head.push_str("Cache-Control: no-cache\r\n");
    head.push_str("Connection: keep-alive\r\n");
    let _ = write!(head, "Content-Length: {}\r\n", body.len());
    head.push_str("\r\n");

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}
