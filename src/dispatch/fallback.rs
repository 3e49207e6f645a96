//! Decoy serving for non-tunnel traffic.
//!
//! Whatever happens here, the visitor gets a well-formed answer from a
//! plausible origin. Proxy failures degrade to the canned response;
//! nothing surfaces as a connection reset.

use std::collections::HashMap;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::FallbackConfig;
use crate::core::{FALLBACK_DIAL_TIMEOUT, FALLBACK_HTTP_TIMEOUT};
use crate::handshake::ParsedHttpRequest;
use crate::metrics::{Metrics, MetricsRegistry};

/// What the dispatcher already knows about the connection.
pub(crate) enum FallbackInput {
    /// Non-HTTP bytes consumed during the sniff.
    Raw(Vec<u8>),
    /// A fully parsed HTTP request.
    Http(ParsedHttpRequest),
    /// Looked like HTTP but did not parse; only a canned answer is safe.
    Unparsed,
}

/// Serve the connection according to the configured decoy.
pub(crate) async fn serve<S>(
    cfg: Option<&FallbackConfig>,
    mut stream: S,
    input: FallbackInput,
    metrics: &MetricsRegistry,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match (cfg, input) {
        (Some(FallbackConfig::Static { status_code, headers, response_body }), _) => {
            Metrics::incr(&metrics.counters.fallback_static);
            serve_static(&mut stream, *status_code, headers, response_body.as_bytes()).await;
        }

        (Some(FallbackConfig::Tcp { dest }), input) => {
            let buffered = match input {
                FallbackInput::Raw(bytes) => bytes,
                FallbackInput::Http(parsed) => {
                    let mut bytes = parsed.raw;
                    bytes.extend_from_slice(&parsed.leftover);
                    bytes
                }
                FallbackInput::Unparsed => Vec::new(),
            };
            match proxy_tcp(dest, &buffered, &mut stream).await {
                Ok(()) => Metrics::incr(&metrics.counters.fallback_tcp),
                Err(e) => {
                    tracing::debug!(dest = %dest, error = %e, "tcp decoy failed, degrading to static");
                    Metrics::incr(&metrics.counters.fallback_static);
                    serve_default(&mut stream).await;
                }
            }
        }

        (Some(FallbackConfig::Http { dest, path, headers }), FallbackInput::Http(parsed)) => {
            match proxy_http(dest, path.as_deref(), headers, &parsed, &mut stream).await {
                Ok(()) => Metrics::incr(&metrics.counters.fallback_http),
                Err(e) => {
                    tracing::debug!(dest = %dest, error = %e, "http decoy failed, degrading to static");
                    Metrics::incr(&metrics.counters.fallback_static);
                    serve_default(&mut stream).await;
                }
            }
        }

        // The HTTP decoy cannot answer traffic that is not a parsed
        // request; canned response instead.
        (Some(FallbackConfig::Http { .. }), _) | (None, _) => {
            Metrics::incr(&metrics.counters.fallback_static);
            serve_default(&mut stream).await;
        }
    }
}

/// The built-in response for an unset fallback.
async fn serve_default<S>(stream: &mut S)
where
    S: AsyncWrite + Unpin,
{
    serve_static(stream, 200, &HashMap::new(), b"Hello, World!").await;
}

async fn serve_static<S>(stream: &mut S, status: u16, headers: &HashMap<String, String>, body: &[u8])
where
    S: AsyncWrite + Unpin,
{
    use std::fmt::Write as _;

    let mut head = String::with_capacity(192);
    let _ = write!(head, "HTTP/1.1 {} {}\r\n", status, reason_phrase(status));
    head.push_str("Server: nginx/1.24.0\r\n");
    if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        head.push_str("Content-Type: text/html; charset=utf-8\r\n");
    }
    for (name, value) in headers {
        let _ = write!(head, "{name}: {value}\r\n");
    }
    let _ = write!(head, "Content-Length: {}\r\n", body.len());
    head.push_str("Connection: close\r\n\r\n");

    let mut response = head.into_bytes();
    response.extend_from_slice(body);

    // Best effort: the visitor may already be gone.
    let _ = stream.write_all(&response).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Full-duplex pipe to the TCP decoy, replaying buffered bytes first.
async fn proxy_tcp<S>(dest: &str, buffered: &[u8], stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut upstream = timeout(FALLBACK_DIAL_TIMEOUT, TcpStream::connect(dest))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "decoy dial timed out"))??;

    upstream.write_all(buffered).await?;
    tokio::io::copy_bidirectional(stream, &mut upstream).await?;
    Ok(())
}

/// One request, one upstream connection: rewrite the parsed request to
/// the decoy host and stream its response back verbatim.
async fn proxy_http<S>(
    dest: &str,
    path_override: Option<&str>,
    inject: &HashMap<String, String>,
    parsed: &ParsedHttpRequest,
    stream: &mut S,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use std::fmt::Write as _;

    let exchange = async {
        let mut upstream = TcpStream::connect(dest).await?;

        let host = dest.rsplit_once(':').map(|(h, _)| h).unwrap_or(dest);
        let path = path_override.unwrap_or(&parsed.path);

        let mut head = String::with_capacity(256);
        let _ = write!(head, "{} {} HTTP/1.1\r\n", parsed.method, path);
        let _ = write!(head, "Host: {host}\r\n");
        for (name, value) in &parsed.headers {
            if name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            let _ = write!(head, "{name}: {value}\r\n");
        }
        for (name, value) in inject {
            let _ = write!(head, "{name}: {value}\r\n");
        }
        let _ = write!(head, "Content-Length: {}\r\n", parsed.body.len());
        head.push_str("Connection: close\r\n\r\n");

        let mut request = head.into_bytes();
        request.extend_from_slice(&parsed.body);
        upstream.write_all(&request).await?;
        upstream.flush().await?;

        // Stream the decoy's answer back until it closes.
        tokio::io::copy(&mut upstream, stream).await?;
        stream.flush().await?;
        Ok::<_, io::Error>(())
    };

    timeout(FALLBACK_HTTP_TIMEOUT, exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "decoy exchange timed out"))?
}
