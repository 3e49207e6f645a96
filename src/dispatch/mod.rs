//! Connection dispatch.
//!
//! Every inbound connection is sniffed and routed exactly once: streams
//! opening with the protocol magic run the handshake directly, streams
//! that look like HTTP are parsed (under the request cap) and either
//! carry a handshake in their body or belong to the decoy, and anything
//! else goes to the decoy as-is. Probes never see a connection reset.

mod fallback;
mod stream;

pub use stream::PrefixedStream;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::auth::{UserRecord, UserTable};
use crate::config::Config;
use crate::core::{
    BufferPool, ConfigError, MAGIC, PROTOCOL_VERSION, SNIFF_PREFIX_SIZE, SNIFF_TIMEOUT, SushError,
};
use crate::crypto::{ReplayCache, SecureRandom};
use crate::handshake::{self, HandshakeCarriage, HandshakeServer};
use crate::metrics::MetricsRegistry;
use crate::session::Session;

use fallback::FallbackInput;

/// What the first bytes of a connection say about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The prefix is the protocol magic and a supported version.
    Tunnel,
    /// Anything else.
    Fallback,
}

/// Classify a sniffed prefix.
pub fn classify(prefix: &[u8]) -> Classification {
    if prefix.len() >= SNIFF_PREFIX_SIZE
        && prefix[..2] == MAGIC
        && prefix[2] == PROTOCOL_VERSION
    {
        Classification::Tunnel
    } else {
        Classification::Fallback
    }
}

/// HTTP methods worth attempting a parse for, keyed by their first bytes.
const HTTP_METHODS: [&str; 9] =
    ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE", "CONNECT"];

fn looks_like_http(prefix: &[u8]) -> bool {
    HTTP_METHODS.iter().any(|m| {
        let m = m.as_bytes();
        let n = prefix.len().min(m.len());
        m[..n] == prefix[..n]
    })
}

/// Outcome of dispatching one connection.
pub enum Dispatched<S> {
    /// A tunnel was established; the host wires `stream` to the peer and
    /// runs the session data-plane.
    Tunnel {
        /// The established session.
        session: Session,
        /// The connection, with any over-read bytes replayed first.
        stream: PrefixedStream<S>,
    },
    /// The connection belonged to the decoy and has been fully served.
    Fallback,
}

/// Routes inbound connections to the tunnel or the decoy.
pub struct Dispatcher {
    config: Config,
    users: Arc<UserTable>,
    handshake: HandshakeServer,
    rng: Arc<dyn SecureRandom>,
    metrics: Arc<MetricsRegistry>,
    pool: Arc<BufferPool>,
}

impl Dispatcher {
    /// Build a dispatcher from a validated configuration.
    pub fn new(
        config: Config,
        rng: Arc<dyn SecureRandom>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let users = Arc::new(UserTable::new());
        for entry in &config.users {
            users.add(UserRecord {
                id: entry.user_id(),
                email: String::new(),
                policy: entry.policy.clone().unwrap_or_else(|| "raw".to_string()),
                psk: entry.psk.clone(),
            });
        }

        let handshake = HandshakeServer::new(
            config.psk.clone(),
            Arc::clone(&users),
            Arc::new(ReplayCache::new()),
            Arc::clone(&rng),
            Arc::clone(&metrics),
        );

        Ok(Self { config, users, handshake, rng, metrics, pool: Arc::new(BufferPool::new()) })
    }

    /// The configuration this dispatcher was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live user table, for runtime membership changes.
    pub fn users(&self) -> &Arc<UserTable> {
        &self.users
    }

    /// Shared randomness source.
    pub fn rng(&self) -> &Arc<dyn SecureRandom> {
        &self.rng
    }

    /// Shared metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Shared buffer pool for session I/O.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Sniff, then route a fresh connection.
    ///
    /// Fallback traffic is served to completion here; tunnel traffic is
    /// returned after the handshake so the host can attach the peer
    /// stream.
    pub async fn dispatch<S>(
        &self,
        mut stream: S,
        cancel: &CancellationToken,
    ) -> Result<Dispatched<S>, SushError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut prefix = [0u8; SNIFF_PREFIX_SIZE];
        let mut filled = 0usize;

        let sniff = async {
            while filled < SNIFF_PREFIX_SIZE {
                let n = stream.read(&mut prefix[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            Ok::<_, std::io::Error>(())
        };
        match timeout(SNIFF_TIMEOUT, sniff).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "read failed during sniff");
                return Err(e.into());
            }
            Err(_) => {
                tracing::debug!("sniff deadline expired, treating as fallback");
            }
        }

        let prefix = &prefix[..filled];
        if classify(prefix) == Classification::Tunnel {
            // Deadline is lifted once the connection is known to be ours.
            let session =
                self.handshake.accept(&mut stream, HandshakeCarriage::Raw(prefix.to_vec())).await?;
            return Ok(Dispatched::Tunnel {
                session,
                stream: PrefixedStream::new(Vec::new(), stream),
            });
        }

        if looks_like_http(prefix) {
            match handshake::http::read_request(&mut stream, prefix).await {
                Ok(parsed) => {
                    let is_handshake = parsed.method == self.config.handshake.method
                        && parsed.path == self.config.handshake.path
                        && classify(&parsed.body) == Classification::Tunnel;

                    if is_handshake {
                        let leftover = parsed.leftover.clone();
                        let session =
                            self.handshake.accept(&mut stream, HandshakeCarriage::Http(parsed)).await?;
                        return Ok(Dispatched::Tunnel {
                            session,
                            stream: PrefixedStream::new(leftover, stream),
                        });
                    }

                    self.run_fallback(stream, FallbackInput::Http(parsed), cancel).await;
                }
                Err(e) => {
                    // Unparseable or oversized request: answer like the
                    // decoy would, never reset.
                    tracing::debug!(error = %e, "http parse failed, degrading to static");
                    self.run_fallback(stream, FallbackInput::Unparsed, cancel).await;
                }
            }
        } else {
            self.run_fallback(stream, FallbackInput::Raw(prefix.to_vec()), cancel).await;
        }

        Ok(Dispatched::Fallback)
    }

    async fn run_fallback<S>(&self, stream: S, input: FallbackInput, cancel: &CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tokio::select! {
            _ = fallback::serve(self.config.fallback.as_ref(), stream, input, &self.metrics) => {}
            _ = cancel.cancelled() => {
                tracing::debug!("fallback serving cancelled");
            }
        }
    }
}
