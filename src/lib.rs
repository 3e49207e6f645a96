//! # Sush Protocol
//!
//! Sush is a probe-resistant proxy protocol: an authenticated-encrypted
//! frame tunnel disguised as ordinary web traffic. It provides:
//!
//! - **Disguise**: the key agreement rides inside a normal-looking
//!   HTTP/1.1 exchange, and non-protocol visitors are handed to a decoy
//! - **Security**: X25519 key agreement, HKDF-SHA256 session keys,
//!   ChaCha20-Poly1305 frames with header-bound additional data
//! - **Shape**: a stochastic morpher pads and paces the frame stream to
//!   resemble a named application profile
//! - **Resilience**: replay defense, clock-skew limits, and identical
//!   observable behavior for every rejection path
//!
//! ## Modules
//!
//! - [`core`]: constants, error taxonomy, buffer pool
//! - [`config`]: endpoint configuration tree
//! - [`crypto`]: AEAD, key agreement, KDF, PSK wrapper, replay cache
//! - [`frame`]: the frame codec
//! - [`auth`]: copy-on-write user table
//! - [`handshake`]: client and server halves of the key agreement
//! - [`morph`]: traffic profiles and shaping controllers
//! - [`session`]: established sessions and the data-plane loop
//! - [`dispatch`]: protocol sniffing, routing, and fallback decoys
//! - [`metrics`]: counters and latency percentiles
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sush_protocol::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn serve() -> Result<(), SushError> {
//! let config: Config = serde_json::from_str(
//!     r#"{"psk":"my-secret-key-32-bytes-long!!!!","users":[{"id":"alice"}]}"#,
//! ).expect("valid config");
//!
//! let dispatcher = Dispatcher::new(
//!     config,
//!     Arc::new(SystemRandom::new()),
//!     Arc::new(MetricsRegistry::new()),
//! )?;
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:443").await?;
//! loop {
//!     let (conn, _) = listener.accept().await?;
//!     let cancel = CancellationToken::new();
//!     match dispatcher.dispatch(conn, &cancel).await? {
//!         Dispatched::Tunnel { session, stream } => {
//!             // Attach the peer stream and drive the session:
//!             // run_session(Arc::new(session), peer, stream, ...).await
//!             let _ = (session, stream);
//!         }
//!         Dispatched::Fallback => {}
//!     }
//! }
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod core;
pub mod crypto;
pub mod dispatch;
pub mod frame;
pub mod handshake;
pub mod metrics;
pub mod morph;
pub mod session;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::auth::{UserId, UserRecord, UserTable};
    pub use crate::config::{Config, FallbackConfig, HandshakeHttpConfig, TrafficShapingConfig};
    pub use crate::core::{
        BufferPool, ConfigError, CryptoError, FrameError, HandshakeError, SessionError, SushError,
    };
    pub use crate::crypto::{
        EphemeralKeypair, ReplayCache, SecureRandom, SessionKey, SystemRandom, derive_session_key,
    };
    pub use crate::dispatch::{Classification, Dispatched, Dispatcher, PrefixedStream, classify};
    pub use crate::frame::{Frame, FrameCommand};
    pub use crate::handshake::{
        ClientConfig, HandshakeClient, HandshakeServer, PolicyGrant, PolicyRequest,
    };
    pub use crate::metrics::MetricsRegistry;
    pub use crate::morph::{TrafficMorpher, TrafficProfile};
    pub use crate::session::{Session, run_session};
}

// Re-export commonly used items at crate root.
pub use crate::core::SushError;
pub use crate::dispatch::{Dispatched, Dispatcher};
pub use crate::session::{Session, run_session};
