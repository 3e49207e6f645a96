//! Core constants, error taxonomy, and shared utilities.

mod buffer;
mod constants;
mod error;

pub use buffer::BufferPool;
pub use constants::*;
pub use error::{
    ConfigError, CryptoError, FrameError, HandshakeError, SessionError, SushError,
};
