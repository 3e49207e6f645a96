//! Error types for the Sush protocol.

use thiserror::Error;

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag, wrong key, or corrupted data).
    ///
    /// Deliberately does not say which; callers must not leak the reason.
    #[error("AEAD decryption failed")]
    DecryptionFailed,

    /// A nonce of the wrong length was supplied.
    #[error("invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Required nonce length.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// Key material of the wrong length was supplied.
    #[error("invalid key length")]
    InvalidKeyLength,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Errors in the frame codec.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The input ended before a complete frame was available.
    #[error("frame too short")]
    FrameTooShort,

    /// The declared payload length exceeds what a frame can carry.
    #[error("frame too large: {length} bytes")]
    FrameTooLarge {
        /// Declared payload length.
        length: usize,
    },

    /// Crypto error while sealing or opening the payload.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors during the handshake, on either side.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The message did not open with the protocol magic.
    #[error("invalid magic")]
    InvalidMagic,

    /// The peer speaks an unknown protocol version.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// The handshake nonce has been seen before.
    #[error("replay detected")]
    ReplayDetected,

    /// The request timestamp is outside the accepted window.
    #[error("timestamp skew exceeds limit")]
    TimestampSkew,

    /// The user identifier is not authorized.
    #[error("authentication failed")]
    AuthFailed,

    /// The message body ended before the fixed-layout fields.
    #[error("truncated handshake message")]
    TruncatedMessage,

    /// The HTTP shell exceeded the request size cap.
    #[error("http request exceeds size cap")]
    HttpTooLarge,

    /// The HTTP shell could not be parsed.
    #[error("malformed http envelope")]
    MalformedHttp,

    /// Policy payload was not valid JSON.
    #[error("policy decode error: {0}")]
    PolicyDecode(#[from] serde_json::Error),

    /// Crypto error while wrapping or unwrapping handshake material.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error on the underlying stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in the session data-plane.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Frame codec error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The connection was cancelled from outside.
    #[error("session cancelled")]
    Cancelled,

    /// I/O error on either end of the tunnel.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in the configuration tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No users are configured.
    #[error("configuration requires at least one user")]
    NoUsers,

    /// A user entry has an empty identifier.
    #[error("user identifier must not be empty")]
    EmptyUserId,

    /// The pre-shared key is empty.
    #[error("pre-shared key must not be empty")]
    EmptyPsk,
}

/// Top-level Sush errors.
#[derive(Debug, Error)]
pub enum SushError {
    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Frame codec error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Handshake error.
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
