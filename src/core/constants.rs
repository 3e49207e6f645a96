//! Protocol constants for Sush.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// PROTOCOL IDENTIFICATION
// =============================================================================

/// Magic bytes opening every handshake request (`"SU"`).
pub const MAGIC: [u8; 2] = [0x53, 0x55];

/// Protocol version carried in byte three of the handshake.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Number of bytes the dispatcher inspects to classify a connection.
pub const SNIFF_PREFIX_SIZE: usize = 3;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Poly1305 / GCM authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// ChaCha20-Poly1305 and AES-GCM nonce size.
pub const AEAD_NONCE_SIZE: usize = 12;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 private key size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Session key size (HKDF-SHA256 output).
pub const SESSION_KEY_SIZE: usize = 32;

/// User identifier size.
pub const USER_ID_SIZE: usize = 16;

/// HKDF info label for session key derivation.
pub const SESSION_KEY_INFO: &[u8] = b"Sush-session-key-v1";

// =============================================================================
// FRAME LAYOUT
// =============================================================================

/// Frame header size (length + command).
pub const FRAME_HEADER_SIZE: usize = 3;

/// Bytes preceding the payload on the wire (header + nonce).
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + AEAD_NONCE_SIZE;

/// Maximum value of the frame `length` field.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Maximum plaintext a single frame can carry.
pub const MAX_FRAME_PLAINTEXT: usize = MAX_FRAME_PAYLOAD - AEAD_TAG_SIZE;

// =============================================================================
// HANDSHAKE LAYOUT
// =============================================================================

/// Handshake request size before the policy ciphertext.
pub const HANDSHAKE_REQUEST_MIN_SIZE: usize = 71;

/// Handshake response size before the policy grant ciphertext.
pub const HANDSHAKE_RESPONSE_MIN_SIZE: usize = 47;

/// Maximum accepted clock skew between client and server.
pub const TIMESTAMP_SKEW_MAX: Duration = Duration::from_secs(300);

/// How long a granted policy remains valid.
pub const GRANT_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// REPLAY DEFENSE
// =============================================================================

/// Retention window for handshake nonces.
pub const REPLAY_MAX_AGE: Duration = Duration::from_secs(300);

/// Upper bound on cached nonces; the cache refuses new entries when full.
pub const REPLAY_CACHE_CAPACITY: usize = 65_536;

// =============================================================================
// DISPATCH AND FALLBACK
// =============================================================================

/// Read deadline for the initial protocol sniff.
pub const SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a buffered inbound HTTP request.
pub const MAX_HTTP_REQUEST_SIZE: usize = 64 * 1024;

/// End-to-end deadline for a proxied fallback HTTP exchange.
pub const FALLBACK_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Dial deadline for the TCP fallback decoy.
pub const FALLBACK_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// BUFFER POOL
// =============================================================================

/// Size buckets for pooled I/O buffers, smallest to largest.
pub const BUFFER_BUCKETS: [usize; 7] = [64, 256, 1024, 4096, 8192, 16384, 65536];

/// Buffers retained per bucket before releases fall through to the allocator.
pub const BUFFERS_PER_BUCKET: usize = 32;
