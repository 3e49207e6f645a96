//! Handshake message layouts.
//!
//! Request body:
//!
//! ```text
//! magic        : 2  BE
//! version      : 1
//! client_pub   : 32
//! user_id      : 16
//! timestamp    : 8  BE
//! nonce        : 12
//! policy_req   : remainder (AES-GCM ciphertext with tag)
//! ```
//!
//! Response body:
//!
//! ```text
//! magic        : 2  BE
//! version      : 1
//! server_pub   : 32
//! nonce        : 12
//! policy_grant : remainder
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::auth::UserId;
use crate::core::{
    AEAD_NONCE_SIZE, HANDSHAKE_REQUEST_MIN_SIZE, HANDSHAKE_RESPONSE_MIN_SIZE, HandshakeError,
    MAGIC, PROTOCOL_VERSION, PUBLIC_KEY_SIZE, USER_ID_SIZE,
};

/// Client hello carrying the key agreement and wrapped policy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol version.
    pub version: u8,
    /// Client's ephemeral X25519 public key.
    pub client_public: [u8; PUBLIC_KEY_SIZE],
    /// Claimed user identifier.
    pub user_id: UserId,
    /// Unix seconds at send time.
    pub timestamp: u64,
    /// Client handshake nonce; also the policy wrapper nonce.
    pub nonce: [u8; AEAD_NONCE_SIZE],
    /// PSK-wrapped [`PolicyRequest`] JSON.
    pub policy_ciphertext: Vec<u8>,
}

impl HandshakeRequest {
    /// Serialize to the body layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HANDSHAKE_REQUEST_MIN_SIZE + self.policy_ciphertext.len());
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        out.extend_from_slice(&self.client_public);
        out.extend_from_slice(self.user_id.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.policy_ciphertext);
        out
    }

    /// Parse a body, verifying magic and version.
    pub fn decode(buf: &[u8]) -> Result<Self, HandshakeError> {
        if buf.len() < HANDSHAKE_REQUEST_MIN_SIZE {
            return Err(HandshakeError::TruncatedMessage);
        }
        if buf[..2] != MAGIC {
            return Err(HandshakeError::InvalidMagic);
        }
        let version = buf[2];
        if version != PROTOCOL_VERSION {
            return Err(HandshakeError::UnsupportedVersion(version));
        }

        let mut client_public = [0u8; PUBLIC_KEY_SIZE];
        client_public.copy_from_slice(&buf[3..35]);
        let mut user_id = [0u8; USER_ID_SIZE];
        user_id.copy_from_slice(&buf[35..51]);
        let timestamp = u64::from_be_bytes(buf[51..59].try_into().expect("8-byte slice"));
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce.copy_from_slice(&buf[59..71]);

        Ok(Self {
            version,
            client_public,
            user_id: UserId::from_bytes(user_id),
            timestamp,
            nonce,
            policy_ciphertext: buf[HANDSHAKE_REQUEST_MIN_SIZE..].to_vec(),
        })
    }
}

/// Server hello completing the key agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Protocol version.
    pub version: u8,
    /// Server's ephemeral X25519 public key.
    pub server_public: [u8; PUBLIC_KEY_SIZE],
    /// Server handshake nonce; also the grant wrapper nonce.
    pub nonce: [u8; AEAD_NONCE_SIZE],
    /// PSK-wrapped [`PolicyGrant`] JSON.
    pub policy_ciphertext: Vec<u8>,
}

impl HandshakeResponse {
    /// Serialize to the body layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(HANDSHAKE_RESPONSE_MIN_SIZE + self.policy_ciphertext.len());
        out.extend_from_slice(&MAGIC);
        out.push(self.version);
        out.extend_from_slice(&self.server_public);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.policy_ciphertext);
        out
    }

    /// Parse a body, verifying magic and version.
    pub fn decode(buf: &[u8]) -> Result<Self, HandshakeError> {
        if buf.len() < HANDSHAKE_RESPONSE_MIN_SIZE {
            return Err(HandshakeError::TruncatedMessage);
        }
        if buf[..2] != MAGIC {
            return Err(HandshakeError::InvalidMagic);
        }
        let version = buf[2];
        if version != PROTOCOL_VERSION {
            return Err(HandshakeError::UnsupportedVersion(version));
        }

        let mut server_public = [0u8; PUBLIC_KEY_SIZE];
        server_public.copy_from_slice(&buf[3..35]);
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce.copy_from_slice(&buf[35..47]);

        Ok(Self {
            version,
            server_public,
            nonce,
            policy_ciphertext: buf[HANDSHAKE_RESPONSE_MIN_SIZE..].to_vec(),
        })
    }
}

/// Traffic policy a client asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRequest {
    /// Requested profile name.
    pub policy: String,
    /// Free-form parameters.
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Traffic policy the server granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyGrant {
    /// Approved profile name.
    pub policy: String,
    /// Parameters echoed back from the request.
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Unix seconds until which the grant holds.
    pub valid_until: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> HandshakeRequest {
        HandshakeRequest {
            version: PROTOCOL_VERSION,
            client_public: [0xA1; PUBLIC_KEY_SIZE],
            user_id: UserId::from_bytes([0x10; USER_ID_SIZE]),
            timestamp: 1_750_000_000,
            nonce: [0x0C; AEAD_NONCE_SIZE],
            policy_ciphertext: vec![0xEE; 40],
        }
    }

    #[test]
    fn test_request_roundtrip() {
        let req = sample_request();
        let wire = req.encode();
        assert_eq!(wire.len(), HANDSHAKE_REQUEST_MIN_SIZE + 40);
        assert_eq!(&wire[..2], &MAGIC);
        assert_eq!(wire[2], PROTOCOL_VERSION);

        let decoded = HandshakeRequest::decode(&wire).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = HandshakeResponse {
            version: PROTOCOL_VERSION,
            server_public: [0xB2; PUBLIC_KEY_SIZE],
            nonce: [0x0D; AEAD_NONCE_SIZE],
            policy_ciphertext: vec![0xFF; 24],
        };
        let wire = resp.encode();
        assert_eq!(wire.len(), HANDSHAKE_RESPONSE_MIN_SIZE + 24);

        let decoded = HandshakeResponse::decode(&wire).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_request_rejects_bad_magic() {
        let mut wire = sample_request().encode();
        wire[0] = 0x47;
        assert!(matches!(
            HandshakeRequest::decode(&wire),
            Err(HandshakeError::InvalidMagic)
        ));
    }

    #[test]
    fn test_request_rejects_bad_version() {
        let mut wire = sample_request().encode();
        wire[2] = 0x09;
        assert!(matches!(
            HandshakeRequest::decode(&wire),
            Err(HandshakeError::UnsupportedVersion(0x09))
        ));
    }

    #[test]
    fn test_request_rejects_truncation() {
        let wire = sample_request().encode();
        assert!(matches!(
            HandshakeRequest::decode(&wire[..HANDSHAKE_REQUEST_MIN_SIZE - 1]),
            Err(HandshakeError::TruncatedMessage)
        ));
    }

    #[test]
    fn test_policy_json_roundtrip() {
        let req = PolicyRequest {
            policy: "mimic-http2-api".to_string(),
            params: HashMap::from([("burst".to_string(), "5".to_string())]),
        };
        let json = serde_json::to_vec(&req).unwrap();
        let back: PolicyRequest = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, req);

        // params may be omitted entirely.
        let bare: PolicyRequest = serde_json::from_str(r#"{"policy":"raw"}"#).unwrap();
        assert!(bare.params.is_empty());
    }
}
