//! Client half of the handshake.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::auth::UserId;
use crate::config::HandshakeHttpConfig;
use crate::core::{HandshakeError, PROTOCOL_VERSION};
use crate::crypto::{EphemeralKeypair, SecureRandom, derive_session_key, psk_open, psk_seal};
use crate::session::{Session, unix_now};

use super::http;
use super::message::{HandshakeRequest, HandshakeResponse, PolicyGrant, PolicyRequest};

/// Everything a client needs to open a tunnel.
#[derive(Clone)]
pub struct ClientConfig {
    /// Pre-shared secret protecting the policy wrapper.
    pub psk: String,
    /// This client's identifier.
    pub user_id: UserId,
    /// Traffic policy to request.
    pub policy: String,
    /// Free-form policy parameters.
    pub params: HashMap<String, String>,
    /// Cosmetics of the HTTP shell.
    pub http: HandshakeHttpConfig,
}

/// Client half of the key agreement.
pub struct HandshakeClient {
    config: ClientConfig,
    rng: Arc<dyn SecureRandom>,
}

impl HandshakeClient {
    /// Create a client from its configuration.
    pub fn new(config: ClientConfig, rng: Arc<dyn SecureRandom>) -> Self {
        Self { config, rng }
    }

    /// Run the handshake over `stream`, HTTP-wrapped (the default
    /// carriage), and return the established session.
    pub async fn handshake<S>(&self, stream: &mut S) -> Result<Session, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (request, keypair, client_nonce) = self.build_request()?;

        let wire = http::build_request(&self.config.http, &request.encode());
        stream.write_all(&wire).await?;
        stream.flush().await?;

        let body = http::read_response_body(stream).await?;
        self.complete(&body, keypair, client_nonce)
    }

    /// Run the handshake with the body sent raw on the stream, no HTTP
    /// shell. The request must land in a single segment; servers read the
    /// raw carriage in one pass.
    pub async fn handshake_raw<S>(&self, stream: &mut S) -> Result<Session, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (request, keypair, client_nonce) = self.build_request()?;

        stream.write_all(&request.encode()).await?;
        stream.flush().await?;

        let mut body = vec![0u8; 8192];
        let n = stream.read(&mut body).await?;
        if n == 0 {
            return Err(HandshakeError::TruncatedMessage);
        }
        body.truncate(n);
        self.complete(&body, keypair, client_nonce)
    }

    fn build_request(
        &self,
    ) -> Result<(HandshakeRequest, EphemeralKeypair, [u8; 12]), HandshakeError> {
        let keypair = EphemeralKeypair::generate();
        let client_nonce = self.rng.random_nonce();

        let policy = PolicyRequest {
            policy: self.config.policy.clone(),
            params: self.config.params.clone(),
        };
        let policy_json = serde_json::to_vec(&policy)?;
        let policy_ciphertext = psk_seal(&policy_json, self.config.psk.as_bytes(), &client_nonce)?;

        let request = HandshakeRequest {
            version: PROTOCOL_VERSION,
            client_public: *keypair.public_key(),
            user_id: self.config.user_id,
            timestamp: unix_now(),
            nonce: client_nonce,
            policy_ciphertext,
        };
        Ok((request, keypair, client_nonce))
    }

    fn complete(
        &self,
        body: &[u8],
        keypair: EphemeralKeypair,
        client_nonce: [u8; 12],
    ) -> Result<Session, HandshakeError> {
        let response = HandshakeResponse::decode(body)?;

        let shared = keypair.shared_secret(&response.server_public);
        let session_key = derive_session_key(&shared, &client_nonce, &response.nonce)?;

        let grant_json =
            psk_open(&response.policy_ciphertext, self.config.psk.as_bytes(), &response.nonce)?;
        let grant: PolicyGrant = serde_json::from_slice(&grant_json)?;

        tracing::debug!(policy = %grant.policy, "handshake established");
        Ok(Session::new(self.config.user_id, session_key, grant, self.rng.as_ref()))
    }
}
