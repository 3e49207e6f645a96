//! Server half of the handshake.
//!
//! The server walks `AwaitRequest -> Validating -> Responding ->
//! Established`, or lands in `Rejected`. A rejected handshake still
//! answers with a syntactically plausible HTTP 200 whose body is decoy
//! JSON, never an abrupt close: an active prober must see the same
//! observable behavior for "bad credential" and "wrong server".

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::auth::UserTable;
use crate::core::{
    GRANT_VALIDITY, HandshakeError, MAX_HTTP_REQUEST_SIZE, PROTOCOL_VERSION, TIMESTAMP_SKEW_MAX,
};
use crate::crypto::{
    EphemeralKeypair, ReplayCache, SecureRandom, derive_session_key, psk_open, psk_seal,
};
use crate::metrics::{Metrics, MetricsRegistry};
use crate::morph::TrafficProfile;
use crate::session::{Session, unix_now};

use super::http::{self, ParsedHttpRequest};
use super::message::{HandshakeRequest, HandshakeResponse, PolicyGrant, PolicyRequest};

/// Server-side handshake progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    AwaitRequest,
    Validating,
    Responding,
    Established,
    Rejected,
}

/// How the handshake body arrived.
pub enum HandshakeCarriage {
    /// The body starts on the stream directly; `Vec` holds bytes the
    /// dispatcher already consumed. The remainder is read in a single
    /// pass, so the client must send the request in one segment.
    Raw(Vec<u8>),
    /// The body arrived inside a parsed HTTP request.
    Http(ParsedHttpRequest),
}

/// Server half of the key agreement.
pub struct HandshakeServer {
    psk: String,
    users: Arc<UserTable>,
    replay: Arc<ReplayCache>,
    rng: Arc<dyn SecureRandom>,
    metrics: Arc<MetricsRegistry>,
}

impl HandshakeServer {
    /// Create a server sharing the process-wide user table and replay
    /// cache.
    pub fn new(
        psk: String,
        users: Arc<UserTable>,
        replay: Arc<ReplayCache>,
        rng: Arc<dyn SecureRandom>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self { psk, users, replay, rng, metrics }
    }

    /// Validate a handshake request and answer it.
    ///
    /// On success the stream is positioned at the first session frame and
    /// the returned [`Session`] carries the derived key. On rejection the
    /// decoy response has already been written.
    pub async fn accept<S>(
        &self,
        stream: &mut S,
        carriage: HandshakeCarriage,
    ) -> Result<Session, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();
        tracing::trace!(state = ?ServerState::AwaitRequest, "handshake started");

        let http_mode = matches!(carriage, HandshakeCarriage::Http(_));
        let body = match carriage {
            HandshakeCarriage::Http(parsed) => parsed.body,
            HandshakeCarriage::Raw(buffered) => read_raw_body(stream, buffered).await?,
        };

        let request = match HandshakeRequest::decode(&body) {
            Ok(request) => request,
            Err(e) => return self.reject(stream, ServerState::Validating, e).await,
        };

        if !self.replay.check_and_add(&request.nonce) {
            Metrics::incr(&self.metrics.counters.replays_rejected);
            return self
                .reject(stream, ServerState::Validating, HandshakeError::ReplayDetected)
                .await;
        }

        let now = unix_now();
        if now.abs_diff(request.timestamp) > TIMESTAMP_SKEW_MAX.as_secs() {
            Metrics::incr(&self.metrics.counters.timestamp_skews);
            return self
                .reject(stream, ServerState::Validating, HandshakeError::TimestampSkew)
                .await;
        }

        let user = match self.users.get(&request.user_id) {
            Some(user) => user,
            None => {
                Metrics::incr(&self.metrics.counters.auth_failures);
                return self
                    .reject(stream, ServerState::Validating, HandshakeError::AuthFailed)
                    .await;
            }
        };
        let psk = user.psk.as_deref().unwrap_or(&self.psk);

        let policy_request: PolicyRequest =
            match psk_open(&request.policy_ciphertext, psk.as_bytes(), &request.nonce)
                .map_err(HandshakeError::from)
                .and_then(|json| Ok(serde_json::from_slice(&json)?))
            {
                Ok(policy) => policy,
                Err(e) => return self.reject(stream, ServerState::Validating, e).await,
            };

        tracing::trace!(state = ?ServerState::Responding, "request validated");
        let approved = if TrafficProfile::is_known(&policy_request.policy) {
            policy_request.policy
        } else {
            "raw".to_string()
        };
        let grant = PolicyGrant {
            policy: approved,
            params: policy_request.params,
            valid_until: now + GRANT_VALIDITY.as_secs(),
        };

        let keypair = EphemeralKeypair::generate();
        let server_nonce = self.rng.random_nonce();
        let grant_json = serde_json::to_vec(&grant)?;
        let policy_ciphertext = psk_seal(&grant_json, psk.as_bytes(), &server_nonce)?;

        let response = HandshakeResponse {
            version: PROTOCOL_VERSION,
            server_public: *keypair.public_key(),
            nonce: server_nonce,
            policy_ciphertext,
        };
        let response_body = response.encode();
        if http_mode {
            stream.write_all(&http::build_response(&response_body)).await?;
        } else {
            stream.write_all(&response_body).await?;
        }
        stream.flush().await?;

        let shared = keypair.shared_secret(&request.client_public);
        let session_key = derive_session_key(&shared, &request.nonce, &server_nonce)?;

        Metrics::incr(&self.metrics.counters.handshakes_ok);
        self.metrics.handshake_latency.record(started.elapsed());
        tracing::info!(state = ?ServerState::Established, policy = %grant.policy, "handshake established");

        Ok(Session::new(request.user_id, session_key, grant, self.rng.as_ref()))
    }

    /// Answer a failed handshake with decoy JSON and surface the error.
    ///
    /// The response is shaped exactly like a successful one; only a
    /// holder of the PSK could tell the body is not a grant.
    async fn reject<S>(
        &self,
        stream: &mut S,
        reached: ServerState,
        error: HandshakeError,
    ) -> Result<Session, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut token = [0u8; 12];
        self.rng.fill_random(&mut token);
        let body = format!(
            r#"{{"status":"ok","request_id":"{}"}}"#,
            crate::session::hex(&token)
        );
        let _ = stream.write_all(&http::build_response(body.as_bytes())).await;
        let _ = stream.flush().await;

        tracing::debug!(state = ?ServerState::Rejected, reached = ?reached, error = %error, "handshake rejected");
        Err(error)
    }
}

/// Read the raw-carriage body: whatever the dispatcher buffered plus one
/// read pass. Clients using this carriage write the request in a single
/// segment.
async fn read_raw_body<S>(stream: &mut S, mut buffered: Vec<u8>) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; 8192];
    let n = stream.read(&mut chunk).await?;
    buffered.extend_from_slice(&chunk[..n]);
    if buffered.len() > MAX_HTTP_REQUEST_SIZE {
        return Err(HandshakeError::HttpTooLarge);
    }
    Ok(buffered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{UserId, UserRecord, UserTable};
    use crate::config::HandshakeHttpConfig;
    use crate::crypto::SystemRandom;
    use crate::handshake::client::{ClientConfig, HandshakeClient};
    use std::collections::HashMap;
    use tokio::io::duplex;

    const PSK: &str = "my-secret-key-32-bytes-long!!!!";

    fn test_user_id() -> UserId {
        UserId::from_bytes([
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x0F, 0x10,
        ])
    }

    fn server() -> HandshakeServer {
        let users = Arc::new(UserTable::new());
        users.add(UserRecord {
            id: test_user_id(),
            email: "user@example.com".to_string(),
            policy: "mimic-http2-api".to_string(),
            psk: None,
        });
        HandshakeServer::new(
            PSK.to_string(),
            users,
            Arc::new(ReplayCache::new()),
            Arc::new(SystemRandom::new()),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn client(psk: &str) -> HandshakeClient {
        HandshakeClient::new(
            ClientConfig {
                psk: psk.to_string(),
                user_id: test_user_id(),
                policy: "mimic-http2-api".to_string(),
                params: HashMap::new(),
                http: HandshakeHttpConfig::default(),
            },
            Arc::new(SystemRandom::new()),
        )
    }

    async fn accept_http(server: &HandshakeServer, stream: &mut (impl AsyncRead + AsyncWrite + Unpin)) -> Result<Session, HandshakeError> {
        let parsed = http::read_request(stream, b"").await?;
        server.accept(stream, HandshakeCarriage::Http(parsed)).await
    }

    #[tokio::test]
    async fn test_happy_path_derives_matching_keys() {
        let server = server();
        let client = client(PSK);
        let (mut cs, mut ss) = duplex(0x10000);

        let (client_result, server_result) =
            tokio::join!(client.handshake(&mut cs), accept_http(&server, &mut ss));

        let client_session = client_result.unwrap();
        let server_session = server_result.unwrap();

        assert_eq!(client_session.key().as_bytes(), server_session.key().as_bytes());
        assert_eq!(client_session.policy_grant().policy, "mimic-http2-api");
        assert_eq!(server_session.policy_grant().policy, "mimic-http2-api");
        assert_eq!(server_session.user_id(), &test_user_id());
        assert!(server_session.policy_grant().valid_until > unix_now());
    }

    #[tokio::test]
    async fn test_unknown_policy_granted_as_raw() {
        let server = server();
        let mut config = ClientConfig {
            psk: PSK.to_string(),
            user_id: test_user_id(),
            policy: "mimic-smoke-signals".to_string(),
            params: HashMap::new(),
            http: HandshakeHttpConfig::default(),
        };
        config.params.insert("k".to_string(), "v".to_string());
        let client = HandshakeClient::new(config, Arc::new(SystemRandom::new()));

        let (mut cs, mut ss) = duplex(0x10000);
        let (client_result, server_result) =
            tokio::join!(client.handshake(&mut cs), accept_http(&server, &mut ss));

        let session = client_result.unwrap();
        server_result.unwrap();
        assert_eq!(session.policy_grant().policy, "raw");
        assert_eq!(session.policy_grant().params.get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn test_raw_carriage() {
        let server = server();
        let client = client(PSK);
        let (mut cs, mut ss) = duplex(0x10000);

        let server_fut = async {
            // Dispatcher sniffed three bytes off the front.
            let mut prefix = [0u8; 3];
            ss.read_exact(&mut prefix).await.unwrap();
            server.accept(&mut ss, HandshakeCarriage::Raw(prefix.to_vec())).await
        };
        let (client_result, server_result) =
            tokio::join!(client.handshake_raw(&mut cs), server_fut);

        let client_session = client_result.unwrap();
        let server_session = server_result.unwrap();
        assert_eq!(client_session.key().as_bytes(), server_session.key().as_bytes());
    }

    #[tokio::test]
    async fn test_replayed_request_rejected_with_decoy() {
        let server = server();
        let client = client(PSK);

        // First exchange succeeds; capture the client's exact bytes.
        let (mut cs, mut ss) = duplex(0x10000);
        let captured = {
            let client_fut = client.handshake(&mut cs);
            let server_fut = async {
                let parsed = http::read_request(&mut ss, b"").await.unwrap();
                let raw = parsed.raw.clone();
                let result = server.accept(&mut ss, HandshakeCarriage::Http(parsed)).await;
                (raw, result)
            };
            let (client_result, (raw, server_result)) = tokio::join!(client_fut, server_fut);
            client_result.unwrap();
            server_result.unwrap();
            raw
        };

        // Replay the identical bytes on a fresh connection.
        let (mut cs, mut ss) = duplex(0x10000);
        let replay_fut = async {
            cs.write_all(&captured).await.unwrap();
            // The server still answers with a plausible HTTP 200...
            let body = http::read_response_body(&mut cs).await.unwrap();
            // ...whose body is not a valid handshake response.
            assert!(HandshakeResponse::decode(&body).is_err());
        };
        let server_fut = async {
            let parsed = http::read_request(&mut ss, b"").await.unwrap();
            server.accept(&mut ss, HandshakeCarriage::Http(parsed)).await
        };
        let (_, server_result) = tokio::join!(replay_fut, server_fut);
        assert!(matches!(server_result, Err(HandshakeError::ReplayDetected)));
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let server = server();

        // A correctly formed request whose timestamp is ten minutes old.
        let rng = SystemRandom::new();
        let keypair = EphemeralKeypair::generate();
        let nonce = rng.random_nonce();
        let policy_json =
            serde_json::to_vec(&PolicyRequest { policy: "raw".to_string(), params: HashMap::new() })
                .unwrap();
        let request = HandshakeRequest {
            version: PROTOCOL_VERSION,
            client_public: *keypair.public_key(),
            user_id: test_user_id(),
            timestamp: unix_now() - 600,
            nonce,
            policy_ciphertext: psk_seal(&policy_json, PSK.as_bytes(), &nonce).unwrap(),
        };

        let (mut cs, mut ss) = duplex(0x10000);
        let send_fut = async {
            let wire = http::build_request(&HandshakeHttpConfig::default(), &request.encode());
            cs.write_all(&wire).await.unwrap();
            let body = http::read_response_body(&mut cs).await.unwrap();
            assert!(HandshakeResponse::decode(&body).is_err());
        };
        let server_fut = accept_http(&server, &mut ss);
        let (_, result) = tokio::join!(send_fut, server_fut);
        assert!(matches!(result, Err(HandshakeError::TimestampSkew)));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let server = server();
        let mut config = ClientConfig {
            psk: PSK.to_string(),
            user_id: UserId::from_bytes([0xFF; 16]),
            policy: "raw".to_string(),
            params: HashMap::new(),
            http: HandshakeHttpConfig::default(),
        };
        config.http.path = "/api/v1/data".to_string();
        let client = HandshakeClient::new(config, Arc::new(SystemRandom::new()));

        let (mut cs, mut ss) = duplex(0x10000);
        let (client_result, server_result) =
            tokio::join!(client.handshake(&mut cs), accept_http(&server, &mut ss));

        assert!(client_result.is_err());
        assert!(matches!(server_result, Err(HandshakeError::AuthFailed)));
    }

    #[tokio::test]
    async fn test_per_user_psk_override() {
        let users = Arc::new(UserTable::new());
        users.add(UserRecord {
            id: test_user_id(),
            email: String::new(),
            policy: String::new(),
            psk: Some("alice-only-secret-32-bytes-long!".to_string()),
        });
        let server = HandshakeServer::new(
            PSK.to_string(),
            users,
            Arc::new(ReplayCache::new()),
            Arc::new(SystemRandom::new()),
            Arc::new(MetricsRegistry::new()),
        );

        // The global PSK no longer opens this user's wrapper.
        let (mut cs, mut ss) = duplex(0x10000);
        let client_handle = client(PSK);
        let (client_result, server_result) =
            tokio::join!(client_handle.handshake(&mut cs), accept_http(&server, &mut ss));
        assert!(client_result.is_err());
        assert!(server_result.is_err());

        // The override does.
        let (mut cs, mut ss) = duplex(0x10000);
        let client_handle = client("alice-only-secret-32-bytes-long!");
        let (client_result, server_result) = tokio::join!(
            client_handle.handshake(&mut cs),
            accept_http(&server, &mut ss)
        );
        let client_session = client_result.unwrap();
        let server_session = server_result.unwrap();
        assert_eq!(client_session.key().as_bytes(), server_session.key().as_bytes());
    }

    #[tokio::test]
    async fn test_wrong_psk_rejected() {
        let server = server();
        let client = client("wrong-secret-key-32-bytes-long!!");

        let (mut cs, mut ss) = duplex(0x10000);
        let (client_result, server_result) =
            tokio::join!(client.handshake(&mut cs), accept_http(&server, &mut ss));

        // The server cannot open the policy wrapper; the client cannot
        // open the decoy body. Neither side establishes a session.
        assert!(client_result.is_err());
        assert!(server_result.is_err());
    }

    #[tokio::test]
    async fn test_metrics_track_outcomes() {
        let users = Arc::new(UserTable::new());
        users.add(UserRecord {
            id: test_user_id(),
            email: String::new(),
            policy: String::new(),
            psk: None,
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let server = HandshakeServer::new(
            PSK.to_string(),
            users,
            Arc::new(ReplayCache::new()),
            Arc::new(SystemRandom::new()),
            metrics.clone(),
        );
        let client = client(PSK);

        let (mut cs, mut ss) = duplex(0x10000);
        let (client_result, server_result) =
            tokio::join!(client.handshake(&mut cs), accept_http(&server, &mut ss));
        client_result.unwrap();
        server_result.unwrap();

        assert_eq!(Metrics::get(&metrics.counters.handshakes_ok), 1);
        assert_eq!(metrics.handshake_latency.seen(), 1);
    }
}
