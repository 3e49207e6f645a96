//! The bidirectional frame loop.
//!
//! Once a session exists, two flows run concurrently until one returns:
//! the uplink reads plaintext from the local peer and writes sealed
//! `DATA` frames to the remote end, the downlink reads frames and
//! dispatches on their command. The first error wins; cancellation
//! aborts both flows.
//!
//! A `DATA` plaintext is `u16 BE inner_length || data || padding`; the
//! prefix lets the receiver strip morphing padding without trusting the
//! frame length.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::core::{BufferPool, FrameError, SessionError};
use crate::crypto::SecureRandom;
use crate::frame::{Frame, FrameCommand, read_frame, write_frame};
use crate::metrics::{Metrics, MetricsRegistry};
use crate::morph::TrafficMorpher;

use super::Session;

/// How much local plaintext one frame carries at most.
const UPLINK_CHUNK: usize = 8192;

/// Drive a session until either flow finishes or the token fires.
///
/// `local` is the plaintext peer stream, `remote` the tunnel carrying
/// frames. Both directions share the morpher: the uplink shapes outgoing
/// payloads, the downlink feeds it parameter adjustments from control
/// frames.
pub async fn run_session<L, R>(
    session: Arc<Session>,
    local: L,
    remote: R,
    morpher: TrafficMorpher,
    rng: Arc<dyn SecureRandom>,
    pool: Arc<BufferPool>,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
) -> Result<(), SessionError>
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);
    let morpher = Mutex::new(morpher);

    Metrics::incr(&metrics.counters.active_sessions);
    tracing::debug!(session = session.id(), "session data-plane started");

    let result = tokio::select! {
        r = uplink(&session, &mut local_rd, &mut remote_wr, &morpher, rng.as_ref(), &pool, &metrics) => r,
        r = downlink(&session, &mut remote_rd, &mut local_wr, &morpher, &metrics) => r,
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
    };

    Metrics::decr(&metrics.counters.active_sessions);
    match &result {
        Ok(()) => tracing::debug!(session = session.id(), "session closed"),
        Err(e) => tracing::debug!(session = session.id(), error = %e, "session terminated"),
    }
    result
}

async fn uplink<R, W>(
    session: &Session,
    local_rd: &mut R,
    remote_wr: &mut W,
    morpher: &Mutex<TrafficMorpher>,
    rng: &dyn SecureRandom,
    pool: &BufferPool,
    metrics: &MetricsRegistry,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let mut buf = pool.acquire(UPLINK_CHUNK);
        let n = match local_rd.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                pool.release(buf);
                return Err(e.into());
            }
        };

        if n == 0 {
            pool.release(buf);
            let close = Frame::seal(session.key(), rng, FrameCommand::Close, &[])
                .map_err(SessionError::Frame)?;
            write_frame(remote_wr, &close).await?;
            return Ok(());
        }

        let mut plaintext = Vec::with_capacity(2 + n);
        plaintext.extend_from_slice(&(n as u16).to_be_bytes());
        plaintext.extend_from_slice(&buf[..n]);
        pool.release(buf);

        let delay = {
            let mut morpher = morpher.lock().unwrap_or_else(|e| e.into_inner());
            morpher.shape_payload(&mut plaintext);
            morpher.next_delay()
        };
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let frame = Frame::seal(session.key(), rng, FrameCommand::Data, &plaintext)
            .map_err(SessionError::Frame)?;
        write_frame(remote_wr, &frame).await?;

        session.touch();
        Metrics::incr(&metrics.counters.frames_tx);
        Metrics::add(&metrics.counters.bytes_tx, n as u64);
    }
}

async fn downlink<R, W>(
    session: &Session,
    remote_rd: &mut R,
    local_wr: &mut W,
    morpher: &Mutex<TrafficMorpher>,
    metrics: &MetricsRegistry,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = match read_frame(remote_rd).await {
            Ok(frame) => frame,
            // The remote hanging up between frames is a normal close.
            Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        session.touch();
        Metrics::incr(&metrics.counters.frames_rx);

        match frame.command {
            FrameCommand::Data => {
                let plaintext = open_or_count(session, &frame, metrics)?;
                if plaintext.len() < 2 {
                    return Err(SessionError::Frame(FrameError::FrameTooShort));
                }
                let inner = u16::from_be_bytes([plaintext[0], plaintext[1]]) as usize;
                if 2 + inner > plaintext.len() {
                    return Err(SessionError::Frame(FrameError::FrameTooShort));
                }
                local_wr.write_all(&plaintext[2..2 + inner]).await?;
                local_wr.flush().await?;
                Metrics::add(&metrics.counters.bytes_rx, inner as u64);
            }
            FrameCommand::PaddingCtrl => {
                let params = open_or_count(session, &frame, metrics)?;
                morpher.lock().unwrap_or_else(|e| e.into_inner()).apply_padding_ctrl(&params);
            }
            FrameCommand::TimingCtrl => {
                let params = open_or_count(session, &frame, metrics)?;
                morpher.lock().unwrap_or_else(|e| e.into_inner()).apply_timing_ctrl(&params);
            }
            FrameCommand::Close => {
                let _ = open_or_count(session, &frame, metrics)?;
                local_wr.flush().await?;
                return Ok(());
            }
            FrameCommand::Unknown(byte) => {
                tracing::debug!(session = session.id(), command = byte, "ignoring unknown command");
            }
        }
    }
}

fn open_or_count(
    session: &Session,
    frame: &Frame,
    metrics: &MetricsRegistry,
) -> Result<Vec<u8>, SessionError> {
    frame.open(session.key()).map_err(|e| {
        Metrics::incr(&metrics.counters.decrypt_failures);
        SessionError::Frame(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserId;
    use crate::crypto::{SessionKey, SystemRandom};
    use crate::handshake::PolicyGrant;
    use crate::morph::TrafficProfile;
    use crate::session::unix_now;
    use std::collections::HashMap;

    fn paired_sessions() -> (Arc<Session>, Arc<Session>) {
        let rng = SystemRandom::new();
        let grant = PolicyGrant {
            policy: "raw".to_string(),
            params: HashMap::new(),
            valid_until: unix_now() + 86_400,
        };
        let key = [0x42; 32];
        let a = Session::new(
            UserId::from_bytes([0x01; 16]),
            SessionKey::from_bytes(key),
            grant.clone(),
            &rng,
        );
        let b = Session::new(
            UserId::from_bytes([0x01; 16]),
            SessionKey::from_bytes(key),
            grant,
            &rng,
        );
        (Arc::new(a), Arc::new(b))
    }

    fn raw_morpher() -> TrafficMorpher {
        TrafficMorpher::new(TrafficProfile::raw(), false, Arc::new(SystemRandom::new()))
    }

    struct TestEnv {
        rng: Arc<SystemRandom>,
        pool: Arc<BufferPool>,
        metrics: Arc<MetricsRegistry>,
    }

    fn env() -> TestEnv {
        TestEnv {
            rng: Arc::new(SystemRandom::new()),
            pool: Arc::new(BufferPool::new()),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let (client_sess, server_sess) = paired_sessions();
        let e = env();

        let (client_wire, server_wire) = tokio::io::duplex(0x20000);
        let (mut client_app, client_local) = tokio::io::duplex(0x10000);
        let (server_app, server_local) = tokio::io::duplex(0x10000);

        let client = tokio::spawn(run_session(
            client_sess,
            client_local,
            client_wire,
            raw_morpher(),
            e.rng.clone(),
            e.pool.clone(),
            e.metrics.clone(),
            CancellationToken::new(),
        ));
        let server = tokio::spawn(run_session(
            server_sess,
            server_local,
            server_wire,
            raw_morpher(),
            e.rng.clone(),
            e.pool.clone(),
            e.metrics.clone(),
            CancellationToken::new(),
        ));

        // The server's peer echoes everything back.
        tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(server_app);
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });

        client_app.write_all(b"Hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client_app.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"Hello");

        drop(client_app);
        let _ = tokio::time::timeout(Duration::from_secs(5), client).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    }

    #[tokio::test]
    async fn test_close_propagates() {
        let (client_sess, server_sess) = paired_sessions();
        let e = env();

        let (client_wire, server_wire) = tokio::io::duplex(0x20000);
        let (client_app, client_local) = tokio::io::duplex(0x10000);
        let (server_app, server_local) = tokio::io::duplex(0x10000);

        let client = tokio::spawn(run_session(
            client_sess,
            client_local,
            client_wire,
            raw_morpher(),
            e.rng.clone(),
            e.pool.clone(),
            e.metrics.clone(),
            CancellationToken::new(),
        ));
        let server = tokio::spawn(run_session(
            server_sess,
            server_local,
            server_wire,
            raw_morpher(),
            e.rng.clone(),
            e.pool.clone(),
            e.metrics.clone(),
            CancellationToken::new(),
        ));
        // Keep the server's peer open; the tunnel close should still end
        // the server loop.
        let _hold = server_app;

        // Local peer hangs up: uplink sends CLOSE and returns.
        drop(client_app);

        let client_result =
            tokio::time::timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
        assert!(client_result.is_ok());

        let server_result =
            tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(server_result.is_ok());
        assert_eq!(Metrics::get(&e.metrics.counters.active_sessions), 0);
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let (client_sess, _) = paired_sessions();
        let e = env();

        let (client_wire, _server_wire_held) = tokio::io::duplex(0x10000);
        let (_client_app_held, client_local) = tokio::io::duplex(0x10000);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session(
            client_sess,
            client_local,
            client_wire,
            raw_morpher(),
            e.rng.clone(),
            e.pool.clone(),
            e.metrics.clone(),
            cancel.clone(),
        ));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_wrong_key_frame_terminates() {
        let (_, server_sess) = paired_sessions();
        let e = env();

        let (mut attacker_wire, server_wire) = tokio::io::duplex(0x10000);
        let (_server_app_held, server_local) = tokio::io::duplex(0x10000);

        let server = tokio::spawn(run_session(
            server_sess,
            server_local,
            server_wire,
            raw_morpher(),
            e.rng.clone(),
            e.pool.clone(),
            e.metrics.clone(),
            CancellationToken::new(),
        ));

        // A frame sealed under a different key must kill the session.
        let wrong_key = SessionKey::from_bytes([0x99; 32]);
        let rng = SystemRandom::new();
        let frame = Frame::seal(&wrong_key, &rng, FrameCommand::Data, b"\x00\x04data").unwrap();
        attacker_wire.write_all(&frame.encode()).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(matches!(result, Err(SessionError::Frame(FrameError::Crypto(_)))));
        assert_eq!(Metrics::get(&e.metrics.counters.decrypt_failures), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_skipped() {
        let (client_sess, server_sess) = paired_sessions();
        let e = env();

        let (mut wire, server_wire) = tokio::io::duplex(0x10000);
        let (mut server_app, server_local) = tokio::io::duplex(0x10000);

        let _server = tokio::spawn(run_session(
            server_sess,
            server_local,
            server_wire,
            raw_morpher(),
            e.rng.clone(),
            e.pool.clone(),
            e.metrics.clone(),
            CancellationToken::new(),
        ));

        let rng = SystemRandom::new();

        // Unknown command first, then a well-formed data frame: the
        // session must survive the former and deliver the latter.
        let unknown =
            Frame::seal(client_sess.key(), &rng, FrameCommand::Unknown(0x7E), b"?").unwrap();
        wire.write_all(&unknown.encode()).await.unwrap();

        let data =
            Frame::seal(client_sess.key(), &rng, FrameCommand::Data, b"\x00\x02ok").unwrap();
        wire.write_all(&data.encode()).await.unwrap();

        let mut out = [0u8; 2];
        tokio::time::timeout(Duration::from_secs(5), server_app.read_exact(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&out, b"ok");
    }
}
