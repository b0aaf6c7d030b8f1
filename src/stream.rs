//! Per-stream state machine (spec.md §4.F) — the heart of the core.
//!
//! `AWAITING_METADATA → DECRYPTING → DIALING → PIPING → CLOSING → CLOSED`.
//! Grounded on `comms::Server::handle_connection`: that function already
//! races an inbound read against an outbound send inside one
//! `tokio::select!` loop; this generalizes the same shape to two
//! record-framed byte directions against a dialed TCP peer instead of a
//! broadcast channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf,
};

use crate::config::RelayConfig;
use crate::error::{ErrorCode, StreamOutcome};
use crate::keys::StreamKey;
use crate::metadata;
use crate::padding::PaddingShaper;
use crate::record::{
    self, assemble_record, build_header, build_plain_record, fresh_iv, ReadOutcome, RecordType,
};
use crate::replay::ReplayGuard;
use crate::transport::Dialer;

/// Transitions are monotonic; `Closed` is terminal (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingMetadata,
    Decrypting,
    Dialing,
    Piping,
    Closing,
    Closed,
}

/// Drives one stream from its first record to `CLOSED`.
///
/// `stream_id` is the transport's monotonic per-connection identifier, fed
/// into the key schedule (spec.md §4.B). `psk` is the process-wide
/// pre-shared key. `replay_guard` is shared across every stream of the
/// process (spec.md §3).
pub async fn handle_stream<P, D>(
    mut peer: P,
    stream_id: u64,
    psk: &[u8],
    replay_guard: &ReplayGuard,
    config: &RelayConfig,
    dialer: &D,
) -> StreamOutcome
where
    P: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    D: Dialer,
{
    let mut state = StreamState::AwaitingMetadata;
    tracing::debug!(stream_id, ?state, "stream started");

    // --- AWAITING_METADATA -------------------------------------------------
    let first = match tokio::time::timeout(
        config.metadata_deadline,
        record::read_next(&mut peer, config.max_record_bytes),
    )
    .await
    {
        Ok(Ok(ReadOutcome::Record(rec))) => rec,
        Ok(Ok(ReadOutcome::Eof)) => {
            return close(&mut state, StreamOutcome::SilentClose("peer closed before metadata"))
        }
        Ok(Err(err)) => {
            tracing::debug!(stream_id, %err, "framing error awaiting metadata");
            return close(&mut state, StreamOutcome::SilentClose("framing error"));
        }
        Err(_elapsed) => {
            return close(&mut state, StreamOutcome::SilentClose("metadata deadline exceeded"))
        }
    };

    if first.record_type == RecordType::Ping {
        let pong = build_plain_record(RecordType::Pong, &[]);
        let _ = record::write_record(&mut peer, &pong).await;
        return close(&mut state, StreamOutcome::Ponged);
    }
    if first.record_type != RecordType::Metadata {
        return close(&mut state, StreamOutcome::SilentClose("first record was not METADATA"));
    }

    // IV replay check happens on the cleartext header before spending any
    // CPU on AEAD decryption — cheap, and the IV is available either way.
    let now = Instant::now();
    if replay_guard.seen_or_add(first.iv, now) {
        return close(&mut state, StreamOutcome::SilentClose("replayed IV"));
    }

    // --- DECRYPTING ----------------------------------------------------
    state = StreamState::Decrypting;
    let key = match StreamKey::derive(psk, stream_id) {
        Ok(k) => k,
        Err(err) => {
            tracing::debug!(stream_id, %err, "key derivation failed");
            return close(&mut state, StreamOutcome::SilentClose("key derivation failed"));
        }
    };

    let plaintext = match key.decrypt(&first.iv, &first.header, &first.payload) {
        Ok(pt) => pt,
        Err(err) => {
            tracing::debug!(stream_id, %err, "metadata decrypt failed");
            return close(&mut state, StreamOutcome::SilentClose("metadata decrypt failed"));
        }
    };

    let meta = match metadata::parse(&plaintext) {
        Ok(m) => m,
        Err(err) => {
            tracing::debug!(stream_id, %err, "metadata parse failed");
            return close(&mut state, StreamOutcome::SilentClose("metadata parse failed"));
        }
    };

    // The timestamp is the sole source fed to freshness validation
    // (spec.md §4.D, §6); it only becomes available once decrypted.
    if !within_replay_window(meta.timestamp_ns, config.replay_window) {
        return close(&mut state, StreamOutcome::SilentClose("stale timestamp"));
    }

    // --- DIALING ---------------------------------------------------------
    state = StreamState::Dialing;
    tracing::debug!(stream_id, host = %meta.host, port = meta.port, "dialing upstream");
    let mut upstream = match dialer.dial(&meta.host, meta.port, config.dial_timeout).await {
        Ok(u) => u,
        Err(err) => {
            tracing::info!(stream_id, %err, "upstream connect failed");
            let body = error_payload(ErrorCode::UpstreamConnectFailed, "connect failed");
            let error_record = build_plain_record(RecordType::Error, &body);
            let _ = record::write_record(&mut peer, &error_record).await;
            return close(&mut state, StreamOutcome::DialFailed(err));
        }
    };

    // --- PIPING ------------------------------------------------------------
    state = StreamState::Piping;
    let shaper = PaddingShaper::new(meta.max_padding);
    pump(peer, upstream, key, shaper, config, stream_id).await;

    close(&mut state, StreamOutcome::Closed)
}

fn within_replay_window(timestamp_ns: u64, window: Duration) -> bool {
    let now_ns = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(_) => return false,
    };
    let delta = (now_ns - timestamp_ns as i128).abs();
    delta <= window.as_nanos() as i128
}

fn error_payload(code: ErrorCode, message: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + message.len());
    body.extend_from_slice(&(code as u16).to_be_bytes());
    body.extend_from_slice(&[0u8; 2]);
    body.extend_from_slice(message.as_bytes());
    body
}

/// Runs the uplink and downlink directions as two independent tasks and
/// waits for either to finish, then aborts the other (spec.md §4.F step 8,
/// §5, §9's "goroutine pair" note). Each direction's record/byte reads run
/// to completion inside their own task rather than racing another I/O
/// source in a shared `select!` — a framed read can be left mid-record by
/// plain cancellation, which would desynchronize the stream on the next
/// iteration, so the two directions are isolated instead of interleaved.
async fn pump<P, U>(peer: P, upstream: U, key: StreamKey, shaper: PaddingShaper, config: &RelayConfig, stream_id: u64)
where
    P: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let key = Arc::new(key);
    let (peer_rd, peer_wr) = tokio::io::split(peer);
    let (upstream_rd, upstream_wr) = tokio::io::split(upstream);
    let max_record = config.max_record_bytes;
    let downlink_buffer_bytes = config.downlink_buffer_bytes;

    let mut uplink = tokio::spawn(uplink_loop(peer_rd, upstream_wr, Arc::clone(&key), max_record, stream_id));
    let mut downlink = tokio::spawn(downlink_loop(
        upstream_rd,
        peer_wr,
        key,
        shaper,
        downlink_buffer_bytes,
        stream_id,
    ));

    tokio::select! {
        _ = &mut uplink => { downlink.abort(); }
        _ = &mut downlink => { uplink.abort(); }
    }
}

/// peer → upstream: unwrap `DATA` records, discard anything else.
async fn uplink_loop<P, U>(
    mut peer_rd: ReadHalf<P>,
    mut upstream_wr: WriteHalf<U>,
    key: Arc<StreamKey>,
    max_record: u32,
    stream_id: u64,
) where
    P: AsyncRead + Send + 'static,
    U: AsyncWrite + Send + 'static,
{
    loop {
        match record::read_next(&mut peer_rd, max_record).await {
            Ok(ReadOutcome::Record(rec)) => {
                if rec.record_type == RecordType::Data {
                    match key.decrypt(&rec.iv, &rec.header, &rec.payload) {
                        Ok(plaintext) => {
                            if upstream_wr.write_all(&plaintext).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::debug!(stream_id, %err, "uplink record auth failed");
                            return;
                        }
                    }
                }
                // Non-DATA record types are forward-compatible no-ops on
                // the uplink (spec.md §4.F).
            }
            Ok(ReadOutcome::Eof) => {
                let _ = upstream_wr.shutdown().await;
                return;
            }
            Err(err) => {
                tracing::debug!(stream_id, %err, "uplink framing error");
                return;
            }
        }
    }
}

/// upstream → peer: wrap raw bytes into fresh `DATA` records.
async fn downlink_loop<U, P>(
    mut upstream_rd: ReadHalf<U>,
    mut peer_wr: WriteHalf<P>,
    key: Arc<StreamKey>,
    shaper: PaddingShaper,
    buffer_bytes: usize,
    stream_id: u64,
) where
    U: AsyncRead + Send + 'static,
    P: AsyncWrite + Send + 'static,
{
    let mut buf = vec![0u8; buffer_bytes];
    loop {
        match upstream_rd.read(&mut buf).await {
            Ok(0) => {
                let _ = peer_wr.shutdown().await;
                return;
            }
            Ok(n) => {
                if write_data_record(&mut peer_wr, &key, &shaper, &buf[..n]).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::debug!(stream_id, %err, "downlink read error");
                return;
            }
        }
    }
}

async fn write_data_record<P: AsyncWrite + Unpin>(
    peer: &mut P,
    key: &StreamKey,
    shaper: &PaddingShaper,
    plaintext: &[u8],
) -> std::io::Result<()> {
    let iv = fresh_iv();
    let padding_length = shaper.choose(plaintext.len());
    // AES-128-GCM appends a 16-byte tag; the header's payload_length must
    // reflect the ciphertext length, and the header itself is the AAD, so
    // it has to be built before encryption can run.
    let ciphertext_len = plaintext.len() as u32 + 16;
    let header = build_header(RecordType::Data, ciphertext_len, padding_length, iv);
    let ciphertext = key
        .encrypt_with_header(&iv, &header, plaintext)
        .expect("AES-128-GCM encryption with a fresh nonce cannot fail");
    let bytes = assemble_record(header, &ciphertext, padding_length);
    record::write_record(peer, &bytes).await
}

fn close(state: &mut StreamState, outcome: StreamOutcome) -> StreamOutcome {
    *state = StreamState::Closing;
    *state = StreamState::Closed;
    outcome
}
