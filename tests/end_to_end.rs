//! End-to-end scenarios from spec.md §8, driven against in-memory stand-ins
//! for the transport and dialer collaborators (`tokio::io::duplex`), the
//! same way the teacher's own connection handler is only exercisable
//! through concrete sockets — this crate supplements that with trait-based
//! seams so the scenarios run without any real network.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use relay_core::config::RelayConfig;
use relay_core::keys::StreamKey;
use relay_core::record::{self, assemble_record, build_header, ReadOutcome, RecordType};
use relay_core::replay::ReplayGuard;
use relay_core::transport::Dialer;
use relay_core::{handle_stream, StreamOutcome};
use relay_core::metadata::{self, AddressType, Metadata};

const PSK: &[u8] = b"topsecret";

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}

fn build_metadata_record(psk: &[u8], stream_id: u64, meta: &Metadata) -> Vec<u8> {
    let key = StreamKey::derive(psk, stream_id).unwrap();
    let plaintext = metadata::serialize(meta).unwrap();
    let iv = record::fresh_iv();
    let header = build_header(RecordType::Metadata, plaintext.len() as u32 + 16, 0, iv);
    let ciphertext = key.encrypt_with_header(&iv, &header, &plaintext).unwrap();
    assemble_record(header, &ciphertext, 0)
}

fn sample_metadata() -> Metadata {
    Metadata {
        timestamp_ns: now_ns(),
        address_type: AddressType::Ipv4,
        host: "1.2.3.4".to_owned(),
        port: 443,
        max_padding: 128,
    }
}

/// A dialer that always succeeds, handing back one side of a `duplex` pair
/// and keeping the other for the test to drive as "the upstream".
struct SucceedingDialer {
    server_side: Mutex<Option<DuplexStream>>,
}

#[async_trait]
impl Dialer for SucceedingDialer {
    type Stream = DuplexStream;

    async fn dial(&self, _host: &str, _port: u16, _timeout: Duration) -> io::Result<DuplexStream> {
        Ok(self.server_side.lock().unwrap().take().expect("dial called once"))
    }
}

struct FailingDialer;

#[async_trait]
impl Dialer for FailingDialer {
    type Stream = DuplexStream;

    async fn dial(&self, _host: &str, _port: u16, _timeout: Duration) -> io::Result<DuplexStream> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
    }
}

#[tokio::test]
async fn happy_path_ipv4_relays_both_directions() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (upstream_server_side, mut upstream_test_side) = tokio::io::duplex(64 * 1024);

    let dialer = SucceedingDialer {
        server_side: Mutex::new(Some(upstream_server_side)),
    };
    let replay_guard = ReplayGuard::default();
    let config = RelayConfig::with_psk(PSK);

    let meta = sample_metadata();
    let record_bytes = build_metadata_record(PSK, 1, &meta);

    let handler = tokio::spawn(async move {
        handle_stream(server, 1, PSK, &replay_guard, &config, &dialer).await
    });

    client.write_all(&record_bytes).await.unwrap();

    // "Upstream" sees the dialed connection; relay the uplink bytes.
    let mut upstream_buf = [0u8; 1024];
    let key = StreamKey::derive(PSK, 1).unwrap();
    let shaper_iv = record::fresh_iv();
    let uplink_plain = b"GET /\r\n\r\n";
    let header = build_header(RecordType::Data, uplink_plain.len() as u32 + 16, 0, shaper_iv);
    let ciphertext = key.encrypt_with_header(&shaper_iv, &header, uplink_plain).unwrap();
    client
        .write_all(&assemble_record(header, &ciphertext, 0))
        .await
        .unwrap();

    let n = upstream_test_side.read(&mut upstream_buf).await.unwrap();
    assert_eq!(&upstream_buf[..n], uplink_plain);

    upstream_test_side.write_all(b"200 OK").await.unwrap();

    let mut cursor_buf = Vec::new();
    let mut chunk = [0u8; 256];
    let n = client.read(&mut chunk).await.unwrap();
    cursor_buf.extend_from_slice(&chunk[..n]);
    let mut cursor = io::Cursor::new(cursor_buf);
    let outcome = record::read_next(&mut cursor, config_max_record())
        .await
        .unwrap();
    let rec = match outcome {
        ReadOutcome::Record(r) => r,
        ReadOutcome::Eof => panic!("expected a DATA record"),
    };
    assert_eq!(rec.record_type, RecordType::Data);
    let plaintext = key.decrypt(&rec.iv, &rec.header, &rec.payload).unwrap();
    assert_eq!(plaintext, b"200 OK");

    drop(client);
    drop(upstream_test_side);
    let outcome = handler.await.unwrap();
    assert!(matches!(outcome, StreamOutcome::Closed));
}

fn config_max_record() -> u32 {
    RelayConfig::default().max_record_bytes
}

#[tokio::test]
async fn wrong_psk_closes_silently_with_no_bytes_written() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let dialer = FailingDialer;
    let replay_guard = ReplayGuard::default();
    let config = RelayConfig::with_psk(b"topsecret");

    let meta = sample_metadata();
    // Encrypted with a different PSK than the server is configured with.
    let record_bytes = build_metadata_record(b"wrong", 1, &meta);

    let handler =
        tokio::spawn(async move { handle_stream(server, 1, b"topsecret", &replay_guard, &config, &dialer).await });

    client.write_all(&record_bytes).await.unwrap();
    client.shutdown().await.unwrap();

    let outcome = handler.await.unwrap();
    assert!(matches!(outcome, StreamOutcome::SilentClose(_)));

    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "server must not write anything back on auth failure");
}

#[tokio::test]
async fn replayed_iv_is_rejected_on_the_second_stream() {
    let replay_guard = Arc::new(ReplayGuard::default());
    let meta = sample_metadata();

    // First stream: identical metadata record succeeds and dials.
    {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let (upstream_server_side, _upstream_test_side) = tokio::io::duplex(64 * 1024);
        let dialer = SucceedingDialer {
            server_side: Mutex::new(Some(upstream_server_side)),
        };
        let config = RelayConfig::with_psk(PSK);
        let record_bytes = build_metadata_record(PSK, 1, &meta);
        let guard = Arc::clone(&replay_guard);
        let handler = tokio::spawn(async move { handle_stream(server, 1, PSK, &guard, &config, &dialer).await });
        client.write_all(&record_bytes).await.unwrap();
        drop(client);
        let outcome = handler.await.unwrap();
        assert!(matches!(outcome, StreamOutcome::Closed | StreamOutcome::SilentClose(_)));
    }

    // Second stream, different stream id, but the exact same METADATA bytes
    // (same IV): replay guard must reject it before any dial is attempted.
    {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let dialer = FailingDialer; // would fail loudly if reached
        let config = RelayConfig::with_psk(PSK);
        let record_bytes = build_metadata_record(PSK, 1, &meta);
        let guard = Arc::clone(&replay_guard);
        let handler = tokio::spawn(async move { handle_stream(server, 2, PSK, &guard, &config, &dialer).await });
        client.write_all(&record_bytes).await.unwrap();
        drop(client);
        let outcome = handler.await.unwrap();
        assert!(matches!(outcome, StreamOutcome::SilentClose("replayed IV")));
    }
}

#[tokio::test]
async fn stale_timestamp_closes_silently_before_dialing() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let dialer = FailingDialer; // would fail loudly if reached
    let replay_guard = ReplayGuard::default();
    let config = RelayConfig::with_psk(PSK);

    let mut meta = sample_metadata();
    meta.timestamp_ns = now_ns().saturating_sub(Duration::from_secs(60).as_nanos() as u64);
    let record_bytes = build_metadata_record(PSK, 1, &meta);

    let handler = tokio::spawn(async move { handle_stream(server, 1, PSK, &replay_guard, &config, &dialer).await });
    client.write_all(&record_bytes).await.unwrap();
    drop(client);

    let outcome = handler.await.unwrap();
    assert!(matches!(outcome, StreamOutcome::SilentClose("stale timestamp")));
}

#[tokio::test]
async fn upstream_dial_failure_emits_error_record() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let dialer = FailingDialer;
    let replay_guard = ReplayGuard::default();
    let config = RelayConfig::with_psk(PSK);

    let meta = sample_metadata();
    let record_bytes = build_metadata_record(PSK, 1, &meta);

    let handler = tokio::spawn(async move { handle_stream(server, 1, PSK, &replay_guard, &config, &dialer).await });
    client.write_all(&record_bytes).await.unwrap();

    let mut buf = vec![0u8; 256];
    let n = client.read(&mut buf).await.unwrap();
    buf.truncate(n);
    let mut cursor = io::Cursor::new(buf);
    let outcome = record::read_next(&mut cursor, config_max_record()).await.unwrap();
    let rec = match outcome {
        ReadOutcome::Record(r) => r,
        ReadOutcome::Eof => panic!("expected an ERROR record"),
    };
    assert_eq!(rec.record_type, RecordType::Error);
    let code = u16::from_be_bytes([rec.payload[0], rec.payload[1]]);
    assert_eq!(code, 0x0004);
    assert_eq!(&rec.payload[4..], b"connect failed");

    drop(client);
    let outcome = handler.await.unwrap();
    assert!(matches!(outcome, StreamOutcome::DialFailed(_)));
}

#[tokio::test]
async fn ping_is_answered_with_pong_and_no_dial() {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let dialer = FailingDialer; // would fail loudly if reached
    let replay_guard = ReplayGuard::default();
    let config = RelayConfig::with_psk(PSK);

    let ping = relay_core::record::build_plain_record(RecordType::Ping, &[]);

    let handler = tokio::spawn(async move { handle_stream(server, 1, PSK, &replay_guard, &config, &dialer).await });
    client.write_all(&ping).await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    buf.truncate(n);
    let mut cursor = io::Cursor::new(buf);
    let outcome = record::read_next(&mut cursor, config_max_record()).await.unwrap();
    let rec = match outcome {
        ReadOutcome::Record(r) => r,
        ReadOutcome::Eof => panic!("expected a PONG record"),
    };
    assert_eq!(rec.record_type, RecordType::Pong);

    let outcome = handler.await.unwrap();
    assert!(matches!(outcome, StreamOutcome::Ponged));
}
