//! Session dispatcher (spec.md §4.G).
//!
//! Grounded directly on `comms::Server::listen`: an accept loop that
//! `tokio::spawn`s one task per accepted stream, sharing state by cloning an
//! `Arc`. This is the crate's one outward-facing entry point, so it is the
//! only place that collapses everything into `anyhow::Result` — matching
//! `comms::Result = anyhow::Result<()>` at the equivalent boundary in the
//! teacher.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::RelayConfig;
use crate::error::StreamOutcome;
use crate::replay::ReplayGuard;
use crate::stream::handle_stream;
use crate::transport::Dialer;

/// Produces the next accepted bidirectional stream on a session, along with
/// the transport's monotonic per-connection stream identifier (spec.md §1).
/// Modeled as a trait so the dispatcher can be driven by any transport —
/// the production implementation wraps a WebTransport/QUIC session handle,
/// out of scope for this crate.
#[async_trait]
pub trait SessionAcceptor: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Returns `None` once the session is closed.
    async fn accept_stream(&mut self) -> std::io::Result<Option<(u64, Self::Stream)>>;
}

/// Owns a session handle and spawns one stream-handler task per accepted
/// stream (spec.md §4.G). Terminates when the session closes or accept
/// fails; already-spawned handlers are left to run to completion.
pub async fn run_session<A, D>(
    mut acceptor: A,
    psk: Arc<Vec<u8>>,
    replay_guard: Arc<ReplayGuard>,
    config: Arc<RelayConfig>,
    dialer: Arc<D>,
) -> anyhow::Result<()>
where
    A: SessionAcceptor,
    D: Dialer + 'static,
{
    loop {
        let accepted = acceptor.accept_stream().await;
        match accepted {
            Ok(Some((stream_id, stream))) => {
                let psk = Arc::clone(&psk);
                let replay_guard = Arc::clone(&replay_guard);
                let config = Arc::clone(&config);
                let dialer = Arc::clone(&dialer);

                tokio::spawn(async move {
                    let outcome =
                        handle_stream(stream, stream_id, &psk, &replay_guard, &config, &*dialer)
                            .await;
                    log_outcome(stream_id, &outcome);
                });
            }
            Ok(None) => {
                tracing::info!("session closed");
                return Ok(());
            }
            Err(err) => {
                tracing::warn!(%err, "error accepting stream; ending session");
                return Err(err.into());
            }
        }
    }
}

fn log_outcome(stream_id: u64, outcome: &StreamOutcome) {
    match outcome {
        StreamOutcome::Closed => tracing::debug!(stream_id, "stream closed"),
        StreamOutcome::SilentClose(reason) => {
            tracing::debug!(stream_id, reason, "stream closed silently")
        }
        StreamOutcome::DialFailed(err) => {
            tracing::info!(stream_id, %err, "stream closed after dial failure")
        }
        StreamOutcome::Ponged => tracing::debug!(stream_id, "answered ping, closed"),
    }
}
