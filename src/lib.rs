//! Per-stream wire protocol core for an encrypted TCP relay gateway.
//!
//! This crate implements only the hard part named in the specification it
//! is built from: a length-prefixed, record-framed, AEAD-encrypted
//! control/data channel with stream-keyed key derivation, replay
//! protection, timestamp validation, traffic-shaping padding, and a strict
//! bidirectional pipe between a transport-provided stream and a dialed TCP
//! conversation. The transport (session/stream acceptance) and the TCP
//! dialer are external collaborators, modeled here as traits in
//! [`transport`] so the core is testable without either.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod keys;
pub mod metadata;
pub mod padding;
pub mod record;
pub mod replay;
pub mod stream;
pub mod transport;

pub use config::RelayConfig;
pub use dispatcher::{run_session, SessionAcceptor};
pub use error::StreamOutcome;
pub use replay::ReplayGuard;
pub use stream::{handle_stream, StreamState};
pub use transport::{Dialer, TcpDialer};
