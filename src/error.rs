//! Error taxonomy for the stream protocol core.
//!
//! Every fallible internal path returns one of these concrete types rather
//! than a boxed/`anyhow` error — the crate is a library, and its one
//! outward-facing entry point (`dispatcher::run_session`) is the only place
//! that collapses everything into `anyhow::Result`.

use thiserror::Error;

/// Record-framing failures: bad lengths, inconsistent header fields.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("total_length {0} is below the minimum header size of 28")]
    TooShort(u32),

    #[error("total_length {0} exceeds the configured maximum of {1}")]
    TooLong(u32, u32),

    #[error("payload_length + padding_length + 28 ({computed}) != total_length ({declared})")]
    LengthMismatch { declared: u32, computed: u64 },

    #[error("unrecognised record type byte {0:#04x}")]
    UnknownRecordType(u8),

    #[error("short read mid-record: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("I/O error while reading or writing a record: {0}")]
    Io(#[from] std::io::Error),
}

/// AEAD / key-schedule failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("HKDF output length request is invalid")]
    InvalidOkmLength,

    #[error("AEAD authentication failed")]
    AeadAuthFailed,
}

/// Failures while parsing the decrypted metadata plaintext.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("plaintext is shorter than the 8-byte timestamp prefix")]
    Truncated,

    #[error("unsupported address_type byte {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("option block declares more bytes than are present")]
    OptionOverflow,

    #[error("DNS name length byte exceeds the 255-byte limit")]
    DnsNameTooLong,

    #[error("host bytes are not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("host string is not a valid address for the declared address_type")]
    InvalidHostAddress,
}

/// Well-known diagnostic codes carried in `ERROR` records (spec.md §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    BadFraming = 0x0001,
    MetadataDecryptFailed = 0x0002,
    UnsupportedAddressOrOption = 0x0003,
    UpstreamConnectFailed = 0x0004,
    StreamAborted = 0x0005,
    ResourceLimit = 0x0006,
    Timeout = 0x0007,
}

/// How a stream handler run ended. Not sent to the peer (that is the
/// province of `ErrorCode`/`ERROR` records) — this is the server-side
/// observability surface the spec explicitly permits in §7: "logs are the
/// only user-visible surface for failed streams other than the optional
/// error record".
#[derive(Debug)]
pub enum StreamOutcome {
    /// Reached `CLOSED` after a normal pipe teardown.
    Closed,
    /// Closed before authentication; no bytes were ever written to the peer.
    SilentClose(&'static str),
    /// Upstream dial failed; an `ERROR` record was written before closing.
    DialFailed(std::io::Error),
    /// A PING was answered with PONG and the stream closed.
    Ponged,
}
