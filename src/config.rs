//! Runtime configuration for the relay core.
//!
//! Flag/env parsing is explicitly out of scope (spec.md §1); this struct is
//! the seam glue code populates before handing control to the dispatcher,
//! the same role `comms::DEFAULT_SERVER_PORT` plays for the teacher's much
//! smaller configuration surface.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::record::DEFAULT_MAX_RECORD;
use crate::replay::DEFAULT_REPLAY_WINDOW;

/// How long the stream handler waits for the first (`METADATA`) record
/// before giving up silently, per spec.md §4.F step 1.
pub const METADATA_READ_DEADLINE: Duration = Duration::from_secs(5);

/// How long the dialer gets to establish the upstream TCP connection, per
/// spec.md §4.F step 6.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Recommended downlink read-chunk size, per spec.md §5 ("32 KiB minimum,
/// 512 KiB recommended").
pub const DEFAULT_DOWNLINK_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Process-wide pre-shared key, read-only after startup (spec.md §3).
    #[serde(skip)]
    pub psk: Vec<u8>,

    #[serde(with = "humantime_secs")]
    pub replay_window: Duration,

    pub max_record_bytes: u32,

    #[serde(with = "humantime_secs")]
    pub metadata_deadline: Duration,

    #[serde(with = "humantime_secs")]
    pub dial_timeout: Duration,

    pub downlink_buffer_bytes: usize,

    /// Upper bound on concurrent streams per session (spec.md §5). Enforced
    /// by the transport collaborator; carried here so glue code has one
    /// place to configure it.
    pub max_streams_per_session: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            psk: Vec::new(),
            replay_window: DEFAULT_REPLAY_WINDOW,
            max_record_bytes: DEFAULT_MAX_RECORD,
            metadata_deadline: METADATA_READ_DEADLINE,
            dial_timeout: DIAL_TIMEOUT,
            downlink_buffer_bytes: DEFAULT_DOWNLINK_BUFFER,
            max_streams_per_session: 1000,
        }
    }
}

impl RelayConfig {
    pub fn with_psk(psk: impl Into<Vec<u8>>) -> Self {
        Self {
            psk: psk.into(),
            ..Self::default()
        }
    }
}

mod humantime_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
