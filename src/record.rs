//! Length-prefixed, record-framed wire codec (spec.md §3, §4.A).
//!
//! Header layout (28 bytes, big-endian multi-byte fields), always sent as
//! associated data alongside an AEAD-encrypted payload:
//!
//! ```text
//! total_length (4) | type (1) | reserved (3) | payload_length (4) | padding_length (4) | iv (12)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;

pub const HEADER_LEN: usize = 28;
pub const IV_LEN: usize = 12;

/// Default upper bound on `total_length`, per spec.md §4.A.
pub const DEFAULT_MAX_RECORD: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Metadata = 0x01,
    Data = 0x02,
    Ping = 0x03,
    Pong = 0x04,
    Error = 0x7f,
}

impl RecordType {
    fn from_byte(byte: u8) -> Result<Self, FramingError> {
        match byte {
            0x01 => Ok(Self::Metadata),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::Ping),
            0x04 => Ok(Self::Pong),
            0x7f => Ok(Self::Error),
            other => Err(FramingError::UnknownRecordType(other)),
        }
    }
}

/// A decoded record: the 28-byte header verbatim (used as AEAD associated
/// data), the record type, IV, payload and padding length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: RecordType,
    pub header: [u8; HEADER_LEN],
    pub iv: [u8; IV_LEN],
    pub payload: Bytes,
    pub padding_length: u32,
}

/// Outcome of a single `read_next` call.
pub enum ReadOutcome {
    Record(Record),
    /// Transport closed with no bytes consumed for the next record.
    Eof,
}

/// Reads exactly one record from `reader`.
///
/// A clean EOF at the very start of a record (no bytes read yet) yields
/// [`ReadOutcome::Eof`]; any short read once the length prefix has started
/// is a [`FramingError`], per spec.md §4.A.
pub async fn read_next(
    reader: &mut (impl AsyncRead + Unpin),
    max_record: u32,
) -> Result<ReadOutcome, FramingError> {
    let mut len_buf = [0u8; 4];
    let n = read_prefix(reader, &mut len_buf).await?;
    if n == 0 {
        return Ok(ReadOutcome::Eof);
    }
    if n != 4 {
        return Err(FramingError::ShortRead {
            expected: 4,
            got: n,
        });
    }

    let total_length = u32::from_be_bytes(len_buf);
    if total_length < HEADER_LEN as u32 {
        return Err(FramingError::TooShort(total_length));
    }
    if total_length > max_record {
        return Err(FramingError::TooLong(total_length, max_record));
    }

    // `total_length` covers the header (including the 4 bytes already read
    // into `len_buf`) plus payload plus padding, so only `total_length - 4`
    // more bytes remain on the wire for this record.
    let remaining = total_length - 4;
    let mut rest = vec![0u8; remaining as usize];
    reader
        .read_exact(&mut rest)
        .await
        .map_err(|e| shortened(e, remaining as usize))?;

    let mut cursor = BytesMut::from(&rest[..]);

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&len_buf);
    header[4..HEADER_LEN].copy_from_slice(&cursor[0..HEADER_LEN - 4]);
    cursor.advance(HEADER_LEN - 4);

    let record_type = RecordType::from_byte(header[4])?;
    let payload_length = u32::from_be_bytes(header[8..12].try_into().unwrap());
    let padding_length = u32::from_be_bytes(header[12..16].try_into().unwrap());
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&header[16..HEADER_LEN]);

    let computed = payload_length as u64 + padding_length as u64 + HEADER_LEN as u64;
    if computed != total_length as u64 {
        return Err(FramingError::LengthMismatch {
            declared: total_length,
            computed,
        });
    }
    if cursor.remaining() != (payload_length + padding_length) as usize {
        return Err(FramingError::LengthMismatch {
            declared: total_length,
            computed: cursor.remaining() as u64 + HEADER_LEN as u64,
        });
    }

    let payload = cursor.split_to(payload_length as usize).freeze();
    // Remaining bytes are padding; discarded.

    Ok(ReadOutcome::Record(Record {
        record_type,
        header,
        iv,
        payload,
        padding_length,
    }))
}

/// Reads the 4-byte length prefix, returning the number of bytes actually
/// read (0 only on a clean EOF before any byte is consumed).
async fn read_prefix(
    reader: &mut (impl AsyncRead + Unpin),
    buf: &mut [u8; 4],
) -> Result<usize, FramingError> {
    let mut total = 0;
    while total < 4 {
        let n = reader.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn shortened(e: std::io::Error, expected: usize) -> FramingError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FramingError::ShortRead { expected, got: 0 }
    } else {
        FramingError::Io(e)
    }
}

/// Draws a fresh random IV, suitable for any outbound record carrying AEAD
/// plaintext (spec.md §4.A).
pub fn fresh_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Builds the 28-byte header for a record with the given `payload_length`
/// (i.e. the ciphertext length once AEAD has been applied) and
/// `padding_length`. The header is needed *before* encryption happens, since
/// it doubles as the AEAD associated data (spec.md §4.B).
pub fn build_header(
    record_type: RecordType,
    payload_length: u32,
    padding_length: u32,
    iv: [u8; IV_LEN],
) -> [u8; HEADER_LEN] {
    let total_length = HEADER_LEN as u32 + payload_length + padding_length;
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&total_length.to_be_bytes());
    header[4] = record_type as u8;
    // header[5..8] reserved, left zero.
    header[8..12].copy_from_slice(&payload_length.to_be_bytes());
    header[12..16].copy_from_slice(&padding_length.to_be_bytes());
    header[16..HEADER_LEN].copy_from_slice(&iv);
    header
}

/// Appends `payload` (already encrypted, for `DATA`/`METADATA`; cleartext for
/// `ERROR`/`PONG`) and `padding_length` bytes of random padding after
/// `header`, producing the full on-wire record.
pub fn assemble_record(header: [u8; HEADER_LEN], payload: &[u8], padding_length: u32) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len() + padding_length as usize);
    out.put_slice(&header);
    out.put_slice(payload);
    if padding_length > 0 {
        let mut padding = vec![0u8; padding_length as usize];
        rand::rngs::OsRng.fill_bytes(&mut padding);
        out.put_slice(&padding);
    }
    out.to_vec()
}

/// Builds a record with zero padding and a zeroed IV, for the cleartext
/// diagnostic record types (`ERROR`, `PONG`) per spec.md §4.A.
pub fn build_plain_record(record_type: RecordType, payload: &[u8]) -> Vec<u8> {
    let header = build_header(record_type, payload.len() as u32, 0, [0u8; IV_LEN]);
    assemble_record(header, payload, 0)
}

/// Writes pre-built record bytes to `writer`.
pub async fn write_record(
    writer: &mut (impl AsyncWrite + Unpin),
    bytes: &[u8],
) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
