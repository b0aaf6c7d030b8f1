//! Metadata plaintext parser (spec.md §3, §4.C, §6).
//!
//! The plaintext obtained from decrypting the first (`METADATA`) record is
//! laid out as: an 8-byte big-endian nanosecond timestamp (spec.md §6's
//! extension point for replay-guard freshness), then the address/port/option
//! structure of spec.md §3.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MetadataError;

const DEFAULT_MAX_PADDING: u16 = 64;
const OPTION_MAX_PADDING: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Ipv6,
    Dns,
}

impl AddressType {
    fn to_byte(&self) -> u8 {
        match self {
            Self::Ipv4 => 0x01,
            Self::Ipv6 => 0x02,
            Self::Dns => 0x03,
        }
    }
}

/// Parsed destination and session options, plus the embedded timestamp
/// consumed by the replay guard (spec.md §4.D).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub timestamp_ns: u64,
    pub address_type: AddressType,
    pub host: String,
    pub port: u16,
    pub max_padding: u16,
}

pub fn parse(plaintext: &[u8]) -> Result<Metadata, MetadataError> {
    if plaintext.len() < 8 {
        return Err(MetadataError::Truncated);
    }
    let mut buf = Bytes::from(plaintext.to_vec());
    let timestamp_ns = buf.get_u64();

    if buf.remaining() < 1 {
        return Err(MetadataError::Truncated);
    }
    let address_byte = buf.get_u8();

    if buf.remaining() < 2 {
        return Err(MetadataError::Truncated);
    }
    let port = buf.get_u16();

    let (address_type, host) = match address_byte {
        0x01 => {
            if buf.remaining() < 4 {
                return Err(MetadataError::Truncated);
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            (AddressType::Ipv4, std::net::Ipv4Addr::from(octets).to_string())
        }
        0x02 => {
            if buf.remaining() < 16 {
                return Err(MetadataError::Truncated);
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            (AddressType::Ipv6, std::net::Ipv6Addr::from(octets).to_string())
        }
        0x03 => {
            if buf.remaining() < 1 {
                return Err(MetadataError::Truncated);
            }
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(MetadataError::Truncated);
            }
            let mut name = vec![0u8; len];
            buf.copy_to_slice(&mut name);
            (AddressType::Dns, std::str::from_utf8(&name)?.to_owned())
        }
        other => return Err(MetadataError::UnsupportedAddressType(other)),
    };

    if buf.remaining() < 2 {
        return Err(MetadataError::Truncated);
    }
    let options_length = buf.get_u16() as usize;
    if buf.remaining() < options_length {
        return Err(MetadataError::OptionOverflow);
    }
    let mut options = buf.split_to(options_length);

    let mut max_padding = DEFAULT_MAX_PADDING;
    while options.remaining() >= 2 {
        let opt_type = options.get_u8();
        let opt_len = options.get_u8() as usize;
        if options.remaining() < opt_len {
            return Err(MetadataError::OptionOverflow);
        }
        let value = options.split_to(opt_len);
        if opt_type == OPTION_MAX_PADDING {
            if value.len() == 2 {
                max_padding = u16::from_be_bytes([value[0], value[1]]);
            }
            // Malformed value length: ignored rather than aborting, same as
            // any other unrecognised option (spec.md §3).
        }
        // Unknown option types are skipped, not rejected.
    }

    Ok(Metadata {
        timestamp_ns,
        address_type,
        host,
        port,
        max_padding,
    })
}

/// Serialises a [`Metadata`] back to plaintext bytes. Used by tests and by
/// any client-side counterpart built on top of this crate.
///
/// Errors rather than panics on a `host` that doesn't fit its declared
/// `address_type` — an IPv4/IPv6 field that doesn't parse as one, or a DNS
/// name over the 255-byte limit the single length byte can express
/// (spec.md §8).
pub fn serialize(meta: &Metadata) -> Result<Vec<u8>, MetadataError> {
    let mut buf = BytesMut::new();
    buf.put_u64(meta.timestamp_ns);
    buf.put_u8(meta.address_type.to_byte());
    buf.put_u16(meta.port);

    match meta.address_type {
        AddressType::Ipv4 => {
            let addr: std::net::Ipv4Addr = meta
                .host
                .parse()
                .map_err(|_| MetadataError::InvalidHostAddress)?;
            buf.put_slice(&addr.octets());
        }
        AddressType::Ipv6 => {
            let addr: std::net::Ipv6Addr = meta
                .host
                .parse()
                .map_err(|_| MetadataError::InvalidHostAddress)?;
            buf.put_slice(&addr.octets());
        }
        AddressType::Dns => {
            let name = meta.host.as_bytes();
            if name.len() > 255 {
                return Err(MetadataError::DnsNameTooLong);
            }
            buf.put_u8(name.len() as u8);
            buf.put_slice(name);
        }
    }

    let mut options = BytesMut::new();
    options.put_u8(OPTION_MAX_PADDING);
    options.put_u8(2);
    options.put_u16(meta.max_padding);

    buf.put_u16(options.len() as u16);
    buf.put_slice(&options);
    Ok(buf.to_vec())
}
