//! Immutable telegram model and wire codec.
//!
//! Wire format:
//! ```text
//! ┌─────┬──────┬──────┬────────┬────────────────┬─────┐
//! │ src │ dest │ type │ offset │ payload (0..N) │ crc │
//! └─────┴──────┴──────┴────────┴────────────────┴─────┘
//!
//! Extended types (EMS+), marker 0xFF in the type position:
//! ┌─────┬──────┬──────┬────────┬─────────┬─────────┬─────────┬─────┐
//! │ src │ dest │ 0xFF │ offset │ type_hi │ type_lo │ payload │ crc │
//! └─────┴──────┴──────┴────────┴─────────┴─────────┴─────────┴─────┘
//! ```
//!
//! `dest` bit 7 marks a write; `dest == 0` is a broadcast.  No frame on
//! the bus exceeds [`MAX_TELEGRAM_LEN`] bytes.

use core::fmt;

use heapless::Vec;

use super::bus::Dialect;
use super::crc::checksum;
use crate::error::FrameError;

/// Longest frame the bus carries, checksum included.
pub const MAX_TELEGRAM_LEN: usize = 32;

/// `[src][dest][type][offset][crc]`.
pub const MIN_TELEGRAM_LEN: usize = 5;

/// Payload capacity of a plain-type telegram.
pub const MAX_PAYLOAD: usize = MAX_TELEGRAM_LEN - MIN_TELEGRAM_LEN;

/// Payload capacity of an extended-type telegram.
pub const MAX_EXTENDED_PAYLOAD: usize = MAX_PAYLOAD - 2;

/// Destination bit marking a write request.
pub const WRITE_BIT: u8 = 0x80;

/// Broadcast destination.
pub const BROADCAST: u8 = 0x00;

/// Type byte announcing a 16-bit type id.
pub const EXTENDED_TYPE_MARKER: u8 = 0xFF;

pub type Payload = Vec<u8, MAX_PAYLOAD>;
pub type FrameBytes = Vec<u8, MAX_TELEGRAM_LEN>;

/// One framed bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    src: u8,
    dest: u8,
    type_id: u16,
    offset: u8,
    payload: Payload,
}

impl Telegram {
    /// Build a telegram, checking the address and payload bounds.
    ///
    /// `dest` is the raw destination byte (write bit included).
    pub fn new(src: u8, dest: u8, type_id: u16, offset: u8, data: &[u8]) -> Result<Self, FrameError> {
        if src == 0 || src & WRITE_BIT != 0 {
            return Err(FrameError::MalformedAddress);
        }
        let limit = if is_extended_type(type_id) {
            MAX_EXTENDED_PAYLOAD
        } else {
            MAX_PAYLOAD
        };
        if data.len() > limit {
            return Err(FrameError::TooLong);
        }
        let payload = Payload::from_slice(data).map_err(|()| FrameError::TooLong)?;
        Ok(Self {
            src,
            dest,
            type_id,
            offset,
            payload,
        })
    }

    /// Write `data` at `offset` of record `type_id` on device `dest_addr`.
    pub fn write(src: u8, dest_addr: u8, type_id: u16, offset: u8, data: &[u8]) -> Result<Self, FrameError> {
        Self::new(src, dest_addr | WRITE_BIT, type_id, offset, data)
    }

    /// Ask device `dest_addr` for `length` bytes of record `type_id`.
    pub fn read_request(
        src: u8,
        dest_addr: u8,
        type_id: u16,
        offset: u8,
        length: u8,
    ) -> Result<Self, FrameError> {
        Self::new(src, dest_addr & !WRITE_BIT, type_id, offset, &[length])
    }

    /// Parse one complete frame (checksum included).
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < MIN_TELEGRAM_LEN {
            return Err(FrameError::TooShort);
        }
        if bytes.len() > MAX_TELEGRAM_LEN {
            return Err(FrameError::TooLong);
        }

        let (body, crc) = bytes.split_at(bytes.len() - 1);
        if checksum(body) != crc[0] {
            return Err(FrameError::ChecksumMismatch);
        }

        let src = body[0];
        if src == 0 || src & WRITE_BIT != 0 {
            return Err(FrameError::MalformedAddress);
        }
        let dest = body[1];
        let offset = body[3];

        let (type_id, data) = if body[2] == EXTENDED_TYPE_MARKER {
            if body.len() < 6 {
                return Err(FrameError::TooShort);
            }
            (u16::from_be_bytes([body[4], body[5]]), &body[6..])
        } else {
            (u16::from(body[2]), &body[4..])
        };

        Self::new(src, dest, type_id, offset, data)
    }

    /// Encode for the wire, appending a freshly computed checksum.
    pub fn serialize(&self, dialect: Dialect) -> Result<FrameBytes, FrameError> {
        if self.is_extended() && dialect == Dialect::Ems {
            return Err(FrameError::UnsupportedType);
        }
        let mut out = self.body()?;
        let crc = checksum(&out);
        out.push(crc).map_err(|_| FrameError::TooLong)?;
        Ok(out)
    }

    /// Checksum the serialized form of this telegram carries.
    pub fn checksum(&self) -> u8 {
        self.body().map_or(0, |body| checksum(&body))
    }

    fn body(&self) -> Result<FrameBytes, FrameError> {
        let [hi, lo] = self.type_id.to_be_bytes();
        let extended = [self.src, self.dest, EXTENDED_TYPE_MARKER, self.offset, hi, lo];
        let plain = [self.src, self.dest, lo, self.offset];
        let header: &[u8] = if self.is_extended() { &extended } else { &plain };

        let mut out = FrameBytes::new();
        out.extend_from_slice(header).map_err(|()| FrameError::TooLong)?;
        out.extend_from_slice(&self.payload)
            .map_err(|()| FrameError::TooLong)?;
        Ok(out)
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn src(&self) -> u8 {
        self.src
    }

    /// Raw destination byte, write bit included.
    pub fn dest(&self) -> u8 {
        self.dest
    }

    /// Destination address without the write bit.
    pub fn dest_addr(&self) -> u8 {
        self.dest & !WRITE_BIT
    }

    pub fn is_write(&self) -> bool {
        self.dest & WRITE_BIT != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest_addr() == BROADCAST
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    /// Whether the type id needs the EMS+ extended layout.
    pub fn is_extended(&self) -> bool {
        is_extended_type(self.type_id)
    }

    /// Record offset of the first payload byte.
    pub fn offset(&self) -> u8 {
        self.offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Byte at absolute record position `pos`, if this telegram carries it.
    pub fn record_byte(&self, pos: u8) -> Option<u8> {
        let index = pos.checked_sub(self.offset)?;
        self.payload.get(index as usize).copied()
    }
}

fn is_extended_type(type_id: u16) -> bool {
    type_id >= u16::from(EXTENDED_TYPE_MARKER)
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} -> 0x{:02X}", self.src, self.dest_addr())?;
        if self.is_write() {
            write!(f, " (write)")?;
        }
        write!(f, ", type(0x{:02X}), offset {}, data:", self.type_id, self.offset)?;
        for b in &self.payload {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}
