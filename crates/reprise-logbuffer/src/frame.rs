//! Data frame header layout.
//!
//! Every frame in a term starts with a fixed 32-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +---------------------------------------------------------------+
//! |                         Frame Length                          |
//! +---------------+---------------+-------------------------------+
//! |    Version    |     Flags     |             Type              |
//! +---------------+---------------+-------------------------------+
//! |                          Term Offset                          |
//! +---------------------------------------------------------------+
//! |                          Session ID                           |
//! +---------------------------------------------------------------+
//! |                           Stream ID                           |
//! +---------------------------------------------------------------+
//! |                            Term ID                            |
//! +---------------------------------------------------------------+
//! |                        Reserved Value                         |
//! |                                                               |
//! +---------------------------------------------------------------+
//! ```
//!
//! All integers are little-endian on the wire, whatever the host order.
//! The same layout is used by the buffer claim (writing), the log reader,
//! and the archive's fragment cursor (reading recorded term images).

use crate::error::LogBufferError;

/// Length of the data frame header in bytes.
pub const HEADER_LENGTH: usize = 32;

/// Frames start on multiples of this many bytes.
pub const FRAME_ALIGNMENT: usize = 32;

/// Offset of the `i32` frame length field.
pub const FRAME_LENGTH_OFFSET: usize = 0;
/// Offset of the `u8` version field.
pub const VERSION_OFFSET: usize = 4;
/// Offset of the `u8` flags field.
pub const FLAGS_OFFSET: usize = 5;
/// Offset of the `u16` type field.
pub const TYPE_OFFSET: usize = 6;
/// Offset of the `i32` term offset field.
pub const TERM_OFFSET_OFFSET: usize = 8;
/// Offset of the `i32` session id field.
pub const SESSION_ID_OFFSET: usize = 12;
/// Offset of the `i32` stream id field.
pub const STREAM_ID_OFFSET: usize = 16;
/// Offset of the `i32` term id field.
pub const TERM_ID_OFFSET: usize = 20;
/// Offset of the `i64` reserved value field.
pub const RESERVED_VALUE_OFFSET: usize = 24;

/// Current header version.
pub const CURRENT_VERSION: u8 = 0;

/// Frame type marking padding that readers skip.
pub const HDR_TYPE_PAD: u16 = 0x00;
/// Frame type of an application data frame.
pub const HDR_TYPE_DATA: u16 = 0x01;

/// Flag bit: first fragment of a message.
pub const BEGIN_FLAG: u8 = 0b1000_0000;
/// Flag bit: last fragment of a message.
pub const END_FLAG: u8 = 0b0100_0000;
/// A message carried in a single frame.
pub const UNFRAGMENTED: u8 = BEGIN_FLAG | END_FLAG;

/// Round `length` up to the next multiple of `alignment` (a power of two).
#[inline]
pub fn align(length: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (length + alignment - 1) & !(alignment - 1)
}

/// A decoded data frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataHeader {
    /// Total frame length including the header. Zero or negative means the
    /// frame is not yet committed.
    pub frame_length: i32,
    /// Protocol version.
    pub version: u8,
    /// Application-defined flag bits.
    pub flags: u8,
    /// Frame kind ([`HDR_TYPE_DATA`] or [`HDR_TYPE_PAD`]).
    pub header_type: u16,
    /// Offset of the frame within its term.
    pub term_offset: i32,
    /// Publisher session id.
    pub session_id: i32,
    /// Stream id.
    pub stream_id: i32,
    /// Term the frame belongs to.
    pub term_id: i32,
    /// Opaque application value.
    pub reserved_value: i64,
}

impl DataHeader {
    /// Decode a header from the first [`HEADER_LENGTH`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, LogBufferError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(LogBufferError::OutOfBounds {
                index: 0,
                length: HEADER_LENGTH,
                capacity: bytes.len(),
            });
        }
        Ok(Self {
            frame_length: read_i32(bytes, FRAME_LENGTH_OFFSET),
            version: bytes[VERSION_OFFSET],
            flags: bytes[FLAGS_OFFSET],
            header_type: u16::from_le_bytes([bytes[TYPE_OFFSET], bytes[TYPE_OFFSET + 1]]),
            term_offset: read_i32(bytes, TERM_OFFSET_OFFSET),
            session_id: read_i32(bytes, SESSION_ID_OFFSET),
            stream_id: read_i32(bytes, STREAM_ID_OFFSET),
            term_id: read_i32(bytes, TERM_ID_OFFSET),
            reserved_value: i64::from_le_bytes(
                bytes[RESERVED_VALUE_OFFSET..RESERVED_VALUE_OFFSET + 8]
                    .try_into()
                    .map_err(|_| LogBufferError::OutOfBounds {
                        index: RESERVED_VALUE_OFFSET,
                        length: 8,
                        capacity: bytes.len(),
                    })?,
            ),
        })
    }

    /// Encode into the first [`HEADER_LENGTH`] bytes of `out`.
    pub fn encode(&self, out: &mut [u8]) -> Result<(), LogBufferError> {
        if out.len() < HEADER_LENGTH {
            return Err(LogBufferError::OutOfBounds {
                index: 0,
                length: HEADER_LENGTH,
                capacity: out.len(),
            });
        }
        out[FRAME_LENGTH_OFFSET..FRAME_LENGTH_OFFSET + 4]
            .copy_from_slice(&self.frame_length.to_le_bytes());
        out[VERSION_OFFSET] = self.version;
        out[FLAGS_OFFSET] = self.flags;
        out[TYPE_OFFSET..TYPE_OFFSET + 2].copy_from_slice(&self.header_type.to_le_bytes());
        out[TERM_OFFSET_OFFSET..TERM_OFFSET_OFFSET + 4]
            .copy_from_slice(&self.term_offset.to_le_bytes());
        out[SESSION_ID_OFFSET..SESSION_ID_OFFSET + 4]
            .copy_from_slice(&self.session_id.to_le_bytes());
        out[STREAM_ID_OFFSET..STREAM_ID_OFFSET + 4].copy_from_slice(&self.stream_id.to_le_bytes());
        out[TERM_ID_OFFSET..TERM_ID_OFFSET + 4].copy_from_slice(&self.term_id.to_le_bytes());
        out[RESERVED_VALUE_OFFSET..RESERVED_VALUE_OFFSET + 8]
            .copy_from_slice(&self.reserved_value.to_le_bytes());
        Ok(())
    }

    /// Whether this header marks padding.
    pub fn is_padding(&self) -> bool {
        self.header_type == HDR_TYPE_PAD
    }

    /// Payload length implied by `frame_length`, or zero if uncommitted.
    pub fn payload_length(&self) -> usize {
        (self.frame_length.max(0) as usize).saturating_sub(HEADER_LENGTH)
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
