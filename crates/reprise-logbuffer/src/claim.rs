//! Zero-copy claim over a reserved region of a log buffer.
//!
//! A [`BufferClaim`] is handed out by [`Publication::try_claim`] for a
//! region whose header has already been written with a negative
//! (uncommitted) frame length. The caller may adjust the header fields
//! and fill in the payload, then either [`commit`](BufferClaim::commit) or
//! [`abort`](BufferClaim::abort). Both consume the claim; dropping it
//! without either aborts it so the log can keep progressing past the
//! reserved space.
//!
//! [`Publication::try_claim`]: crate::publication::Publication::try_claim

use std::sync::Arc;

use crate::buffer::AtomicBuffer;
use crate::error::LogBufferError;
use crate::frame::{
    FLAGS_OFFSET, FRAME_LENGTH_OFFSET, HDR_TYPE_PAD, HEADER_LENGTH, RESERVED_VALUE_OFFSET,
    TYPE_OFFSET,
};

/// A claimed, not yet visible frame in a shared log buffer.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use reprise_logbuffer::{AtomicBuffer, BufferClaim};
///
/// let buffer = Arc::new(AtomicBuffer::new(128));
/// let mut claim = BufferClaim::wrap(Arc::clone(&buffer), 0, 40).unwrap();
/// assert_eq!(claim.length(), 8);
///
/// claim.set_reserved_value(42);
/// claim.put_payload(0, b"payload!").unwrap();
/// claim.commit();
///
/// assert_eq!(buffer.get_i32_volatile(0).unwrap(), 40);
/// ```
#[must_use = "a claim is aborted when dropped without commit"]
pub struct BufferClaim {
    buffer: Arc<AtomicBuffer>,
    offset: usize,
    length: usize,
    finished: bool,
}

impl BufferClaim {
    /// Bind a claim to `length` bytes of `buffer` starting at `offset`.
    ///
    /// `length` includes the header. `offset` must be word-aligned so the
    /// frame length can be published atomically.
    pub fn wrap(
        buffer: Arc<AtomicBuffer>,
        offset: usize,
        length: usize,
    ) -> Result<Self, LogBufferError> {
        if length < HEADER_LENGTH {
            return Err(LogBufferError::ClaimTooShort { length });
        }
        if offset % 4 != 0 {
            return Err(LogBufferError::Misaligned {
                offset,
                alignment: 4,
            });
        }
        if length > i32::MAX as usize {
            return Err(LogBufferError::MessageTooLarge {
                length,
                max: i32::MAX as usize,
            });
        }
        buffer.bounds_check(offset, length)?;
        Ok(Self {
            buffer,
            offset,
            length,
            finished: false,
        })
    }

    /// Offset of the payload relative to the start of the claimed region.
    pub fn offset(&self) -> usize {
        HEADER_LENGTH
    }

    /// Length of the payload region in bytes.
    pub fn length(&self) -> usize {
        self.length - HEADER_LENGTH
    }

    /// Total claimed length including the header.
    pub fn frame_length(&self) -> usize {
        self.length
    }

    /// Header flags.
    pub fn flags(&self) -> u8 {
        self.buffer.get_u8(self.offset + FLAGS_OFFSET)
    }

    /// Set the header flags.
    pub fn set_flags(&mut self, flags: u8) -> &mut Self {
        self.buffer.put_u8(self.offset + FLAGS_OFFSET, flags);
        self
    }

    /// Header type; only the lower 16 bits are meaningful on the wire.
    pub fn header_type(&self) -> u16 {
        self.buffer.get_u16_le(self.offset + TYPE_OFFSET)
    }

    /// Set the header type.
    pub fn set_header_type(&mut self, header_type: u16) -> &mut Self {
        self.buffer.put_u16_le(self.offset + TYPE_OFFSET, header_type);
        self
    }

    /// Value in the reserved space at the end of the header.
    pub fn reserved_value(&self) -> i64 {
        self.buffer.get_i64_le(self.offset + RESERVED_VALUE_OFFSET)
    }

    /// Set the reserved value.
    pub fn set_reserved_value(&mut self, value: i64) -> &mut Self {
        self.buffer
            .put_i64_le(self.offset + RESERVED_VALUE_OFFSET, value);
        self
    }

    /// Copy `bytes` into the payload starting `index` bytes after the header.
    pub fn put_payload(&mut self, index: usize, bytes: &[u8]) -> Result<(), LogBufferError> {
        match index.checked_add(bytes.len()) {
            Some(end) if end <= self.length() => {}
            _ => {
                return Err(LogBufferError::OutOfBounds {
                    index,
                    length: bytes.len(),
                    capacity: self.length(),
                })
            }
        }
        self.buffer
            .put_bytes(self.offset + HEADER_LENGTH + index, bytes);
        Ok(())
    }

    /// Read back payload bytes, mostly useful for verification.
    pub fn payload(&self) -> Vec<u8> {
        self.buffer.to_vec(self.offset + HEADER_LENGTH, self.length())
    }

    /// Publish the frame to readers.
    pub fn commit(mut self) {
        self.publish_length();
    }

    /// Turn the claimed region into padding so readers skip it.
    pub fn abort(mut self) {
        self.buffer
            .put_u16_le(self.offset + TYPE_OFFSET, HDR_TYPE_PAD);
        self.publish_length();
    }

    fn publish_length(&mut self) {
        self.finished = true;
        // wrap() checked bounds, alignment, and that length fits an i32.
        let published = self
            .buffer
            .put_i32_ordered(self.offset + FRAME_LENGTH_OFFSET, self.length as i32);
        debug_assert!(published.is_ok());
    }
}

impl Drop for BufferClaim {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                offset = self.offset,
                length = self.length,
                "buffer claim dropped without commit; aborting"
            );
            self.buffer
                .put_u16_le(self.offset + TYPE_OFFSET, HDR_TYPE_PAD);
            self.publish_length();
        }
    }
}

impl std::fmt::Debug for BufferClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferClaim")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("finished", &self.finished)
            .finish()
    }
}
