//! Error types for log-buffer operations.

use std::error::Error;
use std::fmt;

/// Errors from buffer binding, claiming, and header decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogBufferError {
    /// An access would fall outside the buffer.
    OutOfBounds {
        /// First byte of the access.
        index: usize,
        /// Number of bytes accessed.
        length: usize,
        /// Capacity of the buffer.
        capacity: usize,
    },
    /// An ordered access was not aligned to a word boundary.
    Misaligned {
        /// The offending offset.
        offset: usize,
        /// Required alignment in bytes.
        alignment: usize,
    },
    /// A claimed region is too short to hold a frame header.
    ClaimTooShort {
        /// The requested claim length.
        length: usize,
    },
    /// A message exceeds the publication's maximum payload length.
    MessageTooLarge {
        /// The requested payload length.
        length: usize,
        /// The largest payload the publication accepts.
        max: usize,
    },
    /// A term length was zero, not a power of two, or too large.
    InvalidTermLength {
        /// The rejected length.
        length: usize,
    },
    /// A reader is already attached to this publication's log.
    ReaderAttached,
}

impl fmt::Display for LogBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds {
                index,
                length,
                capacity,
            } => write!(
                f,
                "access of {length} bytes at {index} exceeds capacity {capacity}"
            ),
            Self::Misaligned { offset, alignment } => {
                write!(f, "offset {offset} is not aligned to {alignment}")
            }
            Self::ClaimTooShort { length } => {
                write!(f, "claim of {length} bytes cannot hold a frame header")
            }
            Self::MessageTooLarge { length, max } => {
                write!(f, "message of {length} bytes exceeds max payload {max}")
            }
            Self::InvalidTermLength { length } => {
                write!(f, "term length {length} must be a power of two >= 64")
            }
            Self::ReaderAttached => write!(f, "a reader is already attached to this log"),
        }
    }
}

impl Error for LogBufferError {}
