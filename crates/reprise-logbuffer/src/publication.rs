//! Outbound channels and the single-term exclusive publication.
//!
//! [`Publication`] is the narrow contract a replay session needs from an
//! outbound channel: connectivity, zero-copy claims, whole-message offers,
//! and close. [`ExclusivePublication`] implements it over one term buffer
//! shared with a [`LogReader`](crate::reader::LogReader).
//!
//! The publication may run at most one term ahead of its reader. When a
//! frame does not fit in the remainder of the term, the remainder is
//! padded, the term id advances, and the claim reports
//! [`PublishStatus::AdminAction`] so the caller retries.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::buffer::AtomicBuffer;
use crate::claim::BufferClaim;
use crate::error::LogBufferError;
use crate::frame::{
    align, CURRENT_VERSION, FLAGS_OFFSET, FRAME_ALIGNMENT, FRAME_LENGTH_OFFSET, HDR_TYPE_DATA,
    HDR_TYPE_PAD, HEADER_LENGTH, RESERVED_VALUE_OFFSET, SESSION_ID_OFFSET, STREAM_ID_OFFSET,
    TERM_ID_OFFSET, TERM_OFFSET_OFFSET, TYPE_OFFSET, UNFRAGMENTED, VERSION_OFFSET,
};
use crate::reader::LogReader;

/// Why a claim or offer did not go through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishStatus {
    /// The reader has not freed enough space; retry later.
    BackPressured,
    /// The log did internal housekeeping (term rotation); retry.
    AdminAction,
    /// No reader is attached.
    NotConnected,
    /// The publication was closed.
    Closed,
}

impl PublishStatus {
    /// Whether retrying later can succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::BackPressured | Self::AdminAction)
    }
}

/// Result of [`Publication::try_claim`].
#[must_use]
#[derive(Debug)]
pub enum ClaimResult {
    /// Space was reserved; fill it and commit.
    Claimed(BufferClaim),
    /// Nothing was reserved.
    Rejected(PublishStatus),
}

/// Result of [`Publication::offer`].
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferResult {
    /// The message was committed; carries the new stream position.
    Published(i64),
    /// Nothing was written.
    Rejected(PublishStatus),
}

/// An outbound channel that frames can be claimed on.
pub trait Publication: Send {
    /// Whether a reader is attached and the channel is open.
    fn is_connected(&self) -> bool;

    /// Whether [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Largest payload a single claim may carry.
    fn max_payload_length(&self) -> usize;

    /// Reserve a frame for `length` payload bytes.
    ///
    /// Errors only for requests that can never succeed (oversize payload);
    /// transient conditions come back as [`ClaimResult::Rejected`].
    fn try_claim(&mut self, length: usize) -> Result<ClaimResult, LogBufferError>;

    /// Claim, copy `payload`, and commit in one call.
    fn offer(&mut self, payload: &[u8]) -> Result<OfferResult, LogBufferError> {
        match self.try_claim(payload.len())? {
            ClaimResult::Claimed(mut claim) => {
                claim.put_payload(0, payload)?;
                claim.commit();
                Ok(OfferResult::Published(self.position()))
            }
            ClaimResult::Rejected(status) => Ok(OfferResult::Rejected(status)),
        }
    }

    /// Current stream position in bytes.
    fn position(&self) -> i64;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}

/// Parameters for [`ExclusivePublication::new`].
#[derive(Clone, Debug)]
pub struct PublicationConfig {
    /// Term buffer length; a power of two of at least 64 bytes.
    pub term_length: usize,
    /// Term id of the first term.
    pub initial_term_id: i32,
    /// Session id stamped into every header.
    pub session_id: i32,
    /// Stream id stamped into every header.
    pub stream_id: i32,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            term_length: 64 * 1024,
            initial_term_id: 0,
            session_id: 0,
            stream_id: 1,
        }
    }
}

/// State shared between a publication and its reader.
pub(crate) struct SharedLog {
    pub(crate) term: Arc<AtomicBuffer>,
    pub(crate) term_length: usize,
    pub(crate) consumer_position: AtomicI64,
    pub(crate) connected: AtomicBool,
    pub(crate) closed: AtomicBool,
}

/// A single-writer publication over one term buffer.
///
/// # Examples
///
/// ```
/// use reprise_logbuffer::{ExclusivePublication, OfferResult, Publication, PublicationConfig};
///
/// let mut publication = ExclusivePublication::new(PublicationConfig::default()).unwrap();
/// let mut reader = publication.attach_reader().unwrap();
///
/// assert!(matches!(publication.offer(b"hello").unwrap(), OfferResult::Published(_)));
///
/// let mut seen = Vec::new();
/// reader.poll(|_header, payload| seen.push(payload.to_vec()), 10);
/// assert_eq!(seen, vec![b"hello".to_vec()]);
/// ```
pub struct ExclusivePublication {
    log: Arc<SharedLog>,
    initial_term_id: i32,
    session_id: i32,
    stream_id: i32,
    position: i64,
}

impl ExclusivePublication {
    /// Create a publication with a zeroed term buffer and no reader.
    pub fn new(config: PublicationConfig) -> Result<Self, LogBufferError> {
        let term_length = config.term_length;
        if term_length < 64 || !term_length.is_power_of_two() || term_length > 1 << 30 {
            return Err(LogBufferError::InvalidTermLength {
                length: term_length,
            });
        }
        let log = SharedLog {
            term: Arc::new(AtomicBuffer::new(term_length)),
            term_length,
            consumer_position: AtomicI64::new(0),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        Ok(Self {
            log: Arc::new(log),
            initial_term_id: config.initial_term_id,
            session_id: config.session_id,
            stream_id: config.stream_id,
            position: 0,
        })
    }

    /// Attach the single reader; the publication reports connected while
    /// the reader is alive.
    pub fn attach_reader(&self) -> Result<LogReader, LogBufferError> {
        LogReader::attach(Arc::clone(&self.log))
    }

    /// Term buffer length in bytes.
    pub fn term_length(&self) -> usize {
        self.log.term_length
    }

    /// Term id the next frame will be written into.
    pub fn active_term_id(&self) -> i32 {
        let terms = self.position / self.log.term_length as i64;
        self.initial_term_id.wrapping_add(terms as i32)
    }

    fn term_offset(&self) -> usize {
        (self.position % self.log.term_length as i64) as usize
    }

    fn write_header(&self, offset: usize, frame_length: usize, header_type: u16) {
        let term = &self.log.term;
        term.put_i32_le(offset + FRAME_LENGTH_OFFSET, -(frame_length as i32));
        term.put_u8(offset + VERSION_OFFSET, CURRENT_VERSION);
        term.put_u8(offset + FLAGS_OFFSET, UNFRAGMENTED);
        term.put_u16_le(offset + TYPE_OFFSET, header_type);
        term.put_i32_le(offset + TERM_OFFSET_OFFSET, offset as i32);
        term.put_i32_le(offset + SESSION_ID_OFFSET, self.session_id);
        term.put_i32_le(offset + STREAM_ID_OFFSET, self.stream_id);
        term.put_i32_le(offset + TERM_ID_OFFSET, self.active_term_id());
        term.put_i64_le(offset + RESERVED_VALUE_OFFSET, 0);
    }

    fn limit(&self) -> i64 {
        self.log.consumer_position.load(Ordering::Acquire) + self.log.term_length as i64
    }
}

impl Publication for ExclusivePublication {
    fn is_connected(&self) -> bool {
        !self.is_closed() && self.log.connected.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.log.closed.load(Ordering::Acquire)
    }

    fn max_payload_length(&self) -> usize {
        self.log.term_length / 2 - HEADER_LENGTH
    }

    fn try_claim(&mut self, length: usize) -> Result<ClaimResult, LogBufferError> {
        let max = self.max_payload_length();
        if length > max {
            return Err(LogBufferError::MessageTooLarge { length, max });
        }
        if self.is_closed() {
            return Ok(ClaimResult::Rejected(PublishStatus::Closed));
        }
        if !self.log.connected.load(Ordering::Acquire) {
            return Ok(ClaimResult::Rejected(PublishStatus::NotConnected));
        }

        let frame_length = length + HEADER_LENGTH;
        let aligned = align(frame_length, FRAME_ALIGNMENT);
        let offset = self.term_offset();
        let remaining = self.log.term_length - offset;
        let limit = self.limit();

        if aligned > remaining {
            if self.position + remaining as i64 > limit {
                return Ok(ClaimResult::Rejected(PublishStatus::BackPressured));
            }
            self.write_header(offset, remaining, HDR_TYPE_PAD);
            self.log
                .term
                .put_i32_ordered(offset + FRAME_LENGTH_OFFSET, remaining as i32)?;
            self.position += remaining as i64;
            tracing::trace!(
                term_id = self.active_term_id(),
                padding = remaining,
                "term rotated"
            );
            return Ok(ClaimResult::Rejected(PublishStatus::AdminAction));
        }

        if self.position + aligned as i64 > limit {
            return Ok(ClaimResult::Rejected(PublishStatus::BackPressured));
        }

        self.write_header(offset, frame_length, HDR_TYPE_DATA);
        let claim = BufferClaim::wrap(Arc::clone(&self.log.term), offset, frame_length)?;
        self.position += aligned as i64;
        Ok(ClaimResult::Claimed(claim))
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn close(&mut self) {
        if !self.log.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                session_id = self.session_id,
                stream_id = self.stream_id,
                position = self.position,
                "publication closed"
            );
        }
    }
}

impl Drop for ExclusivePublication {
    fn drop(&mut self) {
        self.close();
    }
}
