//! Consumer side of an exclusive publication's log.
//!
//! [`LogReader`] observes committed frames through an acquire load of the
//! frame length, hands data frames to a callback, skips padding, and then
//! zeroes the consumed region and advances the consumer position so the
//! publisher can reuse the space.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::LogBufferError;
use crate::frame::{align, DataHeader, FRAME_ALIGNMENT, FRAME_LENGTH_OFFSET, HEADER_LENGTH};
use crate::publication::SharedLog;

/// The single reader of an [`ExclusivePublication`](crate::ExclusivePublication).
///
/// While a reader is alive the publication reports connected; dropping it
/// disconnects the publication.
pub struct LogReader {
    log: Arc<SharedLog>,
    position: i64,
}

impl LogReader {
    pub(crate) fn attach(log: Arc<SharedLog>) -> Result<Self, LogBufferError> {
        if log.connected.swap(true, Ordering::AcqRel) {
            return Err(LogBufferError::ReaderAttached);
        }
        let position = log.consumer_position.load(Ordering::Acquire);
        Ok(Self { log, position })
    }

    /// Stream position of the next frame to read.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Deliver up to `fragment_limit` committed data frames to `handler`.
    ///
    /// Returns the number of data frames delivered. Padding frames are
    /// consumed but not counted.
    pub fn poll<F>(&mut self, mut handler: F, fragment_limit: usize) -> usize
    where
        F: FnMut(&DataHeader, &[u8]),
    {
        let term = &self.log.term;
        let term_length = self.log.term_length;
        let mut fragments = 0;
        let mut header_bytes = [0u8; HEADER_LENGTH];

        while fragments < fragment_limit {
            let offset = (self.position % term_length as i64) as usize;
            let frame_length = match term.get_i32_volatile(offset + FRAME_LENGTH_OFFSET) {
                Ok(len) if len > 0 => len as usize,
                _ => break,
            };

            term.get_bytes(offset, &mut header_bytes);
            let aligned = align(frame_length, FRAME_ALIGNMENT);
            match DataHeader::decode(&header_bytes) {
                Ok(header) if !header.is_padding() => {
                    let payload =
                        term.to_vec(offset + HEADER_LENGTH, frame_length - HEADER_LENGTH);
                    handler(&header, &payload);
                    fragments += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(offset, error = %e, "undecodable frame header");
                    break;
                }
            }

            term.set_memory(offset, aligned, 0);
            self.position += aligned as i64;
            self.log
                .consumer_position
                .store(self.position, Ordering::Release);
        }

        fragments
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        self.log.connected.store(false, Ordering::Release);
    }
}
