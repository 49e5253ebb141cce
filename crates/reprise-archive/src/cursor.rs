//! Reading recorded frames back out of term images.
//!
//! A [`FragmentCursor`] walks a recording from a start position for a
//! bounded number of bytes, handing each data frame to a callback that may
//! stop the walk without consuming the frame. Releasing a cursor is just
//! dropping it.

use std::collections::HashMap;
use std::fmt;
use std::io;

use reprise_logbuffer::frame::{align, FRAME_ALIGNMENT, HEADER_LENGTH};
use reprise_logbuffer::DataHeader;

/// What a fragment handler wants the cursor to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollAction {
    /// The fragment was handled; move past it.
    Continue,
    /// Leave the fragment unconsumed and return from the poll.
    Stop,
}

/// A bounded, forward-only reader over a recording.
pub trait FragmentCursor: Send {
    /// Deliver up to `fragment_limit` data fragments to `handler`.
    ///
    /// Returns the number of fragments the handler accepted. Padding frames
    /// are consumed silently. A fragment the handler answers with
    /// [`PollAction::Stop`] is delivered again on the next poll.
    fn controlled_poll(
        &mut self,
        handler: &mut dyn FnMut(&DataHeader, &[u8]) -> PollAction,
        fragment_limit: usize,
    ) -> io::Result<usize>;

    /// Whether every requested byte has been consumed.
    fn is_done(&self) -> bool;
}

/// Supplies the raw bytes of recorded terms by term id.
pub trait TermSource: Send {
    /// Load the image of `term_id`. May be shorter than a full term if the
    /// recording stopped part way through it.
    fn load_term(&mut self, term_id: i32) -> io::Result<Vec<u8>>;
}

impl TermSource for HashMap<i32, Vec<u8>> {
    fn load_term(&mut self, term_id: i32) -> io::Result<Vec<u8>> {
        self.get(&term_id).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("term {term_id} not recorded"),
            )
        })
    }
}

/// A [`FragmentCursor`] over term images loaded one term at a time.
pub struct TermImageCursor<S> {
    source: S,
    term_length: usize,
    term_id: i32,
    term_offset: usize,
    remaining: i64,
    image: Vec<u8>,
    image_term: Option<i32>,
}

impl<S: TermSource> TermImageCursor<S> {
    /// Open a cursor at `(from_term_id, from_term_offset)` that yields
    /// frames until `replay_length` bytes have been consumed.
    ///
    /// The first term is loaded eagerly so a missing recording fails here
    /// rather than on the first poll.
    pub fn open(
        mut source: S,
        term_buffer_length: i32,
        from_term_id: i32,
        from_term_offset: i32,
        replay_length: i64,
    ) -> io::Result<Self> {
        if term_buffer_length <= 0 {
            return Err(invalid_input(format!(
                "term buffer length {term_buffer_length} is not positive"
            )));
        }
        if from_term_offset < 0 || from_term_offset >= term_buffer_length {
            return Err(invalid_input(format!(
                "offset {from_term_offset} outside term of {term_buffer_length} bytes"
            )));
        }
        if from_term_offset as usize % FRAME_ALIGNMENT != 0 {
            return Err(invalid_input(format!(
                "offset {from_term_offset} is not aligned to {FRAME_ALIGNMENT}"
            )));
        }
        if replay_length < 0 {
            return Err(invalid_input(format!(
                "replay length {replay_length} is negative"
            )));
        }

        let image = source.load_term(from_term_id)?;
        Ok(Self {
            source,
            term_length: term_buffer_length as usize,
            term_id: from_term_id,
            term_offset: from_term_offset as usize,
            remaining: replay_length,
            image,
            image_term: Some(from_term_id),
        })
    }

    /// Term id and offset of the next frame.
    pub fn position(&self) -> (i32, i32) {
        (self.term_id, self.term_offset as i32)
    }

    /// Bytes left to replay.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }
}

impl<S: TermSource> FragmentCursor for TermImageCursor<S> {
    fn controlled_poll(
        &mut self,
        handler: &mut dyn FnMut(&DataHeader, &[u8]) -> PollAction,
        fragment_limit: usize,
    ) -> io::Result<usize> {
        let mut fragments = 0;

        while fragments < fragment_limit && self.remaining > 0 {
            if self.term_offset >= self.term_length {
                self.term_id = self.term_id.wrapping_add(1);
                self.term_offset = 0;
                continue;
            }
            if self.image_term != Some(self.term_id) {
                self.image = self.source.load_term(self.term_id)?;
                self.image_term = Some(self.term_id);
            }

            let offset = self.term_offset;
            let image = &self.image;
            if offset + HEADER_LENGTH > image.len() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "recording ends at term {} offset {offset} with {} bytes outstanding",
                        self.term_id, self.remaining
                    ),
                ));
            }
            let header = DataHeader::decode(&image[offset..])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            if header.frame_length <= 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "no committed frame at term {} offset {offset}",
                        self.term_id
                    ),
                ));
            }

            let frame_length = header.frame_length as usize;
            let aligned = align(frame_length, FRAME_ALIGNMENT);
            if frame_length < HEADER_LENGTH
                || offset + frame_length > image.len()
                || offset + aligned > self.term_length
            {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "frame of {frame_length} bytes at term {} offset {offset} overruns the term",
                        self.term_id
                    ),
                ));
            }

            if !header.is_padding() {
                let payload = &image[offset + HEADER_LENGTH..offset + frame_length];
                if handler(&header, payload) == PollAction::Stop {
                    break;
                }
                fragments += 1;
            }

            self.term_offset += aligned;
            self.remaining -= aligned as i64;
        }

        Ok(fragments)
    }

    fn is_done(&self) -> bool {
        self.remaining <= 0
    }
}

impl<S> fmt::Debug for TermImageCursor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermImageCursor")
            .field("term_id", &self.term_id)
            .field("term_offset", &self.term_offset)
            .field("remaining", &self.remaining)
            .finish()
    }
}

fn invalid_input(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}
