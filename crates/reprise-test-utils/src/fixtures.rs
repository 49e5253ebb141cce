//! Recording fixtures.
//!
//! - [`TermImageBuilder`] lays out frames in a term image the way a
//!   recorder would have written them.
//! - [`ScriptedCursor`] replays a fixed fragment list with optional
//!   injected read faults and counts its own release.
//! - [`MemoryArchive`] serves descriptors and term images from memory and
//!   can be told to fail each step.
//! - [`write_recording`] puts a recording on disk for `ArchiveDir` tests.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use reprise_archive::descriptor::{descriptor_file_name, term_file_name};
use reprise_archive::{
    DescriptorError, FragmentCursor, PollAction, RecordingArchive, RecordingDescriptor,
    TermImageCursor,
};
use reprise_core::RecordingId;
use reprise_logbuffer::frame::{
    align, CURRENT_VERSION, FRAME_ALIGNMENT, HDR_TYPE_DATA, HDR_TYPE_PAD, HEADER_LENGTH,
};
use reprise_logbuffer::DataHeader;

use crate::lock;

// ── TermImageBuilder ───────────────────────────────────────────────

/// Builds the bytes of one recorded term.
pub struct TermImageBuilder {
    image: Vec<u8>,
    term_id: i32,
    offset: usize,
}

impl TermImageBuilder {
    pub fn new(term_length: usize, term_id: i32) -> Self {
        Self {
            image: vec![0u8; term_length],
            term_id,
            offset: 0,
        }
    }

    /// Start writing at `offset`, leaving earlier bytes unrecorded.
    pub fn at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Append a data frame.
    pub fn data(self, payload: &[u8], flags: u8, reserved_value: i64) -> Self {
        self.frame(HDR_TYPE_DATA, payload, flags, reserved_value)
    }

    /// Append a padding frame spanning `length` bytes including its header.
    pub fn padding(self, length: usize) -> Self {
        let payload = vec![0u8; length.saturating_sub(HEADER_LENGTH)];
        self.frame(HDR_TYPE_PAD, &payload, 0, 0)
    }

    /// Pad out to the end of the term.
    pub fn pad_to_end(self) -> Self {
        let remaining = self.image.len() - self.offset;
        self.padding(remaining)
    }

    /// Offset the next frame will be written at.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn build(self) -> Vec<u8> {
        self.image
    }

    fn frame(mut self, header_type: u16, payload: &[u8], flags: u8, reserved_value: i64) -> Self {
        let frame_length = HEADER_LENGTH + payload.len();
        let header = DataHeader {
            frame_length: frame_length as i32,
            version: CURRENT_VERSION,
            flags,
            header_type,
            term_offset: self.offset as i32,
            session_id: 1,
            stream_id: 1,
            term_id: self.term_id,
            reserved_value,
        };
        let start = self.offset;
        assert!(
            start + align(frame_length, FRAME_ALIGNMENT) <= self.image.len(),
            "frame of {frame_length} bytes does not fit at offset {start}"
        );
        header
            .encode(&mut self.image[start..])
            .expect("header fits");
        self.image[start + HEADER_LENGTH..start + frame_length].copy_from_slice(payload);
        self.offset += align(frame_length, FRAME_ALIGNMENT);
        self
    }
}

// ── ScriptedCursor ─────────────────────────────────────────────────

/// A fragment cursor over a fixed list of fragments.
pub struct ScriptedCursor {
    fragments: Vec<(DataHeader, Vec<u8>)>,
    next: usize,
    fail_at: Option<usize>,
    released: Arc<AtomicUsize>,
}

impl ScriptedCursor {
    /// Cursor yielding `(flags, reserved_value, payload)` fragments.
    pub fn new(fragments: Vec<(u8, i64, Vec<u8>)>) -> Self {
        let fragments = fragments
            .into_iter()
            .map(|(flags, reserved_value, payload)| {
                let header = DataHeader {
                    frame_length: (HEADER_LENGTH + payload.len()) as i32,
                    version: CURRENT_VERSION,
                    flags,
                    header_type: HDR_TYPE_DATA,
                    term_offset: 0,
                    session_id: 1,
                    stream_id: 1,
                    term_id: 0,
                    reserved_value,
                };
                (header, payload)
            })
            .collect();
        Self {
            fragments,
            next: 0,
            fail_at: None,
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail with an I/O error when fragment `index` would be read.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Counter incremented when the cursor is dropped.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.released)
    }
}

impl FragmentCursor for ScriptedCursor {
    fn controlled_poll(
        &mut self,
        handler: &mut dyn FnMut(&DataHeader, &[u8]) -> PollAction,
        fragment_limit: usize,
    ) -> io::Result<usize> {
        let mut polled = 0;
        while polled < fragment_limit && self.next < self.fragments.len() {
            if self.fail_at == Some(self.next) {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("injected read fault at fragment {}", self.next),
                ));
            }
            let (header, payload) = &self.fragments[self.next];
            if handler(header, payload) == PollAction::Stop {
                break;
            }
            self.next += 1;
            polled += 1;
        }
        Ok(polled)
    }

    fn is_done(&self) -> bool {
        self.next >= self.fragments.len()
    }
}

impl Drop for ScriptedCursor {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ── MemoryArchive ──────────────────────────────────────────────────

/// How a [`MemoryArchive`] step should fail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArchiveFault {
    #[default]
    None,
    /// Descriptor exists but cannot be read.
    DescriptorIo,
    /// Descriptor loads but the cursor cannot be opened.
    CursorOpen,
}

struct Recording {
    descriptor: RecordingDescriptor,
    terms: HashMap<i32, Vec<u8>>,
}

/// In-memory [`RecordingArchive`].
#[derive(Default)]
pub struct MemoryArchive {
    recordings: HashMap<RecordingId, Recording>,
    fault: Mutex<ArchiveFault>,
    next_cursor: Mutex<Option<Box<dyn FragmentCursor>>>,
    descriptor_loads: AtomicUsize,
    cursor_opens: AtomicUsize,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recording with its term images keyed by term id.
    pub fn with_recording(
        mut self,
        descriptor: RecordingDescriptor,
        terms: impl IntoIterator<Item = (i32, Vec<u8>)>,
    ) -> Self {
        self.recordings.insert(
            descriptor.recording_id,
            Recording {
                descriptor,
                terms: terms.into_iter().collect(),
            },
        );
        self
    }

    pub fn set_fault(&self, fault: ArchiveFault) {
        *lock(&self.fault) = fault;
    }

    /// Hand out `cursor` from the next successful open instead of a term
    /// image cursor.
    pub fn set_next_cursor(&self, cursor: Box<dyn FragmentCursor>) {
        *lock(&self.next_cursor) = Some(cursor);
    }

    pub fn descriptor_loads(&self) -> usize {
        self.descriptor_loads.load(Ordering::SeqCst)
    }

    pub fn cursor_opens(&self) -> usize {
        self.cursor_opens.load(Ordering::SeqCst)
    }
}

impl RecordingArchive for MemoryArchive {
    fn load_descriptor(
        &self,
        recording_id: RecordingId,
    ) -> Result<RecordingDescriptor, DescriptorError> {
        self.descriptor_loads.fetch_add(1, Ordering::SeqCst);
        let recording = self
            .recordings
            .get(&recording_id)
            .ok_or_else(|| DescriptorError::NotFound {
                path: descriptor_file_name(recording_id).into(),
            })?;
        if *lock(&self.fault) == ArchiveFault::DescriptorIo {
            return Err(DescriptorError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "injected descriptor fault",
            )));
        }
        Ok(recording.descriptor.clone())
    }

    fn open_cursor(
        &self,
        descriptor: &RecordingDescriptor,
        from_term_id: i32,
        from_term_offset: i32,
        replay_length: i64,
    ) -> io::Result<Box<dyn FragmentCursor>> {
        if *lock(&self.fault) == ArchiveFault::CursorOpen {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected cursor open fault",
            ));
        }
        self.cursor_opens.fetch_add(1, Ordering::SeqCst);
        if let Some(cursor) = lock(&self.next_cursor).take() {
            return Ok(cursor);
        }
        let terms = self
            .recordings
            .get(&descriptor.recording_id)
            .map(|r| r.terms.clone())
            .unwrap_or_default();
        let cursor = TermImageCursor::open(
            terms,
            descriptor.term_buffer_length,
            from_term_id,
            from_term_offset,
            replay_length,
        )?;
        Ok(Box::new(cursor))
    }
}

// ── On-disk recordings ─────────────────────────────────────────────

/// Write `descriptor` and its term images into `dir` in archive layout.
pub fn write_recording(
    dir: &Path,
    descriptor: &RecordingDescriptor,
    terms: impl IntoIterator<Item = (i32, Vec<u8>)>,
) -> io::Result<()> {
    let mut file = fs::File::create(dir.join(descriptor_file_name(descriptor.recording_id)))?;
    descriptor.encode(&mut file).map_err(DescriptorError::into_io)?;
    for (term_id, image) in terms {
        fs::write(dir.join(term_file_name(descriptor.recording_id, term_id)), image)?;
    }
    Ok(())
}
