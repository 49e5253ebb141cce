//! Locating recordings and opening cursors over them.
//!
//! [`RecordingArchive`] is the seam a replay session uses to reach stored
//! recordings. [`ArchiveDir`] implements it over a directory holding one
//! `{id}.rec` descriptor per recording and one `{id}-{termId}.term` image
//! per recorded term.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use reprise_core::RecordingId;

use crate::cursor::{FragmentCursor, TermImageCursor, TermSource};
use crate::descriptor::{descriptor_file_name, term_file_name, DescriptorError, RecordingDescriptor};

/// Read access to stored recordings.
pub trait RecordingArchive: Send + Sync {
    /// Load the descriptor of `recording_id`.
    ///
    /// A recording that does not exist is reported as
    /// [`DescriptorError::NotFound`]; every other variant is a local fault.
    fn load_descriptor(
        &self,
        recording_id: RecordingId,
    ) -> Result<RecordingDescriptor, DescriptorError>;

    /// Open a cursor that replays `replay_length` bytes from
    /// `(from_term_id, from_term_offset)`.
    fn open_cursor(
        &self,
        descriptor: &RecordingDescriptor,
        from_term_id: i32,
        from_term_offset: i32,
        replay_length: i64,
    ) -> io::Result<Box<dyn FragmentCursor>>;
}

/// A recording archive rooted at a directory.
#[derive(Clone, Debug)]
pub struct ArchiveDir {
    dir: PathBuf,
}

impl ArchiveDir {
    /// Use `dir` as the archive root. The directory is not touched until a
    /// recording is requested.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The archive root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the descriptor file for `recording_id`.
    pub fn descriptor_path(&self, recording_id: RecordingId) -> PathBuf {
        self.dir.join(descriptor_file_name(recording_id))
    }
}

impl RecordingArchive for ArchiveDir {
    fn load_descriptor(
        &self,
        recording_id: RecordingId,
    ) -> Result<RecordingDescriptor, DescriptorError> {
        let path = self.descriptor_path(recording_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DescriptorError::NotFound { path })
            }
            Err(e) => return Err(e.into()),
        };
        let descriptor = RecordingDescriptor::decode(&mut BufReader::new(file))?;
        if descriptor.recording_id != recording_id {
            return Err(DescriptorError::Malformed {
                detail: format!(
                    "{} holds recording {}",
                    path.display(),
                    descriptor.recording_id
                ),
            });
        }
        Ok(descriptor)
    }

    fn open_cursor(
        &self,
        descriptor: &RecordingDescriptor,
        from_term_id: i32,
        from_term_offset: i32,
        replay_length: i64,
    ) -> io::Result<Box<dyn FragmentCursor>> {
        let source = DirTermSource {
            dir: self.dir.clone(),
            recording_id: descriptor.recording_id,
            term_length: descriptor.term_buffer_length as usize,
        };
        let cursor = TermImageCursor::open(
            source,
            descriptor.term_buffer_length,
            from_term_id,
            from_term_offset,
            replay_length,
        )?;
        tracing::debug!(
            recording_id = %descriptor.recording_id,
            from_term_id,
            from_term_offset,
            replay_length,
            "cursor opened"
        );
        Ok(Box::new(cursor))
    }
}

/// Loads `{id}-{termId}.term` files from the archive directory.
struct DirTermSource {
    dir: PathBuf,
    recording_id: RecordingId,
    term_length: usize,
}

impl TermSource for DirTermSource {
    fn load_term(&mut self, term_id: i32) -> io::Result<Vec<u8>> {
        let path = self.dir.join(term_file_name(self.recording_id, term_id));
        let file = File::open(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {e}", path.display()))
        })?;
        let mut image = Vec::with_capacity(self.term_length);
        file.take(self.term_length as u64).read_to_end(&mut image)?;
        Ok(image)
    }
}
