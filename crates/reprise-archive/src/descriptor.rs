//! Recording descriptor snapshot and its binary file format.
//!
//! All integers are little-endian. Strings are length-prefixed with a
//! `u32` length.
//!
//! ```text
//! [MAGIC "RPRD"] [VERSION u8]
//! [recording_id i64] [term_buffer_length i32] [segment_file_length i32]
//! [initial_term_id i32] [initial_term_offset i32]
//! [last_term_id i32] [last_term_offset i32]
//! [start_time i64] [end_time i64] [session_id i32] [stream_id i32]
//! [channel str] [source str]
//! ```

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use reprise_core::RecordingId;

/// Magic bytes at the start of every descriptor file.
pub const MAGIC: [u8; 4] = *b"RPRD";

/// Current descriptor format version.
pub const FORMAT_VERSION: u8 = 1;

/// Longest channel or source string accepted when decoding.
const MAX_STRING_LENGTH: usize = 4096;

/// Immutable description of a recording's boundaries and origin.
///
/// Loaded once when a replay session connects and dropped after the
/// session has copied out what it needs.
///
/// # Examples
///
/// ```
/// use reprise_archive::RecordingDescriptor;
/// use reprise_core::RecordingId;
///
/// let descriptor = RecordingDescriptor {
///     initial_term_id: 3,
///     last_term_id: 3,
///     last_term_offset: 1000,
///     ..RecordingDescriptor::new(RecordingId(1), 65536)
/// };
///
/// let mut bytes = Vec::new();
/// descriptor.encode(&mut bytes).unwrap();
/// let decoded = RecordingDescriptor::decode(&mut bytes.as_slice()).unwrap();
/// assert_eq!(decoded, descriptor);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingDescriptor {
    /// The recording this descriptor belongs to.
    pub recording_id: RecordingId,
    /// Capacity of one term in bytes; a power of two.
    pub term_buffer_length: i32,
    /// Size of the files the recording is stored in.
    pub segment_file_length: i32,
    /// Term id of the first recorded frame.
    pub initial_term_id: i32,
    /// Offset of the first recorded frame within `initial_term_id`.
    pub initial_term_offset: i32,
    /// Term id of the last recorded frame.
    pub last_term_id: i32,
    /// Offset just past the last recorded frame within `last_term_id`.
    pub last_term_offset: i32,
    /// Wall-clock start of the recording, epoch milliseconds.
    pub start_time: i64,
    /// Wall-clock end of the recording, epoch milliseconds.
    pub end_time: i64,
    /// Session id of the recorded publication.
    pub session_id: i32,
    /// Stream id of the recorded publication.
    pub stream_id: i32,
    /// Channel the recorded publication was on.
    pub channel: String,
    /// Identity of the recorded publisher.
    pub source: String,
}

impl RecordingDescriptor {
    /// A descriptor for an empty recording starting at term 0.
    pub fn new(recording_id: RecordingId, term_buffer_length: i32) -> Self {
        Self {
            recording_id,
            term_buffer_length,
            segment_file_length: term_buffer_length,
            initial_term_id: 0,
            initial_term_offset: 0,
            last_term_id: 0,
            last_term_offset: 0,
            start_time: 0,
            end_time: 0,
            session_id: 0,
            stream_id: 0,
            channel: String::new(),
            source: String::new(),
        }
    }

    /// Write the descriptor in file format.
    pub fn encode(&self, w: &mut dyn Write) -> Result<(), DescriptorError> {
        w.write_all(&MAGIC)?;
        w.write_all(&[FORMAT_VERSION])?;
        w.write_all(&self.recording_id.0.to_le_bytes())?;
        for v in [
            self.term_buffer_length,
            self.segment_file_length,
            self.initial_term_id,
            self.initial_term_offset,
            self.last_term_id,
            self.last_term_offset,
        ] {
            w.write_all(&v.to_le_bytes())?;
        }
        w.write_all(&self.start_time.to_le_bytes())?;
        w.write_all(&self.end_time.to_le_bytes())?;
        w.write_all(&self.session_id.to_le_bytes())?;
        w.write_all(&self.stream_id.to_le_bytes())?;
        write_str(w, &self.channel)?;
        write_str(w, &self.source)?;
        Ok(())
    }

    /// Read and validate a descriptor in file format.
    pub fn decode(r: &mut dyn Read) -> Result<Self, DescriptorError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(DescriptorError::InvalidMagic);
        }
        let version = read_u8(r)?;
        if version != FORMAT_VERSION {
            return Err(DescriptorError::UnsupportedVersion { found: version });
        }

        let descriptor = Self {
            recording_id: RecordingId(read_i64(r)?),
            term_buffer_length: read_i32(r)?,
            segment_file_length: read_i32(r)?,
            initial_term_id: read_i32(r)?,
            initial_term_offset: read_i32(r)?,
            last_term_id: read_i32(r)?,
            last_term_offset: read_i32(r)?,
            start_time: read_i64(r)?,
            end_time: read_i64(r)?,
            session_id: read_i32(r)?,
            stream_id: read_i32(r)?,
            channel: read_str(r)?,
            source: read_str(r)?,
        };

        let term_length = descriptor.term_buffer_length;
        if term_length <= 0 || !(term_length as u32).is_power_of_two() {
            return Err(DescriptorError::Malformed {
                detail: format!("term_buffer_length {term_length} is not a positive power of two"),
            });
        }
        Ok(descriptor)
    }
}

/// File name of a recording's descriptor inside the archive directory.
pub fn descriptor_file_name(recording_id: RecordingId) -> String {
    format!("{recording_id}.rec")
}

/// File name of one recorded term image inside the archive directory.
pub fn term_file_name(recording_id: RecordingId, term_id: i32) -> String {
    format!("{recording_id}-{term_id}.term")
}

fn write_str(w: &mut dyn Write, s: &str) -> Result<(), DescriptorError> {
    let len = u32::try_from(s.len()).map_err(|_| DescriptorError::Malformed {
        detail: format!("string of {} bytes is too long", s.len()),
    })?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_u8(r: &mut dyn Read) -> Result<u8, DescriptorError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_i32(r: &mut dyn Read) -> Result<i32, DescriptorError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64(r: &mut dyn Read) -> Result<i64, DescriptorError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_str(r: &mut dyn Read) -> Result<String, DescriptorError> {
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_STRING_LENGTH {
        return Err(DescriptorError::Malformed {
            detail: format!("string length {len} exceeds {MAX_STRING_LENGTH}"),
        });
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| DescriptorError::Malformed {
        detail: format!("invalid UTF-8 string: {e}"),
    })
}

/// Errors from locating or decoding a recording descriptor.
#[derive(Debug)]
pub enum DescriptorError {
    /// No descriptor file exists for the recording.
    NotFound {
        /// Where the descriptor was expected.
        path: PathBuf,
    },
    /// Reading the descriptor failed.
    Io(io::Error),
    /// The file does not start with `b"RPRD"`.
    InvalidMagic,
    /// The format version is not supported by this build.
    UnsupportedVersion {
        /// The version found in the file.
        found: u8,
    },
    /// A field holds an impossible value.
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
}

impl DescriptorError {
    /// Convert into an `io::Error` for fault reporting.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(e) => e,
            Self::NotFound { path } => io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ),
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "{} not found", path.display()),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidMagic => write!(f, "invalid magic bytes (expected b\"RPRD\")"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported descriptor version {found}")
            }
            Self::Malformed { detail } => write!(f, "malformed descriptor: {detail}"),
        }
    }
}

impl Error for DescriptorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DescriptorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
