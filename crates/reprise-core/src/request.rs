//! The replay request consumed by the conductor.

use crate::id::{CorrelationId, RecordingId};

/// A client request to replay part of a recording.
///
/// The request is decoded by the control-protocol layer and handed to the
/// conductor, which creates one replay session per request. No validation
/// happens at construction; the session validates against the recording
/// descriptor once both channels are connected.
///
/// # Examples
///
/// ```
/// use reprise_core::{CorrelationId, RecordingId, ReplayRequest};
///
/// let request = ReplayRequest {
///     recording_id: RecordingId(1),
///     from_term_id: 3,
///     from_term_offset: 500,
///     replay_length: 300,
///     correlation_id: CorrelationId(77),
/// };
///
/// assert_eq!(request.from_term_offset, 500);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayRequest {
    /// Recording to replay.
    pub recording_id: RecordingId,
    /// Term id at which the replay starts.
    pub from_term_id: i32,
    /// Byte offset within `from_term_id` at which the replay starts.
    pub from_term_offset: i32,
    /// Number of bytes of the recorded stream to replay.
    pub replay_length: i64,
    /// Token echoed in the control response.
    pub correlation_id: CorrelationId,
}
