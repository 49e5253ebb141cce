//! Term-id and term-offset range checks over a circular term space.
//!
//! Term ids wrap, so a recording whose initial term id is numerically
//! greater than its last term id covers `[initial, MAX] ∪ [MIN, last]`.
//! Offsets are only checked on the two edge terms; a term strictly between
//! them is treated as fully recorded.

use std::fmt;

use crate::descriptor::RecordingDescriptor;

/// Whether `term` lies in the circular range `[start, end]`.
pub fn term_id_in_range(term: i32, start: i32, end: i32) -> bool {
    if start <= end {
        term >= start && term <= end
    } else {
        term >= start || term <= end
    }
}

/// Whether `(term, offset)` is inside the recorded offsets of the edge terms.
///
/// On the initial term the offset must be at or after `initial_term_offset`;
/// on the last term it must be at or before `last_term_offset`. When both
/// edges are the same term both bounds apply. Any other term is accepted
/// without an offset check; call [`term_id_in_range`] first.
///
/// The two edge conditions are joined with AND, not OR: an OR form would
/// reject middle terms and let a single-term recording pass on either
/// bound alone (DESIGN.md, decision 2).
pub fn term_offset_in_range(
    term: i32,
    offset: i32,
    initial_term_id: i32,
    initial_term_offset: i32,
    last_term_id: i32,
    last_term_offset: i32,
) -> bool {
    let after_start = term != initial_term_id || offset >= initial_term_offset;
    let before_end = term != last_term_id || offset <= last_term_offset;
    after_start && before_end
}

/// Term id and offset just past the last byte of a replay.
///
/// The end term counts whole terms from the start offset, not from the
/// start of the term: `from + (offset + length) / term_length`
/// (DESIGN.md, decision 3). Computed in 64-bit arithmetic; the term id
/// wraps. Returns `None` if the end position overflows or lies more than
/// `i32::MAX` terms ahead, where the wrapped term id would be meaningless.
pub fn replay_end(
    from_term_id: i32,
    from_term_offset: i32,
    replay_length: i64,
    term_buffer_length: i32,
) -> Option<(i32, i32)> {
    let term_length = i64::from(term_buffer_length.max(1));
    let end = i64::from(from_term_offset).checked_add(replay_length)?;
    let terms = i32::try_from(end.div_euclid(term_length)).ok()?;
    let offset = end.rem_euclid(term_length) as i32;
    Some((from_term_id.wrapping_add(terms), offset))
}

/// Which check a replay request failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeViolation {
    /// The replay length is negative.
    NegativeLength,
    /// The start offset is outside `[0, term_buffer_length)`.
    OffsetOutsideTerm,
    /// The start position is not within the recording.
    StartOutOfRange,
    /// The computed end position is not within the recording.
    EndOutOfRange,
}

impl fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeLength => write!(f, "replay length is negative"),
            Self::OffsetOutsideTerm => write!(f, "start offset is outside the term"),
            Self::StartOutOfRange => write!(f, "start position is not recorded"),
            Self::EndOutOfRange => write!(f, "end position is not recorded"),
        }
    }
}

/// Check a replay of `replay_length` bytes from `(from_term_id, from_term_offset)`
/// against the recorded bounds.
pub fn check_replay(
    descriptor: &RecordingDescriptor,
    from_term_id: i32,
    from_term_offset: i32,
    replay_length: i64,
) -> Result<(), RangeViolation> {
    let d = descriptor;
    if replay_length < 0 {
        return Err(RangeViolation::NegativeLength);
    }
    if from_term_offset < 0 || from_term_offset >= d.term_buffer_length {
        return Err(RangeViolation::OffsetOutsideTerm);
    }

    let recorded = |term: i32, offset: i32| {
        term_id_in_range(term, d.initial_term_id, d.last_term_id)
            && term_offset_in_range(
                term,
                offset,
                d.initial_term_id,
                d.initial_term_offset,
                d.last_term_id,
                d.last_term_offset,
            )
    };

    if !recorded(from_term_id, from_term_offset) {
        return Err(RangeViolation::StartOutOfRange);
    }

    // Count terms relative to the initial term so a length spanning the
    // whole term-id space cannot wrap back into range.
    let term_length = i64::from(d.term_buffer_length.max(1));
    let span = i64::from(d.last_term_id.wrapping_sub(d.initial_term_id) as u32);
    let start_index = i64::from(from_term_id.wrapping_sub(d.initial_term_id) as u32);
    let end = i64::from(from_term_offset)
        .checked_add(replay_length)
        .ok_or(RangeViolation::EndOutOfRange)?;
    if start_index + end.div_euclid(term_length) > span {
        return Err(RangeViolation::EndOutOfRange);
    }

    let (end_term_id, end_term_offset) =
        replay_end(from_term_id, from_term_offset, replay_length, d.term_buffer_length)
            .ok_or(RangeViolation::EndOutOfRange)?;
    if !recorded(end_term_id, end_term_offset) {
        return Err(RangeViolation::EndOutOfRange);
    }
    Ok(())
}
