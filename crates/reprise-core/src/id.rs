//! Strongly-typed identifiers.

use std::fmt;

/// Identifies a persisted recording within an archive.
///
/// Recording ids are assigned by the capture pipeline and are used to
/// locate the recording's descriptor and term images on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordingId(pub i64);

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordingId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Client-supplied token linking a request to its eventual response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub i64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CorrelationId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Key of a live replay session in the conductor's session arena.
///
/// Allocated monotonically by the conductor and never reused within a
/// conductor's lifetime, so a stale id held by another thread can never
/// address a newer session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplaySessionId(pub u64);

impl fmt::Display for ReplaySessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ReplaySessionId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}
