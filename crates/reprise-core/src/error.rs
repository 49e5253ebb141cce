//! Error taxonomy for replay sessions.
//!
//! Every failure a session can hit maps to one [`ReplayError`] variant. The
//! session absorbs the client-facing part (it sends the control response and
//! releases its resources) and then returns the error from its step
//! function. The conductor uses [`ReplayError::is_fatal`] to decide whether
//! to drop the session quietly or escalate.

use std::error::Error;
use std::fmt;
use std::io;

use crate::id::RecordingId;

/// Failures reported by a replay session's step function.
#[derive(Debug)]
pub enum ReplayError {
    /// The request does not fit the recorded range (bad offset, term id
    /// outside the recording, or a negative length).
    Validation {
        /// Human-readable description, including the recorded bounds.
        message: String,
    },
    /// No descriptor exists for the requested recording.
    NotFound {
        /// The recording that was requested.
        recording_id: RecordingId,
        /// Where the descriptor was expected.
        path: String,
    },
    /// A local I/O failure: descriptor read, cursor open, or a read fault
    /// while replaying. Signals a defect on this host, not a client error.
    Io {
        /// What the session was doing when the fault happened.
        context: String,
        /// The underlying I/O error.
        source: io::Error,
    },
    /// The outbound or control channel closed or disconnected mid-replay.
    Publication {
        /// Which channel failed and how.
        reason: String,
    },
    /// Both channels did not connect within the configured number of ticks.
    ConnectTimeout {
        /// Ticks spent waiting before giving up.
        waited_ticks: u64,
    },
}

impl ReplayError {
    /// Whether this error must be escalated past the conductor.
    ///
    /// Only I/O faults are fatal; every other variant is a normal end of
    /// a session from the conductor's point of view.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Short stable tag for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Io { .. } => "io",
            Self::Publication { .. } => "publication",
            Self::ConnectTimeout { .. } => "connect_timeout",
        }
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { message } => write!(f, "{message}"),
            Self::NotFound { path, .. } => write!(f, "{path} not found"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Publication { reason } => write!(f, "{reason}"),
            Self::ConnectTimeout { waited_ticks } => {
                write!(f, "channels not connected after {waited_ticks} ticks")
            }
        }
    }
}

impl Error for ReplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_is_fatal() {
        let io = ReplayError::Io {
            context: "cursor read failed".into(),
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        };
        assert!(io.is_fatal());
        assert!(!ReplayError::Validation { message: "x".into() }.is_fatal());
        assert!(!ReplayError::Publication { reason: "x".into() }.is_fatal());
        assert!(!ReplayError::ConnectTimeout { waited_ticks: 1 }.is_fatal());
        assert!(!ReplayError::NotFound {
            recording_id: RecordingId(1),
            path: "1.rec".into(),
        }
        .is_fatal());
    }

    #[test]
    fn not_found_display_names_path() {
        let err = ReplayError::NotFound {
            recording_id: RecordingId(4),
            path: "/archive/4.rec".into(),
        };
        assert_eq!(err.to_string(), "/archive/4.rec not found");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn io_exposes_source() {
        let err = ReplayError::Io {
            context: "failed to open cursor".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing term"),
        };
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "failed to open cursor: missing term");
    }
}
