//! Reprise: replay of recorded message streams into live publications.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! Reprise sub-crates. For most users, adding `reprise` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use reprise::prelude::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut conductor = ReplayConductor::open(ReplayConfig {
//!     archive_dir: dir.path().into(),
//!     ..ReplayConfig::default()
//! })
//! .unwrap();
//!
//! let replay = ExclusivePublication::new(PublicationConfig::default()).unwrap();
//! let control = ExclusivePublication::new(PublicationConfig::default()).unwrap();
//! let _replay_reader = replay.attach_reader().unwrap();
//! let mut control_reader = control.attach_reader().unwrap();
//!
//! let request = ReplayRequest {
//!     recording_id: RecordingId(1),
//!     from_term_id: 0,
//!     from_term_offset: 0,
//!     replay_length: 64,
//!     correlation_id: CorrelationId(9),
//! };
//! conductor
//!     .start_replay(request, Box::new(replay), Box::new(control))
//!     .unwrap();
//!
//! // The archive is empty, so the session answers with an error and closes.
//! let cycle = conductor.do_work();
//! assert!(!cycle.has_fatal());
//! assert_eq!(conductor.session_count(), 0);
//!
//! let mut responses = Vec::new();
//! control_reader.poll(|_, payload| responses.push(ControlResponse::decode(payload).unwrap()), 8);
//! assert_eq!(responses[0].code, ResponseCode::Error);
//! assert!(responses[0].error_message.ends_with("1.rec not found"));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `reprise-core` | IDs, replay requests, the session error taxonomy |
//! | [`logbuffer`] | `reprise-logbuffer` | Frame layout, buffer claims, publications |
//! | [`archive`] | `reprise-archive` | Descriptors, cursors, replay sessions, the conductor |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Identifiers, requests, and errors (`reprise-core`).
pub use reprise_core as types;

/// Frame layout and publications (`reprise-logbuffer`).
///
/// [`logbuffer::ExclusivePublication`] and [`logbuffer::LogReader`] form an
/// in-process channel; [`logbuffer::BufferClaim`] is the zero-copy write
/// path replay sessions use.
pub use reprise_logbuffer as logbuffer;

/// Recording archive and replay (`reprise-archive`).
///
/// [`archive::ReplayConductor`] schedules [`archive::ReplaySession`]s over a
/// [`archive::RecordingArchive`].
pub use reprise_archive as archive;

/// Common imports for typical Reprise usage.
///
/// ```rust
/// use reprise::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use reprise_core::{CorrelationId, RecordingId, ReplayError, ReplayRequest, ReplaySessionId};

    // Channels
    pub use reprise_logbuffer::{
        ClaimResult, DataHeader, ExclusivePublication, LogReader, Publication, PublicationConfig,
        PublishStatus,
    };

    // Archive and replay
    pub use reprise_archive::{
        ArchiveDir, ConductorCommand, ControlResponse, DutyCycle, RecordingArchive,
        RecordingDescriptor, ReplayConductor, ReplayConfig, ReplaySession, ResponseCode, Session,
        SessionState,
    };
}
