//! Replay of recorded streams into live publications.
//!
//! A [`ReplaySession`] validates a [`ReplayRequest`](reprise_core::ReplayRequest)
//! against the recording's [`RecordingDescriptor`], opens a
//! [`FragmentCursor`] over the recorded term images, and re-publishes each
//! recorded frame through a zero-copy claim, preserving its flags and
//! reserved value. The [`ReplayConductor`] owns live sessions in an indexed
//! arena and steps them cooperatively with a bounded fragment count.
//!
//! # Architecture
//!
//! - [`descriptor`] decodes the per-recording descriptor file
//! - [`range`] holds the circular term-id range checks
//! - [`cursor`] reads frames out of recorded term images
//! - [`archive`] locates descriptors and opens cursors
//! - [`response`] encodes control responses and sends them
//! - [`session`] is the replay state machine
//! - [`conductor`] schedules sessions and escalates I/O faults

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod archive;
pub mod conductor;
pub mod config;
pub mod cursor;
pub mod descriptor;
pub mod metrics;
pub mod range;
pub mod response;
pub mod session;

pub use archive::{ArchiveDir, RecordingArchive};
pub use conductor::{ConductorCommand, DutyCycle, ReplayConductor, SessionFault, StartError};
pub use config::{ConfigError, ReplayConfig, SessionConfig};
pub use cursor::{FragmentCursor, PollAction, TermImageCursor, TermSource};
pub use descriptor::{DescriptorError, RecordingDescriptor};
pub use metrics::{ConductorMetrics, ReplayMetrics};
pub use range::{check_replay, replay_end, term_id_in_range, term_offset_in_range, RangeViolation};
pub use response::{
    ControlResponse, ControlResponseProxy, ResponseCode, ResponseDecodeError, ResponseProxy,
};
pub use session::{ReplaySession, Session, SessionState};
