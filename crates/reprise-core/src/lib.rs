//! Core types for the Reprise recorded-stream replay engine.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! identifiers, the replay request, and the error taxonomy shared by the
//! log-buffer and archive crates.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod request;

pub use error::ReplayError;
pub use id::{CorrelationId, RecordingId, ReplaySessionId};
pub use request::ReplayRequest;
