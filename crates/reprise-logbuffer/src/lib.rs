//! Frame layout, shared log buffer, and zero-copy buffer claims.
//!
//! A replayed frame is staged in place: the publisher reserves a region of
//! the shared term buffer, the caller fills in header fields and payload
//! through a [`BufferClaim`], and `commit()` publishes the frame length with
//! release ordering so concurrent readers never see a ready-looking frame
//! whose bytes are not yet visible.
//!
//! # Architecture
//!
//! - [`frame`] defines the 32-byte data header layout shared by the claim,
//!   the reader, and the archive's fragment cursor
//! - [`AtomicBuffer`] is a word-backed byte buffer that can be written by
//!   one thread and read by others without `unsafe`
//! - [`BufferClaim`] is the single-use claim/commit/abort view
//! - [`ExclusivePublication`] appends frames to a single-term log and
//!   reports backpressure against its reader's position
//! - [`LogReader`] consumes committed frames and frees their space

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod claim;
pub mod error;
pub mod frame;
pub mod publication;
pub mod reader;

pub use buffer::AtomicBuffer;
pub use claim::BufferClaim;
pub use error::LogBufferError;
pub use frame::DataHeader;
pub use publication::{
    ClaimResult, ExclusivePublication, OfferResult, Publication, PublicationConfig, PublishStatus,
};
pub use reader::LogReader;
