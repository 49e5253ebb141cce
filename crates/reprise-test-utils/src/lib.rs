//! Test utilities and mock types for Reprise development.
//!
//! Provides scriptable implementations of the seams a replay session
//! talks through ([`Publication`], [`ResponseProxy`]) plus the recording
//! fixtures in [`fixtures`]. Every mock hands out a cloneable handle so a
//! test can keep observing and steering it after the mock itself has been
//! moved into the code under test.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use reprise_archive::ResponseProxy;
use reprise_core::CorrelationId;
use reprise_logbuffer::frame::{
    align, CURRENT_VERSION, FLAGS_OFFSET, FRAME_ALIGNMENT, FRAME_LENGTH_OFFSET, HDR_TYPE_DATA,
    HEADER_LENGTH, TYPE_OFFSET, UNFRAGMENTED, VERSION_OFFSET,
};
use reprise_logbuffer::{
    AtomicBuffer, BufferClaim, ClaimResult, DataHeader, LogBufferError, Publication,
    PublishStatus,
};

pub use fixtures::{write_recording, ArchiveFault, MemoryArchive, ScriptedCursor, TermImageBuilder};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── MockPublication ────────────────────────────────────────────────

struct PublicationState {
    connected: bool,
    closed: bool,
    script: VecDeque<PublishStatus>,
    claims: Vec<Arc<AtomicBuffer>>,
    claim_attempts: usize,
    close_calls: usize,
    max_payload_length: usize,
}

/// A committed frame captured by a [`MockPublication`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    pub header: DataHeader,
    pub payload: Vec<u8>,
}

/// In-memory [`Publication`] whose connectivity and claim outcomes are
/// controlled through a [`PublicationHandle`].
///
/// Each successful claim gets its own frame buffer, so committed frames
/// can be inspected individually and aborted claims are visible as
/// padding.
pub struct MockPublication {
    state: Arc<Mutex<PublicationState>>,
    position: i64,
}

/// Steers and observes a [`MockPublication`].
#[derive(Clone)]
pub struct PublicationHandle {
    state: Arc<Mutex<PublicationState>>,
}

impl MockPublication {
    /// A connected, open publication and its handle.
    pub fn new() -> (Self, PublicationHandle) {
        let state = Arc::new(Mutex::new(PublicationState {
            connected: true,
            closed: false,
            script: VecDeque::new(),
            claims: Vec::new(),
            claim_attempts: 0,
            close_calls: 0,
            max_payload_length: 32 * 1024,
        }));
        let handle = PublicationHandle {
            state: Arc::clone(&state),
        };
        (Self { state, position: 0 }, handle)
    }

    /// A publication that is not yet connected.
    pub fn disconnected() -> (Self, PublicationHandle) {
        let (publication, handle) = Self::new();
        handle.set_connected(false);
        (publication, handle)
    }
}

impl Publication for MockPublication {
    fn is_connected(&self) -> bool {
        let state = lock(&self.state);
        state.connected && !state.closed
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn max_payload_length(&self) -> usize {
        lock(&self.state).max_payload_length
    }

    fn try_claim(&mut self, length: usize) -> Result<ClaimResult, LogBufferError> {
        let mut state = lock(&self.state);
        state.claim_attempts += 1;
        if length > state.max_payload_length {
            return Err(LogBufferError::MessageTooLarge {
                length,
                max: state.max_payload_length,
            });
        }
        if state.closed {
            return Ok(ClaimResult::Rejected(PublishStatus::Closed));
        }
        if !state.connected {
            return Ok(ClaimResult::Rejected(PublishStatus::NotConnected));
        }
        if let Some(status) = state.script.pop_front() {
            return Ok(ClaimResult::Rejected(status));
        }

        let frame_length = length + HEADER_LENGTH;
        let aligned = align(frame_length, FRAME_ALIGNMENT);
        let buffer = Arc::new(AtomicBuffer::new(aligned));
        buffer.put_i32_le(FRAME_LENGTH_OFFSET, -(frame_length as i32));
        buffer.put_u8(VERSION_OFFSET, CURRENT_VERSION);
        buffer.put_u8(FLAGS_OFFSET, UNFRAGMENTED);
        buffer.put_u16_le(TYPE_OFFSET, HDR_TYPE_DATA);
        let claim = BufferClaim::wrap(Arc::clone(&buffer), 0, frame_length)?;
        state.claims.push(buffer);
        self.position += aligned as i64;
        Ok(ClaimResult::Claimed(claim))
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        state.closed = true;
    }
}

impl PublicationHandle {
    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Close from the far side, as if the transport went away.
    pub fn set_closed(&self, closed: bool) {
        lock(&self.state).closed = closed;
    }

    /// Reject the next claim attempts with `statuses`, in order.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = PublishStatus>) {
        lock(&self.state).script.extend(statuses);
    }

    pub fn set_max_payload_length(&self, max: usize) {
        lock(&self.state).max_payload_length = max;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of times [`Publication::close`] was called.
    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    pub fn claim_attempts(&self) -> usize {
        lock(&self.state).claim_attempts
    }

    /// Committed data frames, in claim order.
    pub fn frames(&self) -> Vec<CapturedFrame> {
        lock(&self.state)
            .claims
            .iter()
            .filter_map(|buffer| {
                let header = DataHeader::decode(&buffer.to_vec(0, HEADER_LENGTH)).ok()?;
                if header.frame_length <= 0 || header.is_padding() {
                    return None;
                }
                let payload = buffer.to_vec(HEADER_LENGTH, header.payload_length());
                Some(CapturedFrame { header, payload })
            })
            .collect()
    }

    /// Claims that were aborted or dropped without commit.
    pub fn aborted_claims(&self) -> usize {
        lock(&self.state)
            .claims
            .iter()
            .filter(|buffer| {
                DataHeader::decode(&buffer.to_vec(0, HEADER_LENGTH))
                    .map(|h| h.frame_length > 0 && h.is_padding())
                    .unwrap_or(false)
            })
            .count()
    }

    /// Payloads of the committed frames.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.frames().into_iter().map(|f| f.payload).collect()
    }
}

// ── RecordingResponseProxy ─────────────────────────────────────────

/// A response captured by a [`RecordingResponseProxy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentResponse {
    pub correlation_id: CorrelationId,
    pub error_message: Option<String>,
}

/// [`ResponseProxy`] that records every response instead of encoding it.
#[derive(Clone, Default)]
pub struct RecordingResponseProxy {
    sent: Arc<Mutex<Vec<SentResponse>>>,
}

impl RecordingResponseProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order.
    pub fn responses(&self) -> Vec<SentResponse> {
        lock(&self.sent).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter_map(|r| r.error_message.clone())
            .collect()
    }
}

impl ResponseProxy for RecordingResponseProxy {
    fn send_response(
        &mut self,
        control: &mut dyn Publication,
        error_message: Option<&str>,
        correlation_id: CorrelationId,
    ) -> bool {
        if !control.is_connected() {
            return false;
        }
        lock(&self.sent).push(SentResponse {
            correlation_id,
            error_message: error_message.map(str::to_owned),
        });
        true
    }
}
