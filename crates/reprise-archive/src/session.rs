//! The replay session state machine.
//!
//! A [`ReplaySession`] moves through `Init → Replay → (Linger) → Inactive →
//! Closed`, one non-blocking [`do_work`](Session::do_work) step at a time:
//!
//! - **Init** waits for both channels to connect, loads the recording
//!   descriptor, validates the requested range, opens a cursor, and
//!   acknowledges the request.
//! - **Replay** polls the cursor and re-publishes each recorded frame
//!   through a buffer claim, copying flags, reserved value and payload.
//!   Backpressure leaves the fragment for the next step.
//! - **Linger** holds the session for a configured number of steps after
//!   the recording is exhausted.
//! - **Inactive** releases the cursor and closes the replay channel in the
//!   same step that entered it, then the session is **Closed**.
//!
//! Data that only matters in one state (the cursor, the linger counter,
//! the connect wait) lives in that state's variant.

use std::fmt;
use std::mem;
use std::sync::Arc;

use reprise_core::{CorrelationId, RecordingId, ReplayError, ReplayRequest, ReplaySessionId};
use reprise_logbuffer::{ClaimResult, DataHeader, Publication, PublishStatus};

use crate::archive::RecordingArchive;
use crate::config::SessionConfig;
use crate::cursor::{FragmentCursor, PollAction};
use crate::descriptor::{DescriptorError, RecordingDescriptor};
use crate::metrics::{ConductorMetrics, ReplayMetrics};
use crate::range::check_replay;
use crate::response::ResponseProxy;

/// Message sent when a channel goes away while frames are being replayed.
const SHUTDOWN_MID_REPLAY: &str = "Reply publication to replay requestor has shutdown mid-replay";

// ── Session ────────────────────────────────────────────────────────

/// A unit of work the conductor steps cooperatively.
pub trait Session: Send {
    /// Perform one bounded, non-blocking step.
    ///
    /// Returns the amount of work done. An `Err` means the session has
    /// already reported the failure to its client and released its
    /// resources.
    fn do_work(&mut self, fragment_limit: usize) -> Result<usize, ReplayError>;

    /// Whether the session has reached its terminal state.
    fn is_done(&self) -> bool;

    /// Request shutdown; resources are released on the next step.
    fn abort(&mut self);

    /// Called once when the conductor drops the session from its arena.
    fn on_remove(&mut self, session_id: ReplaySessionId, metrics: &mut ConductorMetrics);
}

/// Externally visible phase of a [`ReplaySession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for channels or validating the request.
    Init,
    /// Streaming recorded frames.
    Replay,
    /// Recording exhausted; holding before close.
    Linger,
    /// Shutting down.
    Inactive,
    /// Terminal; all resources released.
    Closed,
}

enum State {
    Init {
        waited_ticks: u64,
    },
    Replay {
        cursor: Box<dyn FragmentCursor>,
    },
    Linger {
        cursor: Box<dyn FragmentCursor>,
        remaining_ticks: u64,
    },
    Inactive {
        cursor: Option<Box<dyn FragmentCursor>>,
    },
    Closed,
}

impl State {
    fn phase(&self) -> SessionState {
        match self {
            Self::Init { .. } => SessionState::Init,
            Self::Replay { .. } => SessionState::Replay,
            Self::Linger { .. } => SessionState::Linger,
            Self::Inactive { .. } => SessionState::Inactive,
            Self::Closed => SessionState::Closed,
        }
    }

    fn into_inactive(self) -> Self {
        match self {
            Self::Init { .. } => Self::Inactive { cursor: None },
            Self::Replay { cursor } | Self::Linger { cursor, .. } => Self::Inactive {
                cursor: Some(cursor),
            },
            inactive @ Self::Inactive { .. } => inactive,
            Self::Closed => Self::Closed,
        }
    }
}

// ── Emitter ────────────────────────────────────────────────────────

/// The channels a session writes to, plus what it has reported so far.
///
/// Kept apart from [`State`] so the cursor, owned by the state, can be
/// polled with a handler that borrows the emitter.
struct Emitter {
    session_id: ReplaySessionId,
    recording_id: RecordingId,
    correlation_id: CorrelationId,
    replay: Option<Box<dyn Publication>>,
    control: Box<dyn Publication>,
    proxy: Box<dyn ResponseProxy>,
    fault: Option<ReplayError>,
    metrics: ReplayMetrics,
}

impl Emitter {
    fn on_fragment(&mut self, header: &DataHeader, payload: &[u8]) -> PollAction {
        if self.fault.is_some() {
            return PollAction::Stop;
        }
        let Some(replay) = self.replay.as_mut() else {
            return PollAction::Stop;
        };

        match replay.try_claim(payload.len()) {
            Ok(ClaimResult::Claimed(mut claim)) => {
                claim
                    .set_flags(header.flags)
                    .set_reserved_value(header.reserved_value);
                if let Err(e) = claim.put_payload(0, payload) {
                    claim.abort();
                    self.fail(ReplayError::Publication {
                        reason: format!("failed to copy replayed fragment: {e}"),
                    });
                    return PollAction::Stop;
                }
                claim.commit();
                self.metrics.fragments_replayed += 1;
                self.metrics.bytes_replayed += payload.len() as u64;
                PollAction::Continue
            }
            Ok(ClaimResult::Rejected(PublishStatus::BackPressured)) => {
                self.metrics.back_pressure_events += 1;
                PollAction::Stop
            }
            Ok(ClaimResult::Rejected(PublishStatus::AdminAction)) => {
                self.metrics.admin_action_events += 1;
                PollAction::Stop
            }
            Ok(ClaimResult::Rejected(PublishStatus::Closed | PublishStatus::NotConnected)) => {
                self.fail(ReplayError::Publication {
                    reason: SHUTDOWN_MID_REPLAY.to_owned(),
                });
                PollAction::Stop
            }
            Err(e) => {
                self.fail(ReplayError::Publication {
                    reason: format!("claim of {} bytes failed: {e}", payload.len()),
                });
                PollAction::Stop
            }
        }
    }

    fn respond(&mut self, error_message: Option<&str>) {
        if !self
            .proxy
            .send_response(self.control.as_mut(), error_message, self.correlation_id)
        {
            self.metrics.responses_dropped += 1;
        }
    }

    /// Report `error` to the client if it can still hear us, and keep it
    /// for the step's return value. Only the first fault is kept.
    fn fail(&mut self, error: ReplayError) {
        let message = match &error {
            ReplayError::Io { context, .. } => context.clone(),
            other => other.to_string(),
        };
        if error.is_fatal() {
            tracing::error!(
                session_id = %self.session_id,
                recording_id = %self.recording_id,
                correlation_id = %self.correlation_id,
                error = %error,
                "replay fault"
            );
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                recording_id = %self.recording_id,
                correlation_id = %self.correlation_id,
                kind = error.kind(),
                error = %error,
                "replay failed"
            );
        }
        if self.control.is_connected() {
            self.respond(Some(&message));
        }
        if self.fault.is_none() {
            self.fault = Some(error);
        }
    }

    fn release(&mut self, cursor: Option<Box<dyn FragmentCursor>>) {
        drop(cursor);
        if let Some(mut replay) = self.replay.take() {
            replay.close();
        }
    }
}

// ── ReplaySession ──────────────────────────────────────────────────

/// Replays part of one recording into a replay channel.
pub struct ReplaySession {
    request: ReplayRequest,
    archive: Arc<dyn RecordingArchive>,
    config: SessionConfig,
    state: State,
    emitter: Emitter,
    aborted: bool,
    faulted: bool,
}

// Compile-time assertion: sessions move onto the conductor's thread.
const _: fn() = || {
    fn assert_send<T: Send>() {}
    assert_send::<ReplaySession>();
};

impl ReplaySession {
    /// Create a session in `Init`. Nothing is read until the first step.
    pub fn new(
        session_id: ReplaySessionId,
        request: ReplayRequest,
        replay: Box<dyn Publication>,
        control: Box<dyn Publication>,
        proxy: Box<dyn ResponseProxy>,
        archive: Arc<dyn RecordingArchive>,
        config: SessionConfig,
    ) -> Self {
        Self {
            request,
            archive,
            config,
            state: State::Init { waited_ticks: 0 },
            emitter: Emitter {
                session_id,
                recording_id: request.recording_id,
                correlation_id: request.correlation_id,
                replay: Some(replay),
                control,
                proxy,
                fault: None,
                metrics: ReplayMetrics::default(),
            },
            aborted: false,
            faulted: false,
        }
    }

    /// Identifier assigned by the conductor.
    pub fn session_id(&self) -> ReplaySessionId {
        self.emitter.session_id
    }

    /// The request being served.
    pub fn request(&self) -> &ReplayRequest {
        &self.request
    }

    /// Current phase.
    pub fn state(&self) -> SessionState {
        self.state.phase()
    }

    /// Counters so far.
    pub fn metrics(&self) -> &ReplayMetrics {
        &self.emitter.metrics
    }

    fn init(&mut self, waited_ticks: u64) -> (State, usize) {
        let emitter = &mut self.emitter;
        let replay_closed = emitter.replay.as_ref().map_or(true, |p| p.is_closed());
        if replay_closed || emitter.control.is_closed() {
            tracing::debug!(
                session_id = %emitter.session_id,
                "channel closed before replay started"
            );
            return (State::Inactive { cursor: None }, 0);
        }

        let connected = emitter.replay.as_ref().is_some_and(|p| p.is_connected())
            && emitter.control.is_connected();
        if !connected {
            let waited_ticks = waited_ticks + 1;
            emitter.metrics.connect_wait_ticks += 1;
            if let Some(timeout) = self.config.connect_timeout_ticks {
                if waited_ticks >= timeout {
                    emitter.fail(ReplayError::ConnectTimeout { waited_ticks });
                    return (State::Inactive { cursor: None }, 0);
                }
            }
            return (State::Init { waited_ticks }, 0);
        }

        let descriptor = match self.load_descriptor() {
            Ok(descriptor) => descriptor,
            Err(error) => {
                self.emitter.fail(error);
                return (State::Inactive { cursor: None }, 0);
            }
        };

        let r = &self.request;
        if let Err(violation) = check_replay(
            &descriptor,
            r.from_term_id,
            r.from_term_offset,
            r.replay_length,
        ) {
            tracing::debug!(
                session_id = %self.emitter.session_id,
                from_term_id = r.from_term_id,
                from_term_offset = r.from_term_offset,
                replay_length = r.replay_length,
                %violation,
                "replay request rejected"
            );
            self.emitter.fail(ReplayError::Validation {
                message: out_of_range_message(&descriptor),
            });
            return (State::Inactive { cursor: None }, 0);
        }

        let cursor = match self.archive.open_cursor(
            &descriptor,
            r.from_term_id,
            r.from_term_offset,
            r.replay_length,
        ) {
            Ok(cursor) => cursor,
            Err(source) => {
                self.emitter.fail(ReplayError::Io {
                    context: "Failed to open cursor for a recording".to_owned(),
                    source,
                });
                return (State::Inactive { cursor: None }, 0);
            }
        };

        self.emitter.respond(None);
        tracing::debug!(
            session_id = %self.emitter.session_id,
            recording_id = %r.recording_id,
            from_term_id = r.from_term_id,
            from_term_offset = r.from_term_offset,
            replay_length = r.replay_length,
            "replay started"
        );
        (State::Replay { cursor }, 1)
    }

    fn load_descriptor(&self) -> Result<RecordingDescriptor, ReplayError> {
        let recording_id = self.request.recording_id;
        self.archive
            .load_descriptor(recording_id)
            .map_err(|e| match e {
                DescriptorError::NotFound { path } => ReplayError::NotFound {
                    recording_id,
                    path: path.display().to_string(),
                },
                other => ReplayError::Io {
                    context: format!("failed to read descriptor of recording {recording_id}"),
                    source: other.into_io(),
                },
            })
    }

    fn replay(&mut self, mut cursor: Box<dyn FragmentCursor>, fragment_limit: usize) -> (State, usize) {
        let emitter = &mut self.emitter;
        let polled = cursor.controlled_poll(
            &mut |header: &DataHeader, payload: &[u8]| emitter.on_fragment(header, payload),
            fragment_limit,
        );

        match polled {
            Err(source) => {
                emitter.fail(ReplayError::Io {
                    context: "Cursor read failed".to_owned(),
                    source,
                });
                (State::Inactive { cursor: Some(cursor) }, 0)
            }
            Ok(polled) if emitter.fault.is_some() => (State::Inactive { cursor: Some(cursor) }, polled),
            Ok(polled) if cursor.is_done() => {
                tracing::debug!(
                    session_id = %emitter.session_id,
                    fragments = emitter.metrics.fragments_replayed,
                    bytes = emitter.metrics.bytes_replayed,
                    "recording exhausted"
                );
                let next = if self.config.linger_ticks > 0 {
                    State::Linger {
                        cursor,
                        remaining_ticks: self.config.linger_ticks,
                    }
                } else {
                    State::Inactive { cursor: Some(cursor) }
                };
                (next, polled)
            }
            Ok(polled) => (State::Replay { cursor }, polled),
        }
    }
}

impl Session for ReplaySession {
    fn do_work(&mut self, fragment_limit: usize) -> Result<usize, ReplayError> {
        let (next, mut work) = match mem::replace(&mut self.state, State::Closed) {
            State::Init { waited_ticks } => self.init(waited_ticks),
            State::Replay { cursor } => self.replay(cursor, fragment_limit),
            State::Linger {
                cursor,
                remaining_ticks,
            } => {
                if remaining_ticks <= 1 {
                    (State::Inactive { cursor: Some(cursor) }, 0)
                } else {
                    let remaining_ticks = remaining_ticks - 1;
                    (State::Linger { cursor, remaining_ticks }, 0)
                }
            }
            inactive @ State::Inactive { .. } => (inactive, 0),
            State::Closed => return Ok(0),
        };
        self.state = next;

        if let State::Inactive { .. } = self.state {
            if let State::Inactive { cursor } = mem::replace(&mut self.state, State::Closed) {
                self.emitter.release(cursor);
                tracing::debug!(session_id = %self.emitter.session_id, "replay session closed");
                work += 1;
            }
        }

        match self.emitter.fault.take() {
            Some(error) => {
                self.faulted = true;
                Err(error)
            }
            None => Ok(work),
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    fn abort(&mut self) {
        if matches!(self.state, State::Closed) {
            return;
        }
        tracing::debug!(
            session_id = %self.emitter.session_id,
            state = ?self.state.phase(),
            "replay session aborted"
        );
        self.aborted = true;
        self.state = mem::replace(&mut self.state, State::Closed).into_inactive();
    }

    fn on_remove(&mut self, session_id: ReplaySessionId, metrics: &mut ConductorMetrics) {
        debug_assert_eq!(session_id, self.emitter.session_id);
        metrics.absorb(&self.emitter.metrics);
        if self.faulted {
            return;
        }
        if self.aborted {
            metrics.sessions_aborted += 1;
        } else {
            metrics.sessions_completed += 1;
        }
    }
}

impl fmt::Debug for ReplaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplaySession")
            .field("session_id", &self.emitter.session_id)
            .field("request", &self.request)
            .field("state", &self.state.phase())
            .field("metrics", &self.emitter.metrics)
            .finish()
    }
}

fn out_of_range_message(d: &RecordingDescriptor) -> String {
    format!(
        "Requested replay is out of recorded range [({},{}), ({},{})]",
        d.initial_term_id, d.initial_term_offset, d.last_term_id, d.last_term_offset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::TermImageCursor;
    use crate::response::{ControlResponse, ControlResponseProxy, ResponseCode};
    use reprise_logbuffer::frame::{CURRENT_VERSION, HDR_TYPE_DATA, HEADER_LENGTH};
    use reprise_logbuffer::{ExclusivePublication, LogReader, PublicationConfig};
    use std::collections::HashMap;
    use std::io;

    const TERM: i32 = 4096;

    /// One recording held in memory.
    struct OneRecording {
        descriptor: RecordingDescriptor,
        terms: HashMap<i32, Vec<u8>>,
    }

    impl RecordingArchive for OneRecording {
        fn load_descriptor(
            &self,
            recording_id: RecordingId,
        ) -> Result<RecordingDescriptor, DescriptorError> {
            if recording_id == self.descriptor.recording_id {
                Ok(self.descriptor.clone())
            } else {
                Err(DescriptorError::NotFound {
                    path: format!("{recording_id}.rec").into(),
                })
            }
        }

        fn open_cursor(
            &self,
            descriptor: &RecordingDescriptor,
            from_term_id: i32,
            from_term_offset: i32,
            replay_length: i64,
        ) -> io::Result<Box<dyn FragmentCursor>> {
            let cursor = TermImageCursor::open(
                self.terms.clone(),
                descriptor.term_buffer_length,
                from_term_id,
                from_term_offset,
                replay_length,
            )?;
            Ok(Box::new(cursor))
        }
    }

    /// Recording 1: term 3 holds `count` 64-byte frames from offset 0.
    fn archive(count: usize) -> Arc<OneRecording> {
        let mut image = vec![0u8; TERM as usize];
        for i in 0..count {
            let offset = i * 64;
            DataHeader {
                frame_length: 64,
                version: CURRENT_VERSION,
                flags: 0x80 | i as u8,
                header_type: HDR_TYPE_DATA,
                term_offset: offset as i32,
                session_id: 9,
                stream_id: 9,
                term_id: 3,
                reserved_value: 1000 + i as i64,
            }
            .encode(&mut image[offset..])
            .unwrap();
            image[offset + HEADER_LENGTH..offset + 64].fill(i as u8);
        }
        Arc::new(OneRecording {
            descriptor: RecordingDescriptor {
                initial_term_id: 3,
                last_term_id: 3,
                last_term_offset: (count * 64) as i32,
                ..RecordingDescriptor::new(RecordingId(1), TERM)
            },
            terms: HashMap::from([(3, image)]),
        })
    }

    struct Harness {
        session: ReplaySession,
        replay_reader: LogReader,
        control_reader: LogReader,
    }

    fn harness(archive: Arc<OneRecording>, request: ReplayRequest, config: SessionConfig) -> Harness {
        let publication = || {
            ExclusivePublication::new(PublicationConfig {
                term_length: 1024,
                ..PublicationConfig::default()
            })
            .unwrap()
        };
        let replay = publication();
        let control = publication();
        let replay_reader = replay.attach_reader().unwrap();
        let control_reader = control.attach_reader().unwrap();
        let session = ReplaySession::new(
            ReplaySessionId(1),
            request,
            Box::new(replay),
            Box::new(control),
            Box::new(ControlResponseProxy::default()),
            archive,
            config,
        );
        Harness {
            session,
            replay_reader,
            control_reader,
        }
    }

    fn request(from_term_offset: i32, replay_length: i64) -> ReplayRequest {
        ReplayRequest {
            recording_id: RecordingId(1),
            from_term_id: 3,
            from_term_offset,
            replay_length,
            correlation_id: CorrelationId(77),
        }
    }

    fn no_linger() -> SessionConfig {
        SessionConfig {
            linger_ticks: 0,
            connect_timeout_ticks: None,
        }
    }

    fn responses(reader: &mut LogReader) -> Vec<ControlResponse> {
        let mut out = Vec::new();
        reader.poll(|_, p| out.push(ControlResponse::decode(p).unwrap()), 16);
        out
    }

    #[test]
    fn replays_frames_verbatim_then_closes() {
        let mut h = harness(archive(3), request(0, 192), no_linger());

        assert_eq!(h.session.do_work(42).unwrap(), 1);
        assert_eq!(h.session.state(), SessionState::Replay);
        assert_eq!(
            responses(&mut h.control_reader),
            vec![ControlResponse::ok(CorrelationId(77))]
        );

        // Three fragments, then Inactive → Closed in the same step.
        assert_eq!(h.session.do_work(42).unwrap(), 4);
        assert!(h.session.is_done());

        let mut frames = Vec::new();
        h.replay_reader.poll(
            |header, payload| frames.push((header.flags, header.reserved_value, payload.to_vec())),
            16,
        );
        assert_eq!(
            frames,
            vec![
                (0x80, 1000, vec![0u8; 32]),
                (0x81, 1001, vec![1u8; 32]),
                (0x82, 1002, vec![2u8; 32]),
            ]
        );
        assert_eq!(h.session.metrics().fragments_replayed, 3);
    }

    #[test]
    fn bad_offset_closes_in_one_step() {
        let mut h = harness(archive(3), request(-1, 64), no_linger());
        let err = h.session.do_work(42).unwrap_err();
        assert!(matches!(err, ReplayError::Validation { .. }));
        assert!(h.session.is_done());

        let sent = responses(&mut h.control_reader);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code, ResponseCode::Error);
        assert_eq!(
            sent[0].error_message,
            "Requested replay is out of recorded range [(3,0), (3,192)]"
        );
    }

    #[test]
    fn unknown_recording_is_not_found() {
        let mut h = harness(
            archive(1),
            ReplayRequest {
                recording_id: RecordingId(5),
                ..request(0, 64)
            },
            no_linger(),
        );
        let err = h.session.do_work(42).unwrap_err();
        assert!(matches!(err, ReplayError::NotFound { recording_id: RecordingId(5), .. }));
        assert!(!err.is_fatal());
        assert_eq!(responses(&mut h.control_reader)[0].error_message, "5.rec not found");
    }

    #[test]
    fn fragment_limit_bounds_a_step() {
        let mut h = harness(archive(3), request(0, 192), no_linger());
        h.session.do_work(42).unwrap();
        assert_eq!(h.session.do_work(2).unwrap(), 2);
        assert_eq!(h.session.state(), SessionState::Replay);
        assert_eq!(h.session.do_work(2).unwrap(), 2);
        assert!(h.session.is_done());
    }

    #[test]
    fn linger_holds_for_configured_steps() {
        let config = SessionConfig {
            linger_ticks: 3,
            connect_timeout_ticks: None,
        };
        let mut h = harness(archive(1), request(0, 64), config);
        h.session.do_work(42).unwrap();
        h.session.do_work(42).unwrap();
        assert_eq!(h.session.state(), SessionState::Linger);
        h.session.do_work(42).unwrap();
        h.session.do_work(42).unwrap();
        assert_eq!(h.session.state(), SessionState::Linger);
        h.session.do_work(42).unwrap();
        assert!(h.session.is_done());
    }

    #[test]
    fn waits_for_connection_then_times_out() {
        let config = SessionConfig {
            linger_ticks: 0,
            connect_timeout_ticks: Some(3),
        };
        let h = harness(archive(1), request(0, 64), config);
        let Harness {
            mut session,
            replay_reader,
            control_reader: _control_reader,
        } = h;
        drop(replay_reader);

        assert_eq!(session.do_work(42).unwrap(), 0);
        assert_eq!(session.do_work(42).unwrap(), 0);
        assert_eq!(session.state(), SessionState::Init);
        let err = session.do_work(42).unwrap_err();
        assert!(matches!(err, ReplayError::ConnectTimeout { waited_ticks: 3 }));
        assert!(session.is_done());
        assert_eq!(session.metrics().connect_wait_ticks, 3);
    }

    #[test]
    fn closed_session_is_idle() {
        let mut h = harness(archive(1), request(0, 64), no_linger());
        h.session.abort();
        assert_eq!(h.session.state(), SessionState::Inactive);
        assert_eq!(h.session.do_work(42).unwrap(), 1);
        assert!(h.session.is_done());
        for _ in 0..3 {
            assert_eq!(h.session.do_work(42).unwrap(), 0);
            assert!(h.session.is_done());
        }
        h.session.abort();
        assert!(h.session.is_done());
        assert!(responses(&mut h.control_reader).is_empty());
    }
}
