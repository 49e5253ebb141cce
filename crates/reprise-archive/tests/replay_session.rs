//! Replay session behaviour against scripted channels and archives.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use proptest::prelude::*;
use reprise_archive::{
    RecordingDescriptor, ReplaySession, Session, SessionConfig, SessionState,
};
use reprise_core::{CorrelationId, RecordingId, ReplayError, ReplayRequest, ReplaySessionId};
use reprise_logbuffer::PublishStatus;
use reprise_test_utils::{
    ArchiveFault, MemoryArchive, MockPublication, PublicationHandle, RecordingResponseProxy,
    ScriptedCursor, SentResponse, TermImageBuilder,
};

const TERM: i32 = 65536;
const LIMIT: usize = 42;

struct Fixture {
    session: ReplaySession,
    replay: PublicationHandle,
    control: PublicationHandle,
    proxy: RecordingResponseProxy,
    archive: Arc<MemoryArchive>,
}

fn descriptor(initial: (i32, i32), last: (i32, i32)) -> RecordingDescriptor {
    RecordingDescriptor {
        initial_term_id: initial.0,
        initial_term_offset: initial.1,
        last_term_id: last.0,
        last_term_offset: last.1,
        ..RecordingDescriptor::new(RecordingId(1), TERM)
    }
}

/// Recording 1 spanning `(3,0)..(3,1000)`.
fn scenario_descriptor() -> RecordingDescriptor {
    descriptor((3, 0), (3, 1000))
}

fn request(from_term_id: i32, from_term_offset: i32, replay_length: i64) -> ReplayRequest {
    ReplayRequest {
        recording_id: RecordingId(1),
        from_term_id,
        from_term_offset,
        replay_length,
        correlation_id: CorrelationId(42),
    }
}

fn fixture_with(archive: MemoryArchive, request: ReplayRequest, config: SessionConfig) -> Fixture {
    let (replay_pub, replay) = MockPublication::new();
    let (control_pub, control) = MockPublication::new();
    let proxy = RecordingResponseProxy::new();
    let archive = Arc::new(archive);
    let session = ReplaySession::new(
        ReplaySessionId(7),
        request,
        Box::new(replay_pub),
        Box::new(control_pub),
        Box::new(proxy.clone()),
        archive.clone(),
        config,
    );
    Fixture {
        session,
        replay,
        control,
        proxy,
        archive,
    }
}

fn no_linger() -> SessionConfig {
    SessionConfig {
        linger_ticks: 0,
        connect_timeout_ticks: None,
    }
}

fn fixture(descriptor: RecordingDescriptor, request: ReplayRequest) -> Fixture {
    fixture_with(
        MemoryArchive::new().with_recording(descriptor, []),
        request,
        no_linger(),
    )
}

fn fragments(n: usize) -> Vec<(u8, i64, Vec<u8>)> {
    (0..n)
        .map(|i| (0x80 | i as u8, 100 + i as i64, vec![i as u8; 8 + i]))
        .collect()
}

// ── Validation scenarios ───────────────────────────────────────────

#[test]
fn request_within_recorded_term_enters_replay() {
    let mut f = fixture(scenario_descriptor(), request(3, 500, 300));
    f.archive
        .set_next_cursor(Box::new(ScriptedCursor::new(fragments(2))));

    assert_eq!(f.session.do_work(LIMIT).unwrap(), 1);
    assert_eq!(f.session.state(), SessionState::Replay);
    assert_eq!(
        f.proxy.responses(),
        vec![SentResponse {
            correlation_id: CorrelationId(42),
            error_message: None,
        }]
    );
    assert_eq!(f.archive.cursor_opens(), 1);
}

#[test]
fn negative_offset_reports_recorded_bounds() {
    let mut f = fixture(scenario_descriptor(), request(3, -1, 300));

    let err = f.session.do_work(LIMIT).unwrap_err();
    assert!(matches!(err, ReplayError::Validation { .. }));
    assert!(!err.is_fatal());
    assert!(f.session.is_done());
    assert_eq!(f.archive.cursor_opens(), 0);

    let errors = f.proxy.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("(3,0)"), "{}", errors[0]);
    assert!(errors[0].contains("(3,1000)"), "{}", errors[0]);
    assert_eq!(f.replay.close_calls(), 1);
}

#[test]
fn replay_past_recorded_end_is_rejected() {
    let mut f = fixture(scenario_descriptor(), request(3, 500, 501));
    assert!(matches!(
        f.session.do_work(LIMIT),
        Err(ReplayError::Validation { .. })
    ));
    assert_eq!(f.proxy.errors().len(), 1);
}

#[test]
fn oversized_lengths_are_validation_failures() {
    for length in [(1i64 << 32) * i64::from(TERM), i64::MAX] {
        let mut f = fixture(scenario_descriptor(), request(3, 500, length));
        let err = f.session.do_work(LIMIT).unwrap_err();
        assert!(matches!(err, ReplayError::Validation { .. }), "{length}: {err:?}");
        assert!(!err.is_fatal());
        assert!(f.session.is_done());
        assert_eq!(f.archive.cursor_opens(), 0);
        assert_eq!(f.proxy.errors().len(), 1);
    }
}

#[test]
fn closed_channel_skips_validation() {
    let mut f = fixture(scenario_descriptor(), request(3, 65536, 0));
    f.replay.set_closed(true);
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 1);
    assert!(f.session.is_done());
    assert!(f.proxy.responses().is_empty());
    assert_eq!(f.archive.descriptor_loads(), 0);
    assert_eq!(f.replay.close_calls(), 1);
}

#[test]
fn missing_recording_is_not_found() {
    let mut f = fixture(
        scenario_descriptor(),
        ReplayRequest {
            recording_id: RecordingId(99),
            ..request(3, 0, 64)
        },
    );
    let err = f.session.do_work(LIMIT).unwrap_err();
    match &err {
        ReplayError::NotFound { recording_id, path } => {
            assert_eq!(*recording_id, RecordingId(99));
            assert_eq!(path, "99.rec");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(!err.is_fatal());
    assert_eq!(f.proxy.errors(), vec!["99.rec not found".to_owned()]);
}

#[test]
fn unreadable_descriptor_is_fatal() {
    let archive = MemoryArchive::new().with_recording(scenario_descriptor(), []);
    archive.set_fault(ArchiveFault::DescriptorIo);
    let mut f = fixture_with(archive, request(3, 0, 64), no_linger());

    let err = f.session.do_work(LIMIT).unwrap_err();
    assert!(err.is_fatal());
    assert!(f.session.is_done());
    assert_eq!(f.proxy.errors().len(), 1);
}

#[test]
fn cursor_open_failure_is_fatal() {
    let archive = MemoryArchive::new().with_recording(scenario_descriptor(), []);
    archive.set_fault(ArchiveFault::CursorOpen);
    let mut f = fixture_with(archive, request(3, 0, 64), no_linger());

    let err = f.session.do_work(LIMIT).unwrap_err();
    assert!(matches!(err, ReplayError::Io { .. }));
    assert_eq!(
        f.proxy.errors(),
        vec!["Failed to open cursor for a recording".to_owned()]
    );
    assert!(f.session.is_done());
    assert_eq!(f.replay.close_calls(), 1);
}

proptest! {
    #[test]
    fn out_of_term_offsets_close_without_cursor(
        offset in prop_oneof![i32::MIN..0, TERM..i32::MAX],
        length in 0i64..1000,
    ) {
        let mut f = fixture(scenario_descriptor(), request(3, offset, length));
        let result = f.session.do_work(LIMIT);
        let is_validation = matches!(result, Err(ReplayError::Validation { .. }));
        prop_assert!(is_validation);
        prop_assert!(f.session.is_done());
        prop_assert_eq!(f.archive.cursor_opens(), 0);
        prop_assert_eq!(f.proxy.errors().len(), 1);
    }

    #[test]
    fn wrapped_recordings_accept_in_range_requests(
        initial in (i32::MAX - 4)..=i32::MAX,
        span in 1i32..8,
        step in 0i32..8,
        from_offset in 0i32..(TERM / 2),
    ) {
        // The recording crosses the i32 boundary.
        let last = initial.wrapping_add(span);
        prop_assume!(last < initial);
        let step = step % (span + 1);
        let from_term = initial.wrapping_add(step);
        let remaining_terms = i64::from(span - step);
        let length = remaining_terms * i64::from(TERM) + i64::from(TERM / 2) - i64::from(from_offset);

        let archive = MemoryArchive::new().with_recording(descriptor((initial, 0), (last, TERM / 2)), []);
        archive.set_next_cursor(Box::new(ScriptedCursor::new(vec![])));
        let mut f = fixture_with(archive, request(from_term, from_offset, length), no_linger());

        prop_assert_eq!(f.session.do_work(LIMIT).unwrap(), 1);
        prop_assert_eq!(f.session.state(), SessionState::Replay);
        prop_assert_eq!(f.proxy.responses().len(), 1);
        prop_assert_eq!(f.proxy.responses()[0].error_message.clone(), None);
    }
}

// ── Replay ─────────────────────────────────────────────────────────

#[test]
fn replayed_frames_keep_flags_reserved_value_and_payload() {
    let image = TermImageBuilder::new(TERM as usize, 3)
        .data(b"first", 0x80, -1)
        .padding(64)
        .data(&[7u8; 100], 0x40, i64::MAX)
        .data(b"", 0xC0, 5)
        .build();
    let recorded = 64 + 64 + 160 + 32;
    let archive = MemoryArchive::new().with_recording(
        descriptor((3, 0), (3, recorded)),
        [(3, image)],
    );
    let mut f = fixture_with(archive, request(3, 0, i64::from(recorded)), no_linger());

    f.session.do_work(LIMIT).unwrap();
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 3 + 1);
    assert!(f.session.is_done());

    let frames = f.replay.frames();
    let summary: Vec<_> = frames
        .iter()
        .map(|fr| (fr.header.flags, fr.header.reserved_value, fr.payload.clone()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (0x80, -1, b"first".to_vec()),
            (0x40, i64::MAX, vec![7u8; 100]),
            (0xC0, 5, Vec::new()),
        ]
    );
    for frame in &frames {
        assert_eq!(frame.header.frame_length as usize, 32 + frame.payload.len());
    }
    assert_eq!(f.session.metrics().fragments_replayed, 3);
    assert_eq!(f.session.metrics().bytes_replayed, 105);
}

#[test]
fn channel_full_then_disconnected() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    let cursor = ScriptedCursor::new(fragments(3));
    let released = cursor.release_counter();
    f.archive.set_next_cursor(Box::new(cursor));
    f.session.do_work(LIMIT).unwrap();

    f.replay.push_statuses([PublishStatus::BackPressured]);
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 0);
    assert_eq!(f.session.state(), SessionState::Replay);
    assert_eq!(f.proxy.errors().len(), 0);

    f.replay.set_connected(false);
    let err = f.session.do_work(LIMIT).unwrap_err();
    assert!(matches!(err, ReplayError::Publication { .. }));
    assert!(!err.is_fatal());
    assert_eq!(
        f.proxy.errors(),
        vec!["Reply publication to replay requestor has shutdown mid-replay".to_owned()]
    );
    // Inactive releases in the step that entered it.
    assert!(f.session.is_done());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(f.replay.close_calls(), 1);
    assert_eq!(f.session.metrics().back_pressure_events, 1);
}

#[test]
fn backpressure_retries_the_same_fragment() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    f.archive
        .set_next_cursor(Box::new(ScriptedCursor::new(fragments(2))));
    f.session.do_work(LIMIT).unwrap();

    f.replay
        .push_statuses([PublishStatus::AdminAction, PublishStatus::BackPressured]);
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 0);
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 0);
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 2 + 1);

    let reserved: Vec<_> = f
        .replay
        .frames()
        .iter()
        .map(|fr| fr.header.reserved_value)
        .collect();
    assert_eq!(reserved, vec![100, 101]);
    assert_eq!(f.session.metrics().admin_action_events, 1);
}

#[test]
fn disconnected_control_suppresses_error_response() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    f.archive
        .set_next_cursor(Box::new(ScriptedCursor::new(fragments(1))));
    f.session.do_work(LIMIT).unwrap();

    f.control.set_connected(false);
    f.replay.set_closed(true);
    assert!(matches!(
        f.session.do_work(LIMIT),
        Err(ReplayError::Publication { .. })
    ));
    assert_eq!(f.proxy.responses().len(), 1);
}

#[test]
fn cursor_read_fault_is_fatal_and_releases_cursor() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    let cursor = ScriptedCursor::new(fragments(3)).fail_at(1);
    let released = cursor.release_counter();
    f.archive.set_next_cursor(Box::new(cursor));
    f.session.do_work(LIMIT).unwrap();

    let err = f.session.do_work(LIMIT).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(f.proxy.errors(), vec!["Cursor read failed".to_owned()]);
    assert_eq!(f.replay.frames().len(), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(f.session.is_done());
}

#[test]
fn oversized_fragment_is_a_publication_fault() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    f.archive
        .set_next_cursor(Box::new(ScriptedCursor::new(vec![(0, 0, vec![0u8; 64])])));
    f.replay.set_max_payload_length(16);
    f.session.do_work(LIMIT).unwrap();

    let err = f.session.do_work(LIMIT).unwrap_err();
    assert!(matches!(err, ReplayError::Publication { .. }));
    assert!(f.session.is_done());
    assert!(f.replay.frames().is_empty());
}

#[test]
fn fragment_limit_is_respected() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    f.archive
        .set_next_cursor(Box::new(ScriptedCursor::new(fragments(5))));
    f.session.do_work(LIMIT).unwrap();

    assert_eq!(f.session.do_work(2).unwrap(), 2);
    assert_eq!(f.replay.frames().len(), 2);
    assert_eq!(f.session.do_work(2).unwrap(), 2);
    assert_eq!(f.session.do_work(2).unwrap(), 1 + 1);
    assert!(f.session.is_done());
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn linger_follows_end_of_stream() {
    let archive = MemoryArchive::new().with_recording(scenario_descriptor(), []);
    archive.set_next_cursor(Box::new(ScriptedCursor::new(fragments(1))));
    let config = SessionConfig {
        linger_ticks: 2,
        connect_timeout_ticks: None,
    };
    let mut f = fixture_with(archive, request(3, 0, 1000), config);

    f.session.do_work(LIMIT).unwrap();
    f.session.do_work(LIMIT).unwrap();
    assert_eq!(f.session.state(), SessionState::Linger);
    assert_eq!(f.replay.close_calls(), 0);
    f.session.do_work(LIMIT).unwrap();
    assert_eq!(f.session.state(), SessionState::Linger);
    f.session.do_work(LIMIT).unwrap();
    assert!(f.session.is_done());
    assert_eq!(f.replay.close_calls(), 1);
}

#[test]
fn waits_for_both_channels() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 0));
    f.archive
        .set_next_cursor(Box::new(ScriptedCursor::new(vec![])));
    f.control.set_connected(false);

    for _ in 0..5 {
        assert_eq!(f.session.do_work(LIMIT).unwrap(), 0);
        assert_eq!(f.session.state(), SessionState::Init);
    }
    assert_eq!(f.archive.descriptor_loads(), 0);

    f.control.set_connected(true);
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 1);
    assert_eq!(f.session.state(), SessionState::Replay);
    assert_eq!(f.session.metrics().connect_wait_ticks, 5);
}

#[test]
fn connect_timeout_gives_up() {
    let archive = MemoryArchive::new().with_recording(scenario_descriptor(), []);
    let config = SessionConfig {
        linger_ticks: 0,
        connect_timeout_ticks: Some(2),
    };
    let mut f = fixture_with(archive, request(3, 0, 64), config);
    f.replay.set_connected(false);

    assert_eq!(f.session.do_work(LIMIT).unwrap(), 0);
    let err = f.session.do_work(LIMIT).unwrap_err();
    assert!(matches!(err, ReplayError::ConnectTimeout { waited_ticks: 2 }));
    assert!(!err.is_fatal());
    assert!(f.session.is_done());
    assert_eq!(f.proxy.errors().len(), 1);
}

#[test]
fn closed_session_does_no_more_io() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    f.archive
        .set_next_cursor(Box::new(ScriptedCursor::new(fragments(1))));
    f.session.do_work(LIMIT).unwrap();
    f.session.do_work(LIMIT).unwrap();
    assert!(f.session.is_done());

    let attempts = f.replay.claim_attempts();
    let responses = f.proxy.responses();
    for _ in 0..10 {
        assert_eq!(f.session.do_work(LIMIT).unwrap(), 0);
        assert_eq!(f.session.state(), SessionState::Closed);
    }
    f.session.abort();
    assert_eq!(f.session.do_work(LIMIT).unwrap(), 0);
    assert_eq!(f.replay.claim_attempts(), attempts);
    assert_eq!(f.proxy.responses(), responses);
    assert_eq!(f.replay.close_calls(), 1);
    assert_eq!(f.archive.descriptor_loads(), 1);
}

#[test]
fn abort_reaches_closed_from_every_state() {
    let linger = SessionConfig {
        linger_ticks: 100,
        connect_timeout_ticks: None,
    };
    // Steps to take before aborting, and the state they lead to.
    let cases = [
        (0, SessionState::Init),
        (1, SessionState::Replay),
        (2, SessionState::Linger),
    ];
    for (steps, expected) in cases {
        let archive = MemoryArchive::new().with_recording(scenario_descriptor(), []);
        let cursor = ScriptedCursor::new(fragments(if expected == SessionState::Linger { 1 } else { 50 }));
        let released = cursor.release_counter();
        archive.set_next_cursor(Box::new(cursor));
        let mut f = fixture_with(archive, request(3, 0, 1000), linger);
        if expected == SessionState::Replay {
            // Keep the session in Replay by refusing every claim.
            f.replay.push_statuses(vec![PublishStatus::BackPressured; 10]);
        }

        for _ in 0..steps {
            f.session.do_work(LIMIT).unwrap();
        }
        assert_eq!(f.session.state(), expected);

        f.session.abort();
        assert_eq!(f.session.state(), SessionState::Inactive);
        assert_eq!(f.session.do_work(LIMIT).unwrap(), 1);
        assert!(f.session.is_done(), "abort from {expected:?}");
        assert_eq!(f.replay.close_calls(), 1);
        let expected_releases = if expected == SessionState::Init { 0 } else { 1 };
        assert_eq!(released.load(Ordering::SeqCst), expected_releases);
    }
}

#[test]
fn abort_while_inactive_keeps_single_release() {
    let mut f = fixture(scenario_descriptor(), request(3, 0, 1000));
    f.session.abort();
    f.session.abort();
    f.session.do_work(LIMIT).unwrap();
    f.session.abort();
    f.session.do_work(LIMIT).unwrap();
    assert_eq!(f.replay.close_calls(), 1);
    assert!(f.proxy.responses().is_empty());
}
