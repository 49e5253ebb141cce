//! Record a short stream into a temporary archive and replay part of it.
//!
//! Run with `RUST_LOG=debug cargo run --example replay_archive` to see the
//! session lifecycle.

use std::error::Error;

use reprise::prelude::*;
use reprise_test_utils::{write_recording, TermImageBuilder};

const TERM_LENGTH: i32 = 4096;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let recording_id = RecordingId(1);

    // Twenty messages in term 0.
    let mut image = TermImageBuilder::new(TERM_LENGTH as usize, 0);
    for i in 0..20i64 {
        let message = format!("tick {i:02}");
        image = image.data(message.as_bytes(), 0xC0, i);
    }
    let recorded = image.offset() as i32;
    let descriptor = RecordingDescriptor {
        last_term_offset: recorded,
        stream_id: 10,
        channel: "ipc".into(),
        ..RecordingDescriptor::new(recording_id, TERM_LENGTH)
    };
    write_recording(dir.path(), &descriptor, [(0, image.build())])?;
    tracing::info!(dir = %dir.path().display(), recorded, "recording written");

    let mut conductor = ReplayConductor::open(ReplayConfig {
        archive_dir: dir.path().into(),
        fragment_limit: 4,
        linger_ticks: 0,
        ..ReplayConfig::default()
    })?;

    let replay = ExclusivePublication::new(PublicationConfig::default())?;
    let control = ExclusivePublication::new(PublicationConfig::default())?;
    let mut replay_reader = replay.attach_reader()?;
    let mut control_reader = control.attach_reader()?;

    // Every frame is 64 bytes once aligned: skip five, replay ten.
    let request = ReplayRequest {
        recording_id,
        from_term_id: 0,
        from_term_offset: 5 * 64,
        replay_length: 10 * 64,
        correlation_id: CorrelationId(100),
    };
    let session_id = conductor.start_replay(request, Box::new(replay), Box::new(control))?;
    tracing::info!(%session_id, "replay started");

    while conductor.session_count() > 0 {
        let work = conductor.do_work().into_result()?;
        let received = replay_reader.poll(
            |header, payload| {
                tracing::info!(
                    reserved_value = header.reserved_value,
                    payload = %String::from_utf8_lossy(payload),
                    "replayed"
                );
            },
            16,
        );
        tracing::debug!(work, received, "duty cycle");
    }

    control_reader.poll(
        |_, payload| match ControlResponse::decode(payload) {
            Ok(response) => tracing::info!(?response, "control response"),
            Err(e) => tracing::warn!(error = %e, "undecodable control response"),
        },
        8,
    );
    tracing::info!(metrics = ?conductor.metrics(), "done");
    Ok(())
}
