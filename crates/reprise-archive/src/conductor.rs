//! Cooperative scheduler for replay sessions.
//!
//! [`ReplayConductor`] owns live sessions in an insertion-ordered arena
//! keyed by [`ReplaySessionId`]. Each [`do_work`](ReplayConductor::do_work)
//! call is one duty cycle: drain cross-thread commands, step every session
//! once with the configured fragment limit, then remove the sessions that
//! reached `Closed`. Non-fatal session failures are counted and reported in
//! the [`DutyCycle`]; I/O faults are surfaced through
//! [`DutyCycle::into_result`] for the caller to escalate.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use smallvec::SmallVec;

use reprise_core::{ReplayError, ReplayRequest, ReplaySessionId};
use reprise_logbuffer::Publication;

use crate::archive::{ArchiveDir, RecordingArchive};
use crate::config::{ConfigError, ReplayConfig};
use crate::metrics::ConductorMetrics;
use crate::response::{ControlResponseProxy, ResponseProxy};
use crate::session::{ReplaySession, Session};

// ── Commands ───────────────────────────────────────────────────────

/// Requests other threads can send to a running conductor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConductorCommand {
    /// Abort one session; unknown ids are ignored.
    Abort(ReplaySessionId),
    /// Abort every live session.
    AbortAll,
}

// ── Results ────────────────────────────────────────────────────────

/// A session failure observed during a duty cycle.
#[derive(Debug)]
pub struct SessionFault {
    /// The session that failed. It has already been closed.
    pub session_id: ReplaySessionId,
    /// What went wrong.
    pub error: ReplayError,
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replay session {}: {}", self.session_id, self.error)
    }
}

impl Error for SessionFault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// Outcome of one [`ReplayConductor::do_work`] call.
#[derive(Debug, Default)]
pub struct DutyCycle {
    /// Total work reported by the sessions.
    pub work_count: usize,
    /// Failures, fatal or not, in session order.
    pub faults: Vec<SessionFault>,
}

impl DutyCycle {
    /// Whether any fault must be escalated.
    pub fn has_fatal(&self) -> bool {
        self.faults.iter().any(|f| f.error.is_fatal())
    }

    /// The work count, or the first fatal fault.
    pub fn into_result(self) -> Result<usize, SessionFault> {
        match self.faults.into_iter().find(|f| f.error.is_fatal()) {
            Some(fault) => Err(fault),
            None => Ok(self.work_count),
        }
    }
}

/// Why a replay could not be started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartError {
    /// The conductor is already running its maximum number of sessions.
    TooManySessions {
        /// The configured limit.
        limit: usize,
    },
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManySessions { limit } => {
                write!(f, "too many concurrent replay sessions (limit {limit})")
            }
        }
    }
}

impl Error for StartError {}

// ── ReplayConductor ────────────────────────────────────────────────

/// Owns and steps replay sessions.
pub struct ReplayConductor {
    config: ReplayConfig,
    archive: Arc<dyn RecordingArchive>,
    sessions: IndexMap<ReplaySessionId, Box<dyn Session>>,
    next_session_id: u64,
    cmd_tx: Sender<ConductorCommand>,
    cmd_rx: Receiver<ConductorCommand>,
    metrics: ConductorMetrics,
}

const _: fn() = || {
    fn assert_send<T: Send>() {}
    assert_send::<ReplayConductor>();
};

impl ReplayConductor {
    /// Conductor over the archive directory named in `config`.
    pub fn open(config: ReplayConfig) -> Result<Self, ConfigError> {
        let archive = Arc::new(ArchiveDir::new(config.archive_dir.clone()));
        Self::new(config, archive)
    }

    /// Conductor over an arbitrary archive.
    pub fn new(
        config: ReplayConfig,
        archive: Arc<dyn RecordingArchive>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            config,
            archive,
            sessions: IndexMap::new(),
            next_session_id: 0,
            cmd_tx,
            cmd_rx,
            metrics: ConductorMetrics::default(),
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Cumulative counters.
    pub fn metrics(&self) -> &ConductorMetrics {
        &self.metrics
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether `session_id` is still live.
    pub fn contains(&self, session_id: ReplaySessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Sender for [`ConductorCommand`]s, usable from any thread.
    pub fn command_sender(&self) -> Sender<ConductorCommand> {
        self.cmd_tx.clone()
    }

    /// Start replaying `request` into `replay`, answering on `control`.
    pub fn start_replay(
        &mut self,
        request: ReplayRequest,
        replay: Box<dyn Publication>,
        control: Box<dyn Publication>,
    ) -> Result<ReplaySessionId, StartError> {
        self.start_replay_with_proxy(
            request,
            replay,
            control,
            Box::new(ControlResponseProxy::default()),
        )
    }

    /// As [`start_replay`](Self::start_replay) with a caller-supplied
    /// response proxy.
    ///
    /// At capacity the request is answered with an error response and
    /// both channels are dropped.
    pub fn start_replay_with_proxy(
        &mut self,
        request: ReplayRequest,
        replay: Box<dyn Publication>,
        mut control: Box<dyn Publication>,
        mut proxy: Box<dyn ResponseProxy>,
    ) -> Result<ReplaySessionId, StartError> {
        if let Err(e) = self.check_capacity() {
            tracing::warn!(
                recording_id = %request.recording_id,
                correlation_id = %request.correlation_id,
                error = %e,
                "replay request refused"
            );
            if control.is_connected() {
                let message = e.to_string();
                proxy.send_response(control.as_mut(), Some(&message), request.correlation_id);
            }
            self.metrics.sessions_rejected += 1;
            return Err(e);
        }

        let archive = Arc::clone(&self.archive);
        let session_config = self.config.session_config();
        self.add_session(|session_id| {
            Box::new(ReplaySession::new(
                session_id,
                request,
                replay,
                control,
                proxy,
                archive,
                session_config,
            ))
        })
    }

    /// Insert a session built by `make` under a freshly allocated id.
    pub fn add_session<F>(&mut self, make: F) -> Result<ReplaySessionId, StartError>
    where
        F: FnOnce(ReplaySessionId) -> Box<dyn Session>,
    {
        self.check_capacity()?;
        let session_id = ReplaySessionId(self.next_session_id);
        self.next_session_id += 1;
        self.sessions.insert(session_id, make(session_id));
        self.metrics.sessions_started += 1;
        tracing::debug!(%session_id, live = self.sessions.len(), "replay session added");
        Ok(session_id)
    }

    /// Abort `session_id`. Returns whether it was live.
    pub fn abort(&mut self, session_id: ReplaySessionId) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) => {
                session.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every live session.
    pub fn abort_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.abort();
        }
    }

    /// Run one duty cycle.
    pub fn do_work(&mut self) -> DutyCycle {
        self.drain_command_channel();

        let fragment_limit = self.config.fragment_limit;
        let mut cycle = DutyCycle::default();
        let mut finished: SmallVec<[ReplaySessionId; 8]> = SmallVec::new();

        for (&session_id, session) in self.sessions.iter_mut() {
            match session.do_work(fragment_limit) {
                Ok(work) => cycle.work_count += work,
                Err(error) => {
                    if error.is_fatal() {
                        self.metrics.fatal_faults += 1;
                        tracing::error!(%session_id, error = %error, "escalating replay fault");
                    } else {
                        self.metrics.sessions_failed += 1;
                        tracing::debug!(%session_id, kind = error.kind(), "replay session failed");
                    }
                    cycle.faults.push(SessionFault { session_id, error });
                }
            }
            if session.is_done() {
                finished.push(session_id);
            }
        }

        for session_id in finished {
            if let Some(mut session) = self.sessions.shift_remove(&session_id) {
                session.on_remove(session_id, &mut self.metrics);
                tracing::debug!(%session_id, live = self.sessions.len(), "replay session removed");
            }
        }

        cycle
    }

    /// Abort every session and run the cycle that releases them.
    pub fn shutdown(&mut self) -> DutyCycle {
        self.abort_all();
        self.do_work()
    }

    fn check_capacity(&self) -> Result<(), StartError> {
        let limit = self.config.max_concurrent_sessions;
        if self.sessions.len() >= limit {
            return Err(StartError::TooManySessions { limit });
        }
        Ok(())
    }

    fn drain_command_channel(&mut self) {
        while let Ok(command) = self.cmd_rx.try_recv() {
            match command {
                ConductorCommand::Abort(session_id) => {
                    if !self.abort(session_id) {
                        tracing::debug!(%session_id, "abort for unknown session ignored");
                    }
                }
                ConductorCommand::AbortAll => self.abort_all(),
            }
        }
    }
}

impl fmt::Debug for ReplayConductor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayConductor")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("next_session_id", &self.next_session_id)
            .field("metrics", &self.metrics)
            .finish()
    }
}
