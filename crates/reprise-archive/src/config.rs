//! Replay configuration, validation, and error types.
//!
//! [`ReplayConfig`] is the input for building a
//! [`ReplayConductor`](crate::conductor::ReplayConductor).
//! [`validate()`](ReplayConfig::validate) checks it once at startup;
//! [`SessionConfig`] is the per-session slice handed to each
//! [`ReplaySession`](crate::session::ReplaySession).

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Fragments a session may replay per duty cycle unless configured otherwise.
pub const DEFAULT_REPLAY_FRAGMENT_LIMIT: usize = 42;

/// Duty cycles a session lingers after replaying its last fragment.
pub const DEFAULT_LINGER_TICKS: u64 = 10_000;

/// Sessions a conductor will run at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 64;

// ── SessionConfig ──────────────────────────────────────────────────

/// Timing knobs of a single replay session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Steps to hold the session open after the recording is exhausted.
    /// Zero closes it immediately. Default: [`DEFAULT_LINGER_TICKS`].
    pub linger_ticks: u64,
    /// Steps to wait for both channels to connect before giving up.
    /// `None` waits indefinitely. Default: `None`.
    pub connect_timeout_ticks: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            linger_ticks: DEFAULT_LINGER_TICKS,
            connect_timeout_ticks: None,
        }
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`ReplayConfig::validate()`].
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `archive_dir` is empty.
    EmptyArchiveDir,
    /// `fragment_limit` is zero, so no session could make progress.
    FragmentLimitZero,
    /// `max_concurrent_sessions` is zero.
    NoSessionCapacity,
    /// `connect_timeout_ticks` is `Some(0)`.
    ZeroConnectTimeout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyArchiveDir => write!(f, "archive_dir must not be empty"),
            Self::FragmentLimitZero => write!(f, "fragment_limit must be at least 1"),
            Self::NoSessionCapacity => write!(f, "max_concurrent_sessions must be at least 1"),
            Self::ZeroConnectTimeout => {
                write!(f, "connect_timeout_ticks must be positive; use None to wait forever")
            }
        }
    }
}

impl Error for ConfigError {}

// ── ReplayConfig ───────────────────────────────────────────────────

/// Configuration of a replay conductor and the sessions it runs.
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Directory holding recording descriptors and term images.
    pub archive_dir: PathBuf,
    /// Fragments each session may replay per duty cycle.
    /// Default: [`DEFAULT_REPLAY_FRAGMENT_LIMIT`].
    pub fragment_limit: usize,
    /// See [`SessionConfig::linger_ticks`].
    pub linger_ticks: u64,
    /// See [`SessionConfig::connect_timeout_ticks`].
    pub connect_timeout_ticks: Option<u64>,
    /// Upper bound on live sessions; further requests are refused.
    /// Default: [`DEFAULT_MAX_CONCURRENT_SESSIONS`].
    pub max_concurrent_sessions: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("archive"),
            fragment_limit: DEFAULT_REPLAY_FRAGMENT_LIMIT,
            linger_ticks: DEFAULT_LINGER_TICKS,
            connect_timeout_ticks: None,
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
        }
    }
}

impl ReplayConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyArchiveDir);
        }
        if self.fragment_limit == 0 {
            return Err(ConfigError::FragmentLimitZero);
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::NoSessionCapacity);
        }
        if self.connect_timeout_ticks == Some(0) {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        Ok(())
    }

    /// The per-session part of this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            linger_ticks: self.linger_ticks,
            connect_timeout_ticks: self.connect_timeout_ticks,
        }
    }
}
