//! Replay counters.
//!
//! [`ReplayMetrics`] is kept per session and folded into the conductor's
//! [`ConductorMetrics`] when the session is removed.

/// Counters for a single replay session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayMetrics {
    /// Fragments committed to the replay channel.
    pub fragments_replayed: u64,
    /// Payload bytes committed to the replay channel.
    pub bytes_replayed: u64,
    /// Claims refused because the replay channel was full.
    pub back_pressure_events: u64,
    /// Claims refused while the replay channel rotated terms.
    pub admin_action_events: u64,
    /// Steps spent waiting for both channels to connect.
    pub connect_wait_ticks: u64,
    /// Control responses that could not be published.
    pub responses_dropped: u64,
}

/// Cumulative counters across all sessions of a conductor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConductorMetrics {
    /// Sessions accepted into the arena.
    pub sessions_started: u64,
    /// Replay requests refused at capacity.
    pub sessions_rejected: u64,
    /// Sessions removed after closing without a fault.
    pub sessions_completed: u64,
    /// Sessions that ended with a non-fatal fault.
    pub sessions_failed: u64,
    /// I/O faults escalated to the caller.
    pub fatal_faults: u64,
    /// Sessions closed by an abort request.
    pub sessions_aborted: u64,
    /// Totals of every removed session's counters.
    pub replay: ReplayMetrics,
}

impl ConductorMetrics {
    /// Add a finished session's counters to the totals.
    pub fn absorb(&mut self, session: &ReplayMetrics) {
        let total = &mut self.replay;
        total.fragments_replayed += session.fragments_replayed;
        total.bytes_replayed += session.bytes_replayed;
        total.back_pressure_events += session.back_pressure_events;
        total.admin_action_events += session.admin_action_events;
        total.connect_wait_ticks += session.connect_wait_ticks;
        total.responses_dropped += session.responses_dropped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = ConductorMetrics::default();
        assert_eq!(m.sessions_started, 0);
        assert_eq!(m.fatal_faults, 0);
        assert_eq!(m.replay, ReplayMetrics::default());
    }

    #[test]
    fn absorb_accumulates() {
        let session = ReplayMetrics {
            fragments_replayed: 3,
            bytes_replayed: 300,
            back_pressure_events: 2,
            admin_action_events: 1,
            connect_wait_ticks: 4,
            responses_dropped: 0,
        };
        let mut m = ConductorMetrics::default();
        m.absorb(&session);
        m.absorb(&session);
        assert_eq!(m.replay.fragments_replayed, 6);
        assert_eq!(m.replay.bytes_replayed, 600);
        assert_eq!(m.replay.back_pressure_events, 4);
        assert_eq!(m.replay.admin_action_events, 2);
        assert_eq!(m.replay.connect_wait_ticks, 8);
    }
}
