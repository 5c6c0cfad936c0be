//! Session lifecycle state and counters.

use serde::Serialize;
use std::time::Instant;

/// Run loop lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Opening (or reopening) the sensor link
    Connecting,
    /// Link open, consuming samples
    Running,
    /// Releasing the link and storage handles
    Stopping,
    /// Everything released
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Running => write!(f, "Running"),
            SessionState::Stopping => write!(f, "Stopping"),
            SessionState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Counters accumulated over one counting session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    #[serde(skip)]
    pub started: Instant,
    /// Lines received from the link, including empty and malformed ones
    pub lines_received: u64,
    pub samples_accepted: u64,
    pub malformed_samples: u64,
    pub empty_lines: u64,
    pub idle_timeouts: u64,
    pub sheets_counted: u64,
    pub readings_persisted: u64,
    pub write_failures: u64,
    /// Link failures after the session was running
    pub link_failures: u64,
    pub reconnect_attempts: u64,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            lines_received: 0,
            samples_accepted: 0,
            malformed_samples: 0,
            empty_lines: 0,
            idle_timeouts: 0,
            sheets_counted: 0,
            readings_persisted: 0,
            write_failures: 0,
            link_failures: 0,
            reconnect_attempts: 0,
        }
    }
}

impl SessionStats {
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.samples_accepted, 0);
        assert_eq!(stats.sheets_counted, 0);
        assert!(stats.uptime_secs() < 5);
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Connecting.to_string(), "Connecting");
        assert_eq!(SessionState::Running.to_string(), "Running");
        assert_eq!(SessionState::Stopping.to_string(), "Stopping");
        assert_eq!(SessionState::Stopped.to_string(), "Stopped");
    }
}
