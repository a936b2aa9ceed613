//! Replica configuration (population targets, timeouts).

use crate::error::{RaftError, Result};
use std::time::Duration;

/// Replica configuration.
///
/// Population targets feed the membership rebalancer; the durations drive
/// the election and session machinery around the active role.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// Target number of voting members.
    ///
    /// The builder defaults this to the size of the initial member list.
    pub quorum_hint: usize,

    /// Passive backups to keep per voting member.
    ///
    /// The target passive population is `quorum_hint * backup_count`.
    ///
    /// Default: 0
    pub backup_count: usize,

    /// Minimum election timeout (no leader contact → candidacy).
    ///
    /// Randomized between [min, max] to avoid split votes.
    ///
    /// Default: 300ms
    pub election_timeout_min: Duration,

    /// Maximum election timeout.
    ///
    /// Default: 600ms
    pub election_timeout_max: Duration,

    /// Leader heartbeat interval.
    ///
    /// Must be well below the election timeout to avoid spurious elections.
    ///
    /// Default: 150ms
    pub heartbeat_interval: Duration,

    /// Client session timeout.
    ///
    /// Interval within which a client must send keep-alives before its
    /// session may be expired. Must exceed the election timeout so sessions
    /// survive a leader change.
    ///
    /// Default: 5000ms
    pub session_timeout: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            quorum_hint: 3,
            backup_count: 0,
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(600),
            heartbeat_interval: Duration::from_millis(150),
            session_timeout: Duration::from_millis(5000),
        }
    }
}

impl RaftConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.quorum_hint == 0 {
            return Err(RaftError::Config {
                reason: "quorum_hint must be positive".to_string(),
            });
        }

        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::Config {
                reason: format!(
                    "heartbeat_interval ({:?}) must be < election_timeout_min ({:?})",
                    self.heartbeat_interval, self.election_timeout_min
                ),
            });
        }

        if self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::Config {
                reason: format!(
                    "election_timeout_min ({:?}) must be <= election_timeout_max ({:?})",
                    self.election_timeout_min, self.election_timeout_max
                ),
            });
        }

        if self.session_timeout <= self.election_timeout_max {
            return Err(RaftError::Config {
                reason: format!(
                    "session_timeout ({:?}) must be > election_timeout_max ({:?})",
                    self.session_timeout, self.election_timeout_max
                ),
            });
        }

        Ok(())
    }

    /// Randomized election timeout in [min, max].
    pub fn random_election_timeout(&self) -> Duration {
        use rand::Rng;
        let min_ms = self.election_timeout_min.as_millis() as u64;
        let max_ms = self.election_timeout_max.as_millis() as u64;
        let random_ms = rand::thread_rng().gen_range(min_ms..=max_ms);
        Duration::from_millis(random_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        assert!(RaftConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_quorum_rejected() {
        let mut config = RaftConfig::default();
        config.quorum_hint = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn heartbeat_must_undercut_election_timeout() {
        let mut config = RaftConfig::default();
        config.heartbeat_interval = Duration::from_millis(400);
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_must_outlast_election_timeout() {
        let mut config = RaftConfig::default();
        config.session_timeout = Duration::from_millis(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn random_election_timeout_in_range() {
        let config = RaftConfig::default();
        for _ in 0..100 {
            let timeout = config.random_election_timeout();
            assert!(timeout >= config.election_timeout_min);
            assert!(timeout <= config.election_timeout_max);
        }
    }
}
