//! Recovery thresholds, cooldowns and the counters they act on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GrabError;

/// One authoritative table of recovery thresholds and cooldowns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Consecutive faults tolerated before a full rebuild.
    pub max_consecutive_failures: u32,
    /// Sleep after a fault below the threshold.
    pub retry_cooldown_ms: u64,
    /// Sleep after releasing everything on device loss.
    pub device_lost_cooldown_ms: u64,
    /// Sleep after a full rebuild caused by repeated faults.
    pub repeated_failure_cooldown_ms: u64,
    /// How long a failed client waits before reconnecting.
    pub client_retry_cooldown_ms: u64,
    /// Pause between the disable and re-enable halves of a restart.
    pub restart_delay_ms: u64,
    /// Give up after this many consecutive full rebuilds. Unset = never.
    pub max_full_rebuilds: Option<u32>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            retry_cooldown_ms: 1000,
            device_lost_cooldown_ms: 2000,
            repeated_failure_cooldown_ms: 10_000,
            client_retry_cooldown_ms: 3000,
            restart_delay_ms: 500,
            max_full_rebuilds: None,
        }
    }
}

impl RecoveryPolicy {
    pub fn validate(&self) -> Result<(), GrabError> {
        if self.max_consecutive_failures == 0 {
            return Err(GrabError::Configuration(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        if self.retry_cooldown_ms == 0
            || self.device_lost_cooldown_ms == 0
            || self.repeated_failure_cooldown_ms == 0
        {
            return Err(GrabError::Configuration(
                "recovery cooldowns must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }

    pub fn device_lost_cooldown(&self) -> Duration {
        Duration::from_millis(self.device_lost_cooldown_ms)
    }

    pub fn repeated_failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.repeated_failure_cooldown_ms)
    }

    pub fn client_retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.client_retry_cooldown_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Mutable failure bookkeeping owned by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryCounter {
    consecutive_failures: u32,
    consecutive_rebuilds: u32,
    total_rebuilds: u64,
}

impl RecoveryCounter {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_rebuilds(&self) -> u32 {
        self.consecutive_rebuilds
    }

    pub fn total_rebuilds(&self) -> u64 {
        self.total_rebuilds
    }

    /// Count one fault and return the new streak length.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// Whether the fault streak calls for a full rebuild.
    pub fn threshold_reached(&self, policy: &RecoveryPolicy) -> bool {
        self.consecutive_failures >= policy.max_consecutive_failures
    }

    /// A full rebuild starts a fresh fault streak.
    pub fn record_rebuild(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_rebuilds = self.consecutive_rebuilds.saturating_add(1);
        self.total_rebuilds += 1;
    }

    /// Whether the optional ceiling on consecutive rebuilds was exceeded.
    pub fn rebuilds_exhausted(&self, policy: &RecoveryPolicy) -> bool {
        policy
            .max_full_rebuilds
            .is_some_and(|max| self.consecutive_rebuilds > max)
    }

    /// A fully successful delivery cycle clears both streaks.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_rebuilds = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cooldowns() {
        let p = RecoveryPolicy::default();
        assert_eq!(p.retry_cooldown(), Duration::from_secs(1));
        assert_eq!(p.device_lost_cooldown(), Duration::from_secs(2));
        assert_eq!(p.repeated_failure_cooldown(), Duration::from_secs(10));
        assert_eq!(p.client_retry_cooldown(), Duration::from_secs(3));
        assert_eq!(p.restart_delay(), Duration::from_millis(500));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn zero_threshold_rejected() {
        let p = RecoveryPolicy {
            max_consecutive_failures: 0,
            ..Default::default()
        };
        assert!(matches!(p.validate(), Err(GrabError::Configuration(_))));
    }

    #[test]
    fn zero_cooldown_rejected() {
        let p = RecoveryPolicy {
            retry_cooldown_ms: 0,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn streak_grows_until_threshold_then_rebuild_resets() {
        let policy = RecoveryPolicy {
            max_consecutive_failures: 3,
            ..Default::default()
        };
        let mut c = RecoveryCounter::default();
        assert_eq!(c.record_failure(), 1);
        assert_eq!(c.record_failure(), 2);
        assert!(!c.threshold_reached(&policy));
        assert_eq!(c.record_failure(), 3);
        assert!(c.threshold_reached(&policy));

        c.record_rebuild();
        assert_eq!(c.consecutive_failures(), 0);
        assert_eq!(c.consecutive_rebuilds(), 1);
        assert_eq!(c.total_rebuilds(), 1);
    }

    #[test]
    fn success_clears_streaks_but_not_totals() {
        let mut c = RecoveryCounter::default();
        c.record_failure();
        c.record_rebuild();
        c.record_failure();
        c.record_success();
        assert_eq!(c.consecutive_failures(), 0);
        assert_eq!(c.consecutive_rebuilds(), 0);
        assert_eq!(c.total_rebuilds(), 1);
    }

    #[test]
    fn rebuild_ceiling() {
        let unlimited = RecoveryPolicy::default();
        let capped = RecoveryPolicy {
            max_full_rebuilds: Some(2),
            ..Default::default()
        };
        let mut c = RecoveryCounter::default();
        c.record_rebuild();
        c.record_rebuild();
        assert!(!c.rebuilds_exhausted(&capped));
        c.record_rebuild();
        assert!(c.rebuilds_exhausted(&capped));
        assert!(!c.rebuilds_exhausted(&unlimited));
    }
}
