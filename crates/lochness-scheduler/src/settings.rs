use std::time::Duration;

use lochness_core::{ClaimFilter, Config};

/// Headroom the watchdog leaves past `connector_timeout` so a job that ran
/// to its deadline can still record its outcome.
pub const STUCK_MARGIN: Duration = Duration::from_secs(60);

/// Runtime knobs for the worker pool and watchdog.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub workers: usize,
    pub poll_interval: Duration,
    /// Pause after a storage error before polling again.
    pub error_backoff: Duration,
    pub connector_timeout: Duration,
    pub stuck_after: Duration,
    pub watchdog_interval: Duration,
    pub claim_filter: ClaimFilter,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SchedulerSettings {
    /// `stuck_after` is raised to `connector_timeout + STUCK_MARGIN` when
    /// configured lower, so the watchdog never reaps a job whose connector
    /// is still within its deadline.
    pub fn from_config(cfg: &Config) -> Self {
        let poll_interval = cfg.poll_interval();
        let connector_timeout = cfg.connector_timeout();
        let floor = connector_timeout + STUCK_MARGIN;
        let mut stuck_after = cfg.stuck_after();
        if stuck_after < floor {
            tracing::warn!(
                configured_secs = stuck_after.as_secs(),
                connector_timeout_secs = connector_timeout.as_secs(),
                using_secs = floor.as_secs(),
                "stuck_after_secs must exceed connector_timeout_secs; raising it"
            );
            stuck_after = floor;
        }
        Self {
            workers: cfg.workers(),
            poll_interval,
            error_backoff: (poll_interval * 5).max(Duration::from_millis(500)),
            connector_timeout,
            stuck_after,
            watchdog_interval: cfg.watchdog_interval(),
            claim_filter: cfg.claim_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_config_defaults() {
        let s = SchedulerSettings::default();
        assert_eq!(s.workers, 2);
        assert_eq!(s.poll_interval, Duration::from_millis(200));
        assert_eq!(s.error_backoff, Duration::from_millis(1_000));
        assert_eq!(s.connector_timeout, Duration::from_secs(300));
        assert_eq!(s.claim_filter, ClaimFilter::default());
        assert_eq!(s.stuck_after, Duration::from_secs(3_600));
    }

    #[test]
    fn stuck_after_stays_above_connector_timeout() {
        let mut cfg = Config::default();
        cfg.scheduler.connector_timeout_secs = Some(600);
        cfg.scheduler.stuck_after_secs = Some(120);
        let s = SchedulerSettings::from_config(&cfg);
        assert_eq!(s.connector_timeout, Duration::from_secs(600));
        assert_eq!(s.stuck_after, Duration::from_secs(660));

        cfg.scheduler.stuck_after_secs = Some(7_200);
        let s = SchedulerSettings::from_config(&cfg);
        assert_eq!(s.stuck_after, Duration::from_secs(7_200));
    }
}
