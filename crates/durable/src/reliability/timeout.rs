//! Activity timeout enforcement
//!
//! The engine enforces schedule-to-start, schedule-to-close and heartbeat
//! timeouts; the worker enforces start-to-close locally. Both sides use the
//! same pure checks over a monotonic clock so paused-time tests drive them
//! deterministically.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::serde_util::duration_millis;

/// Longest timeout, interval or timer duration the harness accepts
///
/// Every deadline is computed as `Instant + Duration`, so anything larger
/// is rejected at validation time instead of overflowing the clock.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Which activity timeout fired
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    /// Activity was not claimed within schedule_to_start
    ScheduleToStart,

    /// Activity did not complete within schedule_to_close
    ScheduleToClose,

    /// Activity did not complete within start_to_close
    StartToClose,

    /// Worker did not heartbeat within the heartbeat timeout
    Heartbeat,
}

impl fmt::Display for TimeoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ScheduleToStart => "schedule_to_start",
            Self::ScheduleToClose => "schedule_to_close",
            Self::StartToClose => "start_to_close",
            Self::Heartbeat => "heartbeat",
        };
        f.write_str(name)
    }
}

/// An activity attempt exceeded one of its timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("activity {timeout_type} timeout exceeded (limit {limit:?})")]
pub struct TimeoutError {
    /// Timeout that fired
    pub timeout_type: TimeoutType,

    /// Configured limit
    #[serde(with = "duration_millis")]
    pub limit: Duration,
}

impl TimeoutError {
    pub fn new(timeout_type: TimeoutType, limit: Duration) -> Self {
        Self {
            timeout_type,
            limit,
        }
    }
}

/// Timeouts governing one activity attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeouts {
    pub schedule_to_start: Duration,
    pub schedule_to_close: Duration,
    pub start_to_close: Duration,
    pub heartbeat: Option<Duration>,
}

/// Timing of one activity attempt as tracked by the engine
#[derive(Debug, Clone, Copy)]
pub struct AttemptClock {
    /// When the attempt was placed on the task list
    pub scheduled_at: Instant,

    /// When a worker claimed the attempt
    pub started_at: Option<Instant>,

    /// Most recent heartbeat
    pub last_heartbeat_at: Option<Instant>,
}

impl AttemptClock {
    pub fn scheduled(at: Instant) -> Self {
        Self {
            scheduled_at: at,
            started_at: None,
            last_heartbeat_at: None,
        }
    }

    /// First timeout violated at `now`, checked in engine priority order
    pub fn expired(&self, timeouts: &AttemptTimeouts, now: Instant) -> Option<TimeoutError> {
        check_schedule_to_close(self.scheduled_at, timeouts.schedule_to_close, now)
            .or_else(|| {
                check_schedule_to_start(
                    self.scheduled_at,
                    self.started_at,
                    timeouts.schedule_to_start,
                    now,
                )
            })
            .or_else(|| check_start_to_close(self.started_at, timeouts.start_to_close, now))
            .or_else(|| {
                let limit = timeouts.heartbeat?;
                check_heartbeat(self.started_at, self.last_heartbeat_at, limit, now)
            })
    }

    /// Earliest instant at which [`expired`](Self::expired) could fire
    pub fn next_deadline(&self, timeouts: &AttemptTimeouts) -> Instant {
        let mut deadline = self.scheduled_at + timeouts.schedule_to_close;
        match self.started_at {
            None => deadline = deadline.min(self.scheduled_at + timeouts.schedule_to_start),
            Some(started) => {
                deadline = deadline.min(started + timeouts.start_to_close);
                if let Some(heartbeat) = timeouts.heartbeat {
                    let last = self.last_heartbeat_at.unwrap_or(started);
                    deadline = deadline.min(last + heartbeat);
                }
            }
        }
        deadline
    }
}

/// Check whether a pending attempt waited too long to be claimed
pub fn check_schedule_to_start(
    scheduled_at: Instant,
    started_at: Option<Instant>,
    limit: Duration,
    now: Instant,
) -> Option<TimeoutError> {
    if started_at.is_some() {
        return None;
    }
    exceeded(scheduled_at, limit, now)
        .then(|| TimeoutError::new(TimeoutType::ScheduleToStart, limit))
}

/// Check whether an attempt exceeded its schedule-to-close budget
pub fn check_schedule_to_close(
    scheduled_at: Instant,
    limit: Duration,
    now: Instant,
) -> Option<TimeoutError> {
    exceeded(scheduled_at, limit, now)
        .then(|| TimeoutError::new(TimeoutType::ScheduleToClose, limit))
}

/// Check whether a started attempt ran too long
pub fn check_start_to_close(
    started_at: Option<Instant>,
    limit: Duration,
    now: Instant,
) -> Option<TimeoutError> {
    let started = started_at?;
    exceeded(started, limit, now).then(|| TimeoutError::new(TimeoutType::StartToClose, limit))
}

/// Check whether a started attempt stopped heartbeating
pub fn check_heartbeat(
    started_at: Option<Instant>,
    last_heartbeat_at: Option<Instant>,
    limit: Duration,
    now: Instant,
) -> Option<TimeoutError> {
    let since = last_heartbeat_at.or(started_at)?;
    exceeded(since, limit, now).then(|| TimeoutError::new(TimeoutType::Heartbeat, limit))
}

fn exceeded(since: Instant, limit: Duration, now: Instant) -> bool {
    now.saturating_duration_since(since) >= limit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeouts() -> AttemptTimeouts {
        AttemptTimeouts {
            schedule_to_start: Duration::from_secs(10),
            schedule_to_close: Duration::from_secs(60),
            start_to_close: Duration::from_secs(30),
            heartbeat: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn test_schedule_to_start_only_before_claim() {
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(11);

        assert_eq!(
            check_schedule_to_start(t0, None, Duration::from_secs(10), later),
            Some(TimeoutError::new(
                TimeoutType::ScheduleToStart,
                Duration::from_secs(10)
            ))
        );
        assert_eq!(
            check_schedule_to_start(t0, Some(t0), Duration::from_secs(10), later),
            None
        );
    }

    #[test]
    fn test_heartbeat_measured_from_last_beat() {
        let t0 = Instant::now();
        let beat = t0 + Duration::from_secs(4);
        let limit = Duration::from_secs(5);

        assert!(check_heartbeat(Some(t0), Some(beat), limit, t0 + Duration::from_secs(8)).is_none());
        assert!(check_heartbeat(Some(t0), Some(beat), limit, t0 + Duration::from_secs(9)).is_some());
        assert!(check_heartbeat(None, None, limit, t0 + Duration::from_secs(100)).is_none());
    }

    #[test]
    fn test_expired_prefers_schedule_to_close() {
        let t0 = Instant::now();
        let clock = AttemptClock::scheduled(t0);

        let error = clock
            .expired(&timeouts(), t0 + Duration::from_secs(61))
            .unwrap();
        assert_eq!(error.timeout_type, TimeoutType::ScheduleToClose);
    }

    #[test]
    fn test_expired_started_attempt() {
        let t0 = Instant::now();
        let mut clock = AttemptClock::scheduled(t0);
        clock.started_at = Some(t0 + Duration::from_secs(1));

        assert!(clock.expired(&timeouts(), t0 + Duration::from_secs(5)).is_none());
        let error = clock
            .expired(&timeouts(), t0 + Duration::from_secs(6))
            .unwrap();
        assert_eq!(error.timeout_type, TimeoutType::Heartbeat);
    }

    #[test]
    fn test_next_deadline() {
        let t0 = Instant::now();
        let mut clock = AttemptClock::scheduled(t0);
        assert_eq!(clock.next_deadline(&timeouts()), t0 + Duration::from_secs(10));

        clock.started_at = Some(t0 + Duration::from_secs(2));
        clock.last_heartbeat_at = Some(t0 + Duration::from_secs(3));
        assert_eq!(clock.next_deadline(&timeouts()), t0 + Duration::from_secs(8));
    }

    #[test]
    fn test_timeout_error_display() {
        let error = TimeoutError::new(TimeoutType::Heartbeat, Duration::from_secs(10));
        assert_eq!(
            error.to_string(),
            "activity heartbeat timeout exceeded (limit 10s)"
        );
    }
}
