//! Alert state machine.
//!
//! The decider is a pure function over a [`AlertState`] snapshot: it takes
//! the persisted state plus one check outcome and returns the next state and
//! an [`AlertDecision`]. It never sends anything and never reads the clock.
//! Delivery bookkeeping (`last_failure_alert_sent_at`, clearing
//! `pending_recovery_alert`) is applied separately with [`apply_delivery`]
//! once the caller knows whether the notifier accepted the alert.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted per-monitor alerting memory.
///
/// Invariant: `failure_incident_opened_at.is_some() == (consecutive_failures >= 1)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    pub consecutive_failures: u32,
    pub failure_incident_opened_at: Option<DateTime<Utc>>,
    pub last_failure_alert_sent_at: Option<DateTime<Utc>>,
    pub last_failure_alert_error: Option<String>,
    pub pending_recovery_alert: bool,
    pub last_recovery_alert_sent_at: Option<DateTime<Utc>>,
    pub last_recovery_alert_error: Option<String>,
    /// When the most recent alerted incident ended.
    pub last_recovered_at: Option<DateTime<Utc>>,
    /// Bumped every time a new incident opens.
    pub incident_id: u64,
    /// Storage compare-and-swap counter. Owned by the store.
    pub revision: u64,
}

impl AlertState {
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }

    pub fn is_alerted(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertDecision {
    None,
    Failure,
    FailureReminder,
    Recovered,
}

impl AlertDecision {
    pub fn is_none(self) -> bool {
        self == AlertDecision::None
    }

    pub fn is_failure(self) -> bool {
        matches!(self, AlertDecision::Failure | AlertDecision::FailureReminder)
    }

    pub fn notification_type(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Failure => "failure",
            Self::FailureReminder => "failure_reminder",
            Self::Recovered => "recovered",
        }
    }
}

impl fmt::Display for AlertDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Failure => write!(f, "FAILURE"),
            Self::FailureReminder => write!(f, "REMINDER"),
            Self::Recovered => write!(f, "RECOVERED"),
        }
    }
}

/// Threshold and reminder cadence for one monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub threshold: u32,
    pub repeat_every: Duration,
}

impl AlertPolicy {
    pub fn new(threshold: u32, repeat_every: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            repeat_every,
        }
    }

    pub fn decide(&self, state: &AlertState, passed: bool, now: DateTime<Utc>) -> (AlertState, AlertDecision) {
        if passed {
            on_success(state, self.threshold, now)
        } else {
            on_failure(state, self.threshold, now, self.repeat_every)
        }
    }
}

pub fn on_failure(
    state: &AlertState,
    threshold: u32,
    now: DateTime<Utc>,
    repeat_every: Duration,
) -> (AlertState, AlertDecision) {
    let threshold = threshold.max(1);
    let mut next = state.clone();

    if next.consecutive_failures == 0 {
        next.failure_incident_opened_at = Some(now);
        next.incident_id += 1;
    }
    next.consecutive_failures = next.consecutive_failures.saturating_add(1);

    let decision = if next.consecutive_failures < threshold {
        AlertDecision::None
    } else if next.consecutive_failures == threshold {
        // A recovery that never got delivered belongs to an incident that is
        // now superseded.
        next.pending_recovery_alert = false;
        AlertDecision::Failure
    } else {
        match next.last_failure_alert_sent_at {
            None => AlertDecision::FailureReminder,
            Some(sent) if elapsed_at_least(sent, now, repeat_every) => AlertDecision::FailureReminder,
            Some(_) => AlertDecision::None,
        }
    };

    (next, decision)
}

pub fn on_success(state: &AlertState, threshold: u32, now: DateTime<Utc>) -> (AlertState, AlertDecision) {
    let threshold = threshold.max(1);
    let mut next = state.clone();

    if next.consecutive_failures >= threshold {
        next.pending_recovery_alert = true;
        next.last_failure_alert_sent_at = None;
        next.last_recovered_at = Some(now);
    }
    next.consecutive_failures = 0;
    next.failure_incident_opened_at = None;

    let decision = if next.pending_recovery_alert {
        AlertDecision::Recovered
    } else {
        AlertDecision::None
    };

    (next, decision)
}

/// Folds a notifier outcome into the state produced by the decider.
pub fn apply_delivery(
    mut state: AlertState,
    decision: AlertDecision,
    delivery: &Result<(), String>,
    now: DateTime<Utc>,
) -> AlertState {
    match (decision, delivery) {
        (AlertDecision::None, _) => {}
        (AlertDecision::Failure | AlertDecision::FailureReminder, Ok(())) => {
            state.last_failure_alert_sent_at = Some(now);
            state.last_failure_alert_error = None;
        }
        (AlertDecision::Failure | AlertDecision::FailureReminder, Err(e)) => {
            state.last_failure_alert_error = Some(e.clone());
        }
        (AlertDecision::Recovered, Ok(())) => {
            state.pending_recovery_alert = false;
            state.last_recovery_alert_sent_at = Some(now);
            state.last_recovery_alert_error = None;
        }
        (AlertDecision::Recovered, Err(e)) => {
            state.last_recovery_alert_error = Some(e.clone());
        }
    }
    state
}

fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed >= window,
        // `now` earlier than `since`: clock went backwards, hold off.
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn assert_invariant(state: &AlertState) {
        assert_eq!(
            state.failure_incident_opened_at.is_some(),
            state.consecutive_failures >= 1,
            "{:?}",
            state
        );
    }

    #[test]
    fn first_t_failures_alert_exactly_once() {
        for threshold in 1..=20u32 {
            let mut state = AlertState::default();
            let mut decisions = Vec::new();
            for i in 0..threshold {
                let (next, d) = on_failure(&state, threshold, t0() + ChronoDuration::minutes(i as i64), DAY);
                assert_invariant(&next);
                decisions.push(d);
                state = next;
            }
            let failures = decisions.iter().filter(|d| **d == AlertDecision::Failure).count();
            assert_eq!(failures, 1, "threshold {}", threshold);
            assert_eq!(*decisions.last().unwrap(), AlertDecision::Failure);
            assert!(decisions[..decisions.len() - 1].iter().all(|d| d.is_none()));
        }
    }

    #[test]
    fn threshold_two_sequence() {
        let s0 = AlertState::default();
        let (s1, d1) = on_failure(&s0, 2, t0(), DAY);
        assert_eq!(d1, AlertDecision::None);
        assert_eq!(s1.consecutive_failures, 1);
        assert_eq!(s1.failure_incident_opened_at, Some(t0()));
        assert_eq!(s1.incident_id, 1);

        let (s2, d2) = on_failure(&s1, 2, t0() + ChronoDuration::minutes(5), DAY);
        assert_eq!(d2, AlertDecision::Failure);
        assert_eq!(s2.consecutive_failures, 2);
        assert_eq!(s2.failure_incident_opened_at, Some(t0()));
        assert_eq!(s2.incident_id, 1);
        // The decider never marks delivery itself.
        assert_eq!(s2.last_failure_alert_sent_at, None);
    }

    #[test]
    fn threshold_one_alerts_immediately() {
        let (s, d) = on_failure(&AlertState::default(), 1, t0(), DAY);
        assert_eq!(d, AlertDecision::Failure);
        assert_eq!(s.consecutive_failures, 1);
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let (_, d) = on_failure(&AlertState::default(), 0, t0(), DAY);
        assert_eq!(d, AlertDecision::Failure);
    }

    #[test]
    fn reminder_respects_window() {
        let alerted = AlertState {
            consecutive_failures: 3,
            failure_incident_opened_at: Some(t0() - ChronoDuration::hours(1)),
            last_failure_alert_sent_at: Some(t0()),
            incident_id: 1,
            ..AlertState::default()
        };

        let early = t0() + ChronoDuration::hours(23) + ChronoDuration::minutes(59);
        let (s, d) = on_failure(&alerted, 3, early, DAY);
        assert_eq!(d, AlertDecision::None);
        assert_eq!(s.consecutive_failures, 4);

        let late = t0() + ChronoDuration::hours(24) + ChronoDuration::minutes(1);
        let (_, d) = on_failure(&s, 3, late, DAY);
        assert_eq!(d, AlertDecision::FailureReminder);
    }

    #[test]
    fn reminder_fires_at_exact_window() {
        let alerted = AlertState {
            consecutive_failures: 2,
            failure_incident_opened_at: Some(t0()),
            last_failure_alert_sent_at: Some(t0()),
            ..AlertState::default()
        };
        let (_, d) = on_failure(&alerted, 2, t0() + ChronoDuration::hours(24), DAY);
        assert_eq!(d, AlertDecision::FailureReminder);
    }

    #[test]
    fn undelivered_initial_alert_is_retried_as_reminder() {
        let (s1, d1) = on_failure(&AlertState::default(), 1, t0(), DAY);
        assert_eq!(d1, AlertDecision::Failure);
        let s1 = apply_delivery(s1, d1, &Err("smtp down".into()), t0());
        assert_eq!(s1.last_failure_alert_sent_at, None);
        assert_eq!(s1.last_failure_alert_error.as_deref(), Some("smtp down"));

        let (_, d2) = on_failure(&s1, 1, t0() + ChronoDuration::minutes(1), DAY);
        assert_eq!(d2, AlertDecision::FailureReminder);
    }

    #[test]
    fn clock_skew_suppresses_reminder() {
        let alerted = AlertState {
            consecutive_failures: 2,
            failure_incident_opened_at: Some(t0()),
            last_failure_alert_sent_at: Some(t0()),
            ..AlertState::default()
        };
        let (_, d) = on_failure(&alerted, 1, t0() - ChronoDuration::hours(1), Duration::ZERO);
        assert_eq!(d, AlertDecision::None);
    }

    #[test]
    fn success_after_alert_recovers_and_resets() {
        let alerted = AlertState {
            consecutive_failures: 5,
            failure_incident_opened_at: Some(t0()),
            last_failure_alert_sent_at: Some(t0()),
            incident_id: 7,
            ..AlertState::default()
        };
        let (s, d) = on_success(&alerted, 3, t0());
        assert_eq!(d, AlertDecision::Recovered);
        assert!(s.pending_recovery_alert);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.failure_incident_opened_at, None);
        assert_eq!(s.last_failure_alert_sent_at, None);
        assert_eq!(s.incident_id, 7);
        assert_eq!(s.last_recovered_at, Some(t0()));
        assert_invariant(&s);
    }

    #[test]
    fn success_below_threshold_resets_quietly() {
        let failing = AlertState {
            consecutive_failures: 2,
            failure_incident_opened_at: Some(t0()),
            ..AlertState::default()
        };
        let (s, d) = on_success(&failing, 3, t0());
        assert_eq!(d, AlertDecision::None);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.failure_incident_opened_at, None);
        assert!(!s.pending_recovery_alert);
        assert_eq!(s.last_failure_alert_sent_at, None);
        assert_eq!(s.last_recovered_at, None);
    }

    #[test]
    fn healthy_success_is_a_no_op() {
        let state = AlertState {
            incident_id: 3,
            revision: 9,
            last_recovery_alert_sent_at: Some(t0()),
            ..AlertState::default()
        };
        let (s, d) = on_success(&state, 2, t0());
        assert_eq!(d, AlertDecision::None);
        assert_eq!(s, state);
    }

    #[test]
    fn pending_recovery_is_resignalled_until_confirmed() {
        let alerted = AlertState {
            consecutive_failures: 1,
            failure_incident_opened_at: Some(t0()),
            last_failure_alert_sent_at: Some(t0()),
            ..AlertState::default()
        };
        let (s1, d1) = on_success(&alerted, 1, t0());
        assert_eq!(d1, AlertDecision::Recovered);
        let s1 = apply_delivery(s1, d1, &Err("timeout".into()), t0());
        assert!(s1.pending_recovery_alert);
        assert_eq!(s1.last_recovery_alert_error.as_deref(), Some("timeout"));

        let (s2, d2) = on_success(&s1, 1, t0());
        assert_eq!(d2, AlertDecision::Recovered);
        let later = t0() + ChronoDuration::minutes(1);
        let s2 = apply_delivery(s2, d2, &Ok(()), later);
        assert!(!s2.pending_recovery_alert);
        assert_eq!(s2.last_recovery_alert_sent_at, Some(later));
        assert_eq!(s2.last_recovery_alert_error, None);

        let (_, d3) = on_success(&s2, 1, t0());
        assert_eq!(d3, AlertDecision::None);
    }

    #[test]
    fn new_incident_supersedes_pending_recovery() {
        let pending = AlertState {
            pending_recovery_alert: true,
            incident_id: 1,
            ..AlertState::default()
        };
        let (s, d) = on_failure(&pending, 1, t0(), DAY);
        assert_eq!(d, AlertDecision::Failure);
        assert!(!s.pending_recovery_alert);
        assert_eq!(s.incident_id, 2);
    }

    #[test]
    fn confirmed_failure_delivery_sets_timestamp() {
        let (s, d) = on_failure(&AlertState::default(), 1, t0(), DAY);
        let s = apply_delivery(s, d, &Ok(()), t0());
        assert_eq!(s.last_failure_alert_sent_at, Some(t0()));
        assert_eq!(s.last_failure_alert_error, None);
    }

    #[test]
    fn policy_dispatches_on_outcome() {
        let policy = AlertPolicy::new(1, DAY);
        let (s, d) = policy.decide(&AlertState::default(), false, t0());
        assert_eq!(d, AlertDecision::Failure);
        let (_, d) = policy.decide(&s, true, t0());
        assert_eq!(d, AlertDecision::Recovered);
    }

    #[test]
    fn decision_labels() {
        assert_eq!(AlertDecision::FailureReminder.notification_type(), "failure_reminder");
        assert_eq!(format!("{}", AlertDecision::Recovered), "RECOVERED");
        assert!(AlertDecision::FailureReminder.is_failure());
        assert!(!AlertDecision::Recovered.is_failure());
    }
}
