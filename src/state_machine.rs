//! Edge-triggered alert firing/recovery decisions.
//!
//! Consumes Condition Flags plus the prior Task State and returns the
//! updated state together with the Alert Events to hand to the Notifier.
//! `alarm` tracks the *observed* condition; `alarm_notified` tracks what
//! the outside world has actually been told. Edge detection is always
//! against `alarm_notified` — mixing the two is the classic source of
//! false-recovery bugs in this kind of state machine.

use chrono::{DateTime, Duration, Utc};

use crate::config::AlertsConfig;
use crate::state::TaskState;
use crate::types::{AlertKind, ConditionFlags, Expectation, Observation, ProbeObservation};

/// A decision the state machine wants delivered to the Notifier.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub task_name: String,
    pub is_recovery: bool,
    pub observation: ProbeObservation,
    pub previous_observation: Option<ProbeObservation>,
    pub expectation: Expectation,
}

/// Whether the current observation validates a recovery for `kind`.
///
/// Prevents a transport failure (or an unparsed JSON body) from
/// masquerading as a clean recovery — the historical bug this whole
/// subsystem exists to avoid.
fn recovery_valid(kind: AlertKind, flags: &ConditionFlags) -> bool {
    match kind {
        AlertKind::StatusCode | AlertKind::ContentMatch => flags.has_http_response,
        AlertKind::JsonPath => {
            flags.has_http_response && flags.json_parseable && flags.json_path_matched
        }
        AlertKind::Timeout | AlertKind::Delay | AlertKind::SslExpiry => true,
    }
}

/// Apply one probe's evaluation to prior state, returning the updated
/// state and any Alert Events to notify.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    expectation: &Expectation,
    alerts: &AlertsConfig,
    alerts_globally_enabled: bool,
    history_days: i64,
    mut state: TaskState,
    flags: ConditionFlags,
    observation: ProbeObservation,
    now: DateTime<Utc>,
) -> (TaskState, Vec<AlertEvent>) {
    let previous_observation = state.latest_observation();
    let mut events = Vec::new();

    for kind in AlertKind::ALL {
        let mut current = flags.get(kind);

        if kind == AlertKind::Delay {
            if flags.delay_fail {
                state.delay_breach_streak = state.delay_breach_streak.saturating_add(1);
            } else {
                state.delay_breach_streak = 0;
            }
            if let Some(n) = expectation.legacy_delay_consecutive_n {
                current = state.delay_breach_streak >= n;
            }
        }

        let notified = state.get_notified(kind);
        let policy = alerts.policy(kind);

        if !notified && current {
            // Firing candidate.
            if alerts_globally_enabled && policy.enabled {
                let silenced = policy.suppress_minutes > 0
                    && state
                        .last_alert_time(kind)
                        .is_some_and(|t| now - t < Duration::minutes(policy.suppress_minutes));
                if !silenced {
                    state.set_notified(kind, true);
                    state.set_last_alert_time(kind, now);
                    events.push(AlertEvent {
                        kind,
                        task_name: expectation.task_name.clone(),
                        is_recovery: false,
                        observation: observation.clone(),
                        previous_observation: previous_observation.clone(),
                        expectation: expectation.clone(),
                    });
                }
            }
        } else if notified && !current {
            // Recovery candidate.
            if policy.recover && recovery_valid(kind, &flags) {
                let reclassify_as_firing = kind == AlertKind::Delay
                    && matches!(
                        &observation.observation,
                        Observation::HttpResponse { resp_time_ms, .. }
                            if expectation
                                .delay_ms_budget
                                .is_some_and(|budget| *resp_time_ms > budget)
                    );

                if reclassify_as_firing {
                    let silenced = policy.suppress_minutes > 0
                        && state.last_alert_time(kind).is_some_and(|t| {
                            now - t < Duration::minutes(policy.suppress_minutes)
                        });
                    if !silenced {
                        state.set_last_alert_time(kind, now);
                        events.push(AlertEvent {
                            kind,
                            task_name: expectation.task_name.clone(),
                            is_recovery: false,
                            observation: observation.clone(),
                            previous_observation: previous_observation.clone(),
                            expectation: expectation.clone(),
                        });
                    }
                    // notified stays true either way: still alarming.
                } else {
                    state.set_notified(kind, false);
                    events.push(AlertEvent {
                        kind,
                        task_name: expectation.task_name.clone(),
                        is_recovery: true,
                        observation: observation.clone(),
                        previous_observation: previous_observation.clone(),
                        expectation: expectation.clone(),
                    });
                }
            }
        }

        state.set_alarm(kind, current);
    }

    if let Observation::HttpResponse { resp_time_ms, .. } = &observation.observation {
        state.last_resp_time_ms = Some(*resp_time_ms);
    }

    state.record_history(observation, history_days);

    (state, events)
}
