//! Metrics Sink: Prometheus-style gauges/counters/histograms.
//!
//! Always updated regardless of alert suppression — the alert-state gauges
//! reflect `alarm`, not `alarm_notified`, so scrapers see truth even when
//! in-process notifications are being held back by a silence window.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::types::{AlertKind, ConditionFlags, Expectation, Observation};

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Install the process-wide Prometheus recorder and return a handle whose
/// `render()` produces the `/metrics` exposition text. Call once at
/// startup; this is the process's metrics registry singleton.
pub fn install_recorder() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;
    Ok(handle)
}

/// Build a standalone recorder/handle pair for tests, without touching the
/// process-wide global recorder `install_recorder` installs.
#[cfg(test)]
pub fn install_recorder_for_test() -> metrics_exporter_prometheus::PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Update every metric for one probe's outcome. Called unconditionally
/// after the evaluator runs, independent of whatever the state machine
/// decides about notification.
#[allow(clippy::cast_precision_loss)]
pub fn record_probe(expectation: &Expectation, observation: &Observation, flags: &ConditionFlags) {
    let task = expectation.task_name.clone();

    match observation {
        Observation::HttpResponse {
            status_code,
            resp_time_ms,
            body,
            ssl_days_remaining,
        } => {
            gauge!("url_check_last_status_code", "task" => task.clone()).set(f64::from(*status_code));
            histogram!("url_check_response_time_ms", "task" => task.clone())
                .record(*resp_time_ms as f64);
            counter!("url_check_success_total", "task" => task.clone(), "status" => status_code.to_string()).increment(1);

            if expectation.expect_substring.is_none() {
                let truncated: String = body.chars().take(500).collect();
                gauge!("url_check_response_body_info", "task" => task.clone(), "body" => truncated)
                    .set(1.0);
            }

            if let Some(days) = ssl_days_remaining {
                gauge!("url_check_ssl_days_remaining", "task" => task.clone()).set(*days as f64);
                counter!("url_check_ssl_verify_total", "task" => task.clone(), "result" => "ok")
                    .increment(1);
            } else if expectation.ssl_warning_days > 0 {
                counter!("url_check_ssl_verify_total", "task" => task.clone(), "result" => "unknown")
                    .increment(1);
            }

            if expectation.expect_json {
                gauge!("url_check_json_parse_valid", "task" => task.clone())
                    .set(bool_to_f64(flags.json_parseable));
                gauge!("url_check_json_path_match", "task" => task.clone())
                    .set(bool_to_f64(flags.json_path_matched));
            }
            if expectation.expect_substring.is_some() {
                gauge!("url_check_content_match", "task" => task.clone())
                    .set(bool_to_f64(!flags.substring_fail));
            }
        }
        Observation::TransportFailure { reason } => {
            counter!("url_check_timeout_total", "task" => task.clone(), "reason" => reason.clone())
                .increment(1);
        }
    }

    for kind in AlertKind::ALL {
        gauge!("url_check_alert_state", "task" => task.clone(), "kind" => kind.as_str())
            .set(bool_to_f64(flags.get(kind)));
    }
}
