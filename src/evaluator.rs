//! Pure mapping from (Expectation, Observation) to Condition Flags.
//!
//! No I/O. No reference to Task State — edge detection and persistence are
//! the state machine's job, not this one's.

use crate::json_path;
use crate::types::{ConditionFlags, Expectation, Observation};

/// Evaluate one observation against its expectation.
///
/// A transport failure forces every other flag to false; callers that need
/// a status code for messaging should match on `Observation` directly, since
/// this function only returns flags.
pub fn evaluate(expectation: &Expectation, observation: &Observation) -> ConditionFlags {
    match observation {
        Observation::TransportFailure { .. } => ConditionFlags {
            timeout_fail: true,
            ..ConditionFlags::default()
        },
        Observation::HttpResponse {
            status_code,
            resp_time_ms,
            body,
            ssl_days_remaining,
        } => {
            let mut flags = ConditionFlags {
                has_http_response: true,
                ..ConditionFlags::default()
            };

            flags.code_fail = *status_code != expectation.expect_status;

            flags.substring_fail = match &expectation.expect_substring {
                Some(needle) => !body.contains(needle.as_str()),
                None => false,
            };

            flags.delay_fail = match expectation.delay_ms_budget {
                Some(budget) => *resp_time_ms >= budget,
                None => false,
            };

            if expectation.expect_json {
                let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
                flags.json_parseable = parsed.is_some();

                if let (Some(value), Some(path)) = (&parsed, &expectation.json_path) {
                    if let Some(resolved) = json_path::resolve(value, path) {
                        flags.json_path_matched = match &expectation.json_path_value {
                            Some(expected) => &json_path::stringify(resolved) == expected,
                            None => true,
                        };
                    }
                }

                flags.json_fail = if expectation.expect_json
                    && expectation.json_path.is_some()
                    && expectation.json_path_value.is_some()
                {
                    !(flags.json_parseable && flags.json_path_matched)
                } else {
                    false
                };
            }

            flags.ssl_fail = expectation.ssl_warning_days > 0
                && match ssl_days_remaining {
                    Some(days) => *days < expectation.ssl_warning_days,
                    None => false,
                };

            flags
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Method;

    fn expectation() -> Expectation {
        Expectation {
            task_name: "t".into(),
            method: Method::Get,
            url: "https://example.test/".into(),
            expect_status: 200,
            expect_substring: None,
            delay_ms_budget: None,
            expect_json: false,
            json_path: None,
            json_path_value: None,
            ssl_warning_days: 30,
            interval_seconds: 60,
            timeout_seconds: 10,
            headers: Default::default(),
            cookies: Default::default(),
            payload: None,
            retry: Default::default(),
            proxy: None,
            max_response_size: 1024 * 1024,
            legacy_delay_consecutive_n: None,
        }
    }

    #[test]
    fn transport_failure_forces_only_timeout() {
        let obs = Observation::TransportFailure {
            reason: "connect".into(),
        };
        let flags = evaluate(&expectation(), &obs);
        assert!(flags.timeout_fail);
        assert!(!flags.code_fail);
        assert!(!flags.has_http_response);
        assert!(!flags.json_parseable);
        assert!(!flags.json_path_matched);
    }

    #[test]
    fn status_mismatch_fails_code() {
        let obs = Observation::HttpResponse {
            status_code: 503,
            resp_time_ms: 10,
            body: String::new(),
            ssl_days_remaining: None,
        };
        let flags = evaluate(&expectation(), &obs);
        assert!(flags.code_fail);
        assert!(flags.has_http_response);
    }

    #[test]
    fn substring_present_does_not_fail() {
        let mut exp = expectation();
        exp.expect_substring = Some("ok".into());
        let obs = Observation::HttpResponse {
            status_code: 200,
            resp_time_ms: 10,
            body: "system ok".into(),
            ssl_days_remaining: None,
        };
        assert!(!evaluate(&exp, &obs).substring_fail);
    }

    #[test]
    fn delay_budget_breach_fails() {
        let mut exp = expectation();
        exp.delay_ms_budget = Some(300);
        let obs = Observation::HttpResponse {
            status_code: 200,
            resp_time_ms: 500,
            body: String::new(),
            ssl_days_remaining: None,
        };
        assert!(evaluate(&exp, &obs).delay_fail);
    }

    #[test]
    fn json_path_mismatch_fails_json() {
        let mut exp = expectation();
        exp.expect_json = true;
        exp.json_path = Some("$.slideshow.author".into());
        exp.json_path_value = Some("WRONG".into());
        let obs = Observation::HttpResponse {
            status_code: 200,
            resp_time_ms: 10,
            body: r#"{"slideshow":{"author":"Yours Truly"}}"#.into(),
            ssl_days_remaining: None,
        };
        let flags = evaluate(&exp, &obs);
        assert!(flags.json_parseable);
        assert!(!flags.json_path_matched);
        assert!(flags.json_fail);
    }

    #[test]
    fn ssl_warning_days_zero_disables_check() {
        let mut exp = expectation();
        exp.ssl_warning_days = 0;
        let obs = Observation::HttpResponse {
            status_code: 200,
            resp_time_ms: 10,
            body: String::new(),
            ssl_days_remaining: Some(1),
        };
        assert!(!evaluate(&exp, &obs).ssl_fail);
    }

    #[test]
    fn ssl_days_under_threshold_fails() {
        let exp = expectation();
        let obs = Observation::HttpResponse {
            status_code: 200,
            resp_time_ms: 10,
            body: String::new(),
            ssl_days_remaining: Some(5),
        };
        assert!(evaluate(&exp, &obs).ssl_fail);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let exp = expectation();
        let obs = Observation::HttpResponse {
            status_code: 200,
            resp_time_ms: 10,
            body: "hello".into(),
            ssl_days_remaining: Some(100),
        };
        let a = evaluate(&exp, &obs);
        let b = evaluate(&exp, &obs);
        assert_eq!(a.code_fail, b.code_fail);
        assert_eq!(a.ssl_fail, b.ssl_fail);
    }
}
