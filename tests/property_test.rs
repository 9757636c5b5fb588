//! Generative checks for properties that are a better fit for randomized
//! input than a handful of literal examples: evaluator determinism and
//! transport-failure flag isolation, and history bucket retention.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;

use chrono::{Duration, Utc};
use proptest::prelude::*;
use urlcheck::evaluator::evaluate;
use urlcheck::state::TaskState;
use urlcheck::types::{Expectation, Method, Observation, ProbeObservation};

fn expectation(expect_status: i32, expect_substring: Option<String>, delay_ms_budget: Option<u64>) -> Expectation {
    Expectation {
        task_name: "t".into(),
        method: Method::Get,
        url: "https://example.test/".into(),
        expect_status,
        expect_substring,
        delay_ms_budget,
        expect_json: false,
        json_path: None,
        json_path_value: None,
        ssl_warning_days: 30,
        interval_seconds: 60,
        timeout_seconds: 10,
        headers: HashMap::new(),
        cookies: HashMap::new(),
        payload: None,
        retry: Default::default(),
        proxy: None,
        max_response_size: 1024 * 1024,
        legacy_delay_consecutive_n: None,
    }
}

fn flags_eq(a: &urlcheck::types::ConditionFlags, b: &urlcheck::types::ConditionFlags) -> bool {
    a.code_fail == b.code_fail
        && a.timeout_fail == b.timeout_fail
        && a.substring_fail == b.substring_fail
        && a.json_fail == b.json_fail
        && a.delay_fail == b.delay_fail
        && a.ssl_fail == b.ssl_fail
        && a.has_http_response == b.has_http_response
        && a.json_parseable == b.json_parseable
        && a.json_path_matched == b.json_path_matched
}

proptest! {
    // R2: evaluating the same observation twice yields identical flags.
    #[test]
    fn evaluation_is_deterministic(
        expect_status in 100i32..600,
        status_code in 100i32..600,
        resp_time_ms in 0u64..5000,
        body in ".{0,32}",
        delay_budget in proptest::option::of(0u64..5000),
    ) {
        let exp = expectation(expect_status, None, delay_budget);
        let obs = Observation::HttpResponse {
            status_code,
            resp_time_ms,
            body,
            ssl_days_remaining: None,
        };
        let a = evaluate(&exp, &obs);
        let b = evaluate(&exp, &obs);
        prop_assert!(flags_eq(&a, &b));
    }

    // P3: a transport failure never sets any non-timeout flag, for any
    // expectation shape.
    #[test]
    fn transport_failure_only_ever_sets_timeout(
        expect_status in 100i32..600,
        expect_substring in proptest::option::of(".{1,8}"),
        delay_budget in proptest::option::of(0u64..5000),
        reason in ".{0,16}",
    ) {
        let exp = expectation(expect_status, expect_substring, delay_budget);
        let obs = Observation::TransportFailure { reason };
        let flags = evaluate(&exp, &obs);
        prop_assert!(flags.timeout_fail);
        prop_assert!(!flags.code_fail);
        prop_assert!(!flags.substring_fail);
        prop_assert!(!flags.json_fail);
        prop_assert!(!flags.delay_fail);
        prop_assert!(!flags.ssl_fail);
        prop_assert!(!flags.has_http_response);
    }

    // P6: after any sequence of history writes, every retained bucket is
    // within `history_days` of the bucket written by the *last* call (each
    // `record_history` purges relative to the observation it was just
    // given, not a global maximum).
    #[test]
    fn history_never_retains_past_its_window(
        day_offsets in proptest::collection::vec(0i64..60, 1..20),
        history_days in 0i64..30,
    ) {
        let mut state = TaskState::default();
        let base = Utc::now();
        let mut last_day = base.date_naive();
        for offset in &day_offsets {
            let ts = base - Duration::days(*offset);
            last_day = ts.date_naive();
            state.record_history(
                ProbeObservation {
                    task_name: "t".into(),
                    url: "https://example.test/".into(),
                    timestamp: ts,
                    observation: Observation::HttpResponse {
                        status_code: 200,
                        resp_time_ms: 1,
                        body: String::new(),
                        ssl_days_remaining: None,
                    },
                },
                history_days,
            );
        }

        for date in state.history.keys() {
            prop_assert!((last_day - *date).num_days() <= history_days.max(0));
        }
    }
}
