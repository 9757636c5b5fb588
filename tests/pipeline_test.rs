//! End-to-end test of Config -> Evaluator -> State Machine -> Notifier,
//! without touching the network: the observation is constructed directly.
#![allow(clippy::unwrap_used)]

use chrono::Utc;
use urlcheck::config::{load_alerts_file, load_tasks_file};
use urlcheck::evaluator::evaluate;
use urlcheck::notifier::Notifier;
use urlcheck::state::{StateStore, TaskState};
use urlcheck::state_machine::apply;
use urlcheck::types::{AlertKind, Observation, ProbeObservation};

#[tokio::test]
async fn full_pipeline_fires_then_recovers() {
    let conf_dir = tempfile::tempdir().unwrap();
    let tasks_yaml = conf_dir.path().join("tasks.yaml");
    std::fs::write(
        &tasks_yaml,
        r#"
tasks:
  - name: homepage
    method: get
    url: https://example.test/
    threshold:
      stat_code: 200
"#,
    )
    .unwrap();
    let alerts_yaml = conf_dir.path().join("alerts.yaml");
    std::fs::write(
        &alerts_yaml,
        r#"
alerts:
  - name: status_code
    enabled: true
    channels: []
    recover: true
    suppress_minutes: 0
"#,
    )
    .unwrap();

    let tasks = load_tasks_file(&tasks_yaml).unwrap();
    let alerts = load_alerts_file(&alerts_yaml).unwrap();
    let expectation = &tasks[0];

    let data_dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(data_dir.path());
    let notifier = Notifier::new(tempfile::tempdir().unwrap().path(), reqwest::Client::new());

    let now = Utc::now();
    let failing = ProbeObservation {
        task_name: expectation.task_name.clone(),
        url: expectation.url.clone(),
        timestamp: now,
        observation: Observation::HttpResponse {
            status_code: 500,
            resp_time_ms: 20,
            body: String::new(),
            ssl_days_remaining: None,
        },
    };
    let flags1 = evaluate(expectation, &failing.observation);
    let state = store
        .load(&expectation.task_name)
        .await
        .unwrap()
        .unwrap_or_default();
    let (state, events1) = apply(
        expectation,
        &alerts,
        true,
        3,
        state,
        flags1,
        failing,
        now,
    );
    store.save(&expectation.task_name, &state).await.unwrap();
    assert_eq!(events1.len(), 1);
    assert!(!events1[0].is_recovery);
    for event in &events1 {
        notifier.notify(&global_config(), &[], event).await;
    }

    let later = now + chrono::Duration::seconds(60);
    let recovered = ProbeObservation {
        task_name: expectation.task_name.clone(),
        url: expectation.url.clone(),
        timestamp: later,
        observation: Observation::HttpResponse {
            status_code: 200,
            resp_time_ms: 15,
            body: "ok".into(),
            ssl_days_remaining: None,
        },
    };
    let flags2 = evaluate(expectation, &recovered.observation);
    let state = store.load(&expectation.task_name).await.unwrap().unwrap();
    let (state, events2) = apply(
        expectation,
        &alerts,
        true,
        3,
        state,
        flags2,
        recovered,
        later,
    );
    store.save(&expectation.task_name, &state).await.unwrap();
    assert_eq!(events2.len(), 1);
    assert!(events2[0].is_recovery);
    assert!(!state.get_notified(AlertKind::StatusCode));
}

fn global_config() -> urlcheck::config::GlobalConfig {
    let mut cfg = urlcheck::config::GlobalConfig::default();
    cfg.enable_alerts = true;
    cfg.alert_log_enabled = false;
    cfg
}

#[tokio::test]
async fn legacy_state_file_is_tolerated_across_a_full_load_apply_save_cycle() {
    let data_dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(data_dir.path());

    let legacy = serde_json::json!({
        "alarm": {"status_code": true},
        "history": {},
    });
    tokio::fs::write(
        data_dir.path().join("legacy.pkl"),
        serde_json::to_vec(&legacy).unwrap(),
    )
    .await
    .unwrap();

    let state = store.load("legacy").await.unwrap().unwrap();
    assert!(state.get_notified(AlertKind::StatusCode));

    let fresh = TaskState::default();
    store.save("legacy", &fresh).await.unwrap();
    let reloaded = store.load("legacy").await.unwrap().unwrap();
    assert!(!reloaded.get_alarm(AlertKind::StatusCode));
}
