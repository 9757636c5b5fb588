//! Per-task durable state and its crash-atomic file-backed store.
//!
//! Crash-atomic write pattern: serialize, write to a temp sibling, then
//! rename over the final path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{AlertKind, ProbeObservation};

/// Per-kind boolean map, keyed by the kind's stable string name so the
/// on-disk shape is stable across `AlertKind` additions.
pub type KindMap<T> = HashMap<String, T>;

/// The durable record the state machine reads and updates for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Currently evaluated flag per kind.
    pub alarm: KindMap<bool>,
    /// Flag value as of the last notification actually emitted, per kind.
    /// Absent on legacy state files; reconciled to `alarm` on load.
    #[serde(default)]
    pub alarm_notified: KindMap<bool>,
    /// Timestamp of the last *firing* notification per kind.
    #[serde(default)]
    pub last_alert_time: KindMap<DateTime<Utc>>,
    /// Response time of the most recent observation.
    #[serde(default)]
    pub last_resp_time_ms: Option<u64>,
    /// Observations bucketed by date, retained for `history_days`.
    #[serde(default)]
    pub history: HashMap<NaiveDate, Vec<ProbeObservation>>,
    /// Consecutive delay-budget breaches, used only when a task opts into
    /// `legacy_delay_consecutive_n`.
    #[serde(default)]
    pub delay_breach_streak: u32,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            alarm: HashMap::new(),
            alarm_notified: HashMap::new(),
            last_alert_time: HashMap::new(),
            last_resp_time_ms: None,
            history: HashMap::new(),
            delay_breach_streak: 0,
        }
    }
}

impl TaskState {
    /// Reconcile a freshly deserialized state so every kind present in
    /// `alarm` has a corresponding `alarm_notified` entry. Legacy state
    /// files written before the split only carried `alarm`; default
    /// `alarm_notified[k] = alarm[k]` for any kind missing from the map.
    fn reconcile_legacy(&mut self) {
        for kind in AlertKind::ALL {
            let key = kind.as_str().to_owned();
            if !self.alarm_notified.contains_key(&key) {
                let observed = self.alarm.get(&key).copied().unwrap_or(false);
                self.alarm_notified.insert(key, observed);
            }
        }
    }

    pub fn get_alarm(&self, kind: AlertKind) -> bool {
        self.alarm.get(kind.as_str()).copied().unwrap_or(false)
    }

    pub fn get_notified(&self, kind: AlertKind) -> bool {
        self.alarm_notified
            .get(kind.as_str())
            .copied()
            .unwrap_or(false)
    }

    pub fn set_alarm(&mut self, kind: AlertKind, value: bool) {
        self.alarm.insert(kind.as_str().to_owned(), value);
    }

    pub fn set_notified(&mut self, kind: AlertKind, value: bool) {
        self.alarm_notified.insert(kind.as_str().to_owned(), value);
    }

    pub fn last_alert_time(&self, kind: AlertKind) -> Option<DateTime<Utc>> {
        self.last_alert_time.get(kind.as_str()).copied()
    }

    pub fn set_last_alert_time(&mut self, kind: AlertKind, at: DateTime<Utc>) {
        self.last_alert_time.insert(kind.as_str().to_owned(), at);
    }

    /// Append `obs` to today's history bucket and purge buckets older than
    /// `history_days` (today inclusive).
    pub fn record_history(&mut self, obs: ProbeObservation, history_days: i64) {
        let today = obs.timestamp.date_naive();
        self.history.entry(today).or_default().push(obs);
        self.purge_history(today, history_days);
    }

    fn purge_history(&mut self, today: NaiveDate, history_days: i64) {
        self.history
            .retain(|date, _| (today - *date).num_days() <= history_days.max(0));
    }

    /// Most recent observation timestamp across all retained history.
    pub fn latest_observation_at(&self) -> Option<DateTime<Utc>> {
        self.history
            .values()
            .flatten()
            .map(|o| o.timestamp)
            .max()
    }

    /// The most recent observation across all retained history, if any.
    pub fn latest_observation(&self) -> Option<ProbeObservation> {
        self.history
            .values()
            .flatten()
            .max_by_key(|o| o.timestamp)
            .cloned()
    }
}

/// Key-value store of `TaskState` by `task_name`, backed by one file per
/// task under `data/<task_name>.pkl`.
///
/// The `.pkl` extension is kept for continuity with prior deployments of
/// this state layout; the payload itself is `serde_json`, not a Python
/// pickle. Format is implementation-defined and not meant to be consumed by
/// external tools.
pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path_for(&self, task_name: &str) -> PathBuf {
        self.data_dir.join(format!("{task_name}.pkl"))
    }

    /// Load state for `task_name`. Returns `Ok(None)` both when no file
    /// exists and when the file exists but fails to parse — a corrupt
    /// state file is treated as missing (first-run path), not fatal.
    pub async fn load(&self, task_name: &str) -> anyhow::Result<Option<TaskState>> {
        let path = self.path_for(task_name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("failed to read task state file"),
        };

        match serde_json::from_slice::<TaskState>(&bytes) {
            Ok(mut state) => {
                state.reconcile_legacy();
                Ok(Some(state))
            }
            Err(e) => {
                warn!(task = %task_name, error = %e, "task state file unreadable, treating as missing");
                Ok(None)
            }
        }
    }

    /// Persist `state` for `task_name` atomically: write to a temp sibling,
    /// then rename over the final path.
    pub async fn save(&self, task_name: &str, state: &TaskState) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .context("failed to create state data directory")?;

        let path = self.path_for(task_name);
        let json = serde_json::to_vec(state).context("failed to serialize task state")?;

        let tmp_path = path.with_extension("pkl.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .context("failed to write task state temp file")?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .context("failed to rename task state temp file")?;

        debug!(task = %task_name, "task state saved");
        Ok(())
    }

    /// List task names with a persisted state file, derived from filenames
    /// under the data directory (non-recursive).
    pub async fn list_task_names(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.data_dir.clone();
        tokio::task::spawn_blocking(move || list_task_names_sync(&dir))
            .await
            .context("list_task_names join error")?
    }
}

fn list_task_names_sync(dir: &Path) -> anyhow::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).context("failed to read state data directory"),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.context("failed to read directory entry")?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("pkl") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Observation;

    fn obs(ts: DateTime<Utc>) -> ProbeObservation {
        ProbeObservation {
            task_name: "t".into(),
            url: "https://example.test".into(),
            timestamp: ts,
            observation: Observation::HttpResponse {
                status_code: 200,
                resp_time_ms: 5,
                body: String::new(),
                ssl_days_remaining: None,
            },
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = TaskState::default();
        state.set_alarm(AlertKind::StatusCode, true);
        state.set_notified(AlertKind::StatusCode, true);
        store.save("task-a", &state).await.unwrap();

        let loaded = store.load("task-a").await.unwrap().unwrap();
        assert!(loaded.get_alarm(AlertKind::StatusCode));
        assert!(loaded.get_notified(AlertKind::StatusCode));
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.pkl"), b"not json")
            .await
            .unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load("bad").await.unwrap().is_none());
    }

    #[test]
    fn legacy_state_without_notified_defaults_to_alarm() {
        let legacy = serde_json::json!({
            "alarm": {"status_code": true},
            "history": {},
        });
        let mut state: TaskState = serde_json::from_value(legacy).unwrap();
        state.reconcile_legacy();
        assert!(state.get_notified(AlertKind::StatusCode));
        assert!(!state.get_notified(AlertKind::Timeout));
    }

    #[test]
    fn history_purges_buckets_older_than_retention() {
        let mut state = TaskState::default();
        let today = Utc::now();
        let old = today - chrono::Duration::days(10);
        state.record_history(obs(old), 3);
        state.record_history(obs(today), 3);
        assert_eq!(state.history.len(), 1);
        assert!(state.history.contains_key(&today.date_naive()));
    }
}
