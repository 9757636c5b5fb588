//! Report Generator: periodic aggregation across all Task State, read-only
//! with respect to the state store.

use chrono::Utc;

use crate::state::StateStore;
use crate::types::{AlertKind, Expectation};

/// One task's classification bucket membership. A task can land in more
/// than one bucket by design (e.g. currently-alerting *and* stale).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskClassification {
    pub task_name: String,
    pub no_data: bool,
    pub normal: bool,
    pub currently_alerting: Vec<AlertKind>,
    pub notified_alerting: Vec<AlertKind>,
    pub stale: bool,
    pub unreadable: bool,
}

/// One aggregated report across all configured tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub classifications: Vec<TaskClassification>,
}

impl Report {
    pub fn summary_message(&self) -> String {
        let mut lines = Vec::new();
        for c in &self.classifications {
            if c.no_data {
                lines.push(format!("{}: 无数据", c.task_name));
            } else if c.unreadable {
                lines.push(format!("{}: 状态不可读", c.task_name));
            } else {
                let mut parts = Vec::new();
                if c.normal {
                    parts.push("正常".to_owned());
                }
                if !c.currently_alerting.is_empty() {
                    parts.push(format!(
                        "当前告警[{}]",
                        c.currently_alerting
                            .iter()
                            .map(|k| k.as_str())
                            .collect::<Vec<_>>()
                            .join(",")
                    ));
                }
                if !c.notified_alerting.is_empty() {
                    parts.push(format!(
                        "已通知告警[{}]",
                        c.notified_alerting
                            .iter()
                            .map(|k| k.as_str())
                            .collect::<Vec<_>>()
                            .join(",")
                    ));
                }
                if c.stale {
                    parts.push("数据过期".to_owned());
                }
                lines.push(format!("{}: {}", c.task_name, parts.join(" | ")));
            }
        }
        lines.join("\n")
    }
}

/// Generate a report over `tasks`, reading each task's latest state from
/// `store`. Never mutates the store.
pub async fn generate(store: &StateStore, tasks: &[Expectation]) -> Report {
    let mut classifications = Vec::with_capacity(tasks.len());

    for task in tasks {
        let classification = classify_task(store, task).await;
        classifications.push(classification);
    }

    Report { classifications }
}

async fn classify_task(store: &StateStore, task: &Expectation) -> TaskClassification {
    let state = match store.load(&task.task_name).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            return TaskClassification {
                task_name: task.task_name.clone(),
                no_data: true,
                ..Default::default()
            }
        }
        Err(_) => {
            return TaskClassification {
                task_name: task.task_name.clone(),
                unreadable: true,
                ..Default::default()
            }
        }
    };

    let currently_alerting: Vec<AlertKind> = AlertKind::ALL
        .into_iter()
        .filter(|k| state.get_alarm(*k))
        .collect();
    let notified_alerting: Vec<AlertKind> = AlertKind::ALL
        .into_iter()
        .filter(|k| state.get_notified(*k))
        .collect();

    let stale_threshold_secs = (task.interval_seconds.saturating_mul(3)).max(180);
    let stale = match state.latest_observation_at() {
        Some(ts) => {
            let elapsed = (Utc::now() - ts).num_seconds().max(0);
            u64::try_from(elapsed).unwrap_or(u64::MAX) > stale_threshold_secs
        }
        None => true,
    };

    TaskClassification {
        task_name: task.task_name.clone(),
        no_data: false,
        normal: currently_alerting.is_empty(),
        currently_alerting,
        notified_alerting,
        stale,
        unreadable: false,
    }
}
