//! Config loading: `conf/tasks.yaml`, `conf/alerts.yaml`, and `URL_CHECK_*`
//! environment overrides for the alert-delivery side of the config.
//!
//! Nested structs with per-field `#[serde(default)]`, explicit `Default`
//! impls, and a `validate()` using `anyhow::ensure!`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::types::{AlertKind, Expectation, Method, RetryPolicy};

// ---------------------------------------------------------------------
// conf/tasks.yaml
// ---------------------------------------------------------------------

/// Top-level shape of `conf/tasks.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TasksFile {
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

/// Response-correctness thresholds for one task.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Threshold {
    pub stat_code: Option<i32>,
    pub math_str: Option<String>,
    /// `[budget_ms, consecutive_n]`. `consecutive_n <= 1` means the
    /// canonical single-breach rule; higher values opt into the legacy
    /// N-of-M gating.
    pub delay: Option<(u64, u32)>,
}

/// Retry entry as it appears in YAML (`{count, delay}`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetryEntry {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub delay: u64,
}

/// TLS verification entry (`ssl: {verify, warning_days}`).
#[derive(Debug, Clone, Deserialize)]
pub struct SslEntry {
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default = "default_ssl_warning_days")]
    pub warning_days: i64,
}

impl Default for SslEntry {
    fn default() -> Self {
        Self {
            verify: true,
            warning_days: default_ssl_warning_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ssl_warning_days() -> i64 {
    30
}

fn default_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    10
}

fn default_max_response_size() -> usize {
    1024 * 1024
}

/// One task entry as it appears in `conf/tasks.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub name: String,
    pub method: String,
    pub url: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub threshold: Threshold,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub retry: RetryEntry,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub ssl: SslEntry,
    #[serde(default)]
    pub expect_json: bool,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub json_path_value: Option<String>,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

impl TaskEntry {
    /// Convert the YAML shape into the internal, flattened `Expectation`.
    pub fn to_expectation(&self) -> anyhow::Result<Expectation> {
        let method = match self.method.to_ascii_lowercase().as_str() {
            "get" => Method::Get,
            "post" => Method::Post,
            other => anyhow::bail!("task '{}': unknown method '{other}'", self.name),
        };

        let (delay_ms_budget, legacy_delay_consecutive_n) = match self.threshold.delay {
            Some((ms, n)) if n > 1 => (Some(ms), Some(n)),
            Some((ms, _)) => (Some(ms), None),
            None => (None, None),
        };

        Ok(Expectation {
            task_name: self.name.clone(),
            method,
            url: self.url.clone(),
            expect_status: self.threshold.stat_code.unwrap_or(200),
            expect_substring: self.threshold.math_str.clone(),
            delay_ms_budget,
            expect_json: self.expect_json,
            json_path: self.json_path.clone(),
            json_path_value: self.json_path_value.clone(),
            ssl_warning_days: if self.ssl.verify {
                self.ssl.warning_days
            } else {
                0
            },
            interval_seconds: self.interval,
            timeout_seconds: self.timeout,
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            payload: self.payload.clone(),
            retry: RetryPolicy {
                count: self.retry.count,
                delay_seconds: self.retry.delay,
            },
            proxy: self.proxy.clone(),
            max_response_size: self.max_response_size,
            legacy_delay_consecutive_n,
        })
    }
}

/// Load and validate `conf/tasks.yaml`, returning one `Expectation` per
/// task. A task-level error (unknown method, empty name/url, duplicate
/// name) is reported with that task's name; the caller decides whether to
/// reject the whole file or just that task. At process startup this is
/// fatal; an admin-triggered `add_job` instead rejects only the new task.
pub fn load_tasks_file(path: &Path) -> anyhow::Result<Vec<Expectation>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tasks file {}", path.display()))?;
    let file: TasksFile = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse tasks file {}", path.display()))?;

    let mut seen = std::collections::HashSet::new();
    let mut expectations = Vec::with_capacity(file.tasks.len());
    for entry in &file.tasks {
        ensure!(!entry.name.is_empty(), "task name must not be empty");
        ensure!(!entry.url.is_empty(), "task '{}': url must not be empty", entry.name);
        ensure!(entry.interval >= 1, "task '{}': interval must be >= 1", entry.name);
        ensure!(
            seen.insert(entry.name.clone()),
            "duplicate task name '{}'",
            entry.name
        );
        expectations.push(entry.to_expectation()?);
    }
    Ok(expectations)
}

// ---------------------------------------------------------------------
// conf/alerts.yaml
// ---------------------------------------------------------------------

/// A notification channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Dingding,
    Mail,
}

/// Top-level shape of `conf/alerts.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsFile {
    #[serde(default)]
    pub alerts: Vec<AlertEntry>,
}

/// Per-kind alert delivery policy.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default = "default_true")]
    pub recover: bool,
    #[serde(default = "default_suppress_minutes")]
    pub suppress_minutes: i64,
}

fn default_suppress_minutes() -> i64 {
    120
}

fn parse_alert_kind(name: &str) -> anyhow::Result<AlertKind> {
    Ok(match name {
        "status_code" => AlertKind::StatusCode,
        "timeout" => AlertKind::Timeout,
        "content_match" => AlertKind::ContentMatch,
        "json_path" => AlertKind::JsonPath,
        "delay" => AlertKind::Delay,
        "ssl_expiry" => AlertKind::SslExpiry,
        other => anyhow::bail!("unknown alert kind '{other}'"),
    })
}

/// Resolved per-kind alert policy, ready for the state machine and notifier.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub enabled: bool,
    pub channels: Vec<Channel>,
    pub recover: bool,
    pub suppress_minutes: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Vec::new(),
            recover: true,
            suppress_minutes: default_suppress_minutes(),
        }
    }
}

/// Alert policy for every kind, defaulting kinds absent from the file to
/// `AlertPolicy::default()`.
#[derive(Debug, Clone)]
pub struct AlertsConfig {
    policies: HashMap<AlertKind, AlertPolicy>,
}

impl AlertsConfig {
    pub fn policy(&self, kind: AlertKind) -> &AlertPolicy {
        self.policies.get(&kind).expect("all kinds populated at construction")
    }

    #[cfg(test)]
    pub fn from_policies_for_test(policies: HashMap<AlertKind, AlertPolicy>) -> Self {
        Self { policies }
    }
}

/// Load and validate `conf/alerts.yaml`.
pub fn load_alerts_file(path: &Path) -> anyhow::Result<AlertsConfig> {
    let mut policies: HashMap<AlertKind, AlertPolicy> = AlertKind::ALL
        .into_iter()
        .map(|k| (k, AlertPolicy::default()))
        .collect();

    if !path.exists() {
        return Ok(AlertsConfig { policies });
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read alerts file {}", path.display()))?;
    let file: AlertsFile = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse alerts file {}", path.display()))?;

    for entry in file.alerts {
        let kind = parse_alert_kind(&entry.name)?;
        ensure!(
            entry.suppress_minutes >= 0,
            "alert '{}': suppress_minutes must be >= 0",
            entry.name
        );
        policies.insert(
            kind,
            AlertPolicy {
                enabled: entry.enabled,
                channels: entry.channels,
                recover: entry.recover,
                suppress_minutes: entry.suppress_minutes,
            },
        );
    }

    Ok(AlertsConfig { policies })
}

// ---------------------------------------------------------------------
// Environment-driven global config
// ---------------------------------------------------------------------

/// Alert-delivery and ambient settings, tunable per deployment via
/// `URL_CHECK_*` environment variables. Task definitions never come from
/// here — only from `tasks.yaml`.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub mail_receivers: Vec<String>,
    pub history_days: i64,
    pub enable_alerts: bool,
    pub enable_dingding: bool,
    pub enable_mail: bool,
    pub dingding_webhook: Option<String>,
    pub dingding_access_token: Option<String>,
    pub alert_log_enabled: bool,
    pub alert_log_retention_days: i64,
    pub report_enabled: bool,
    pub report_interval_hours: i64,
    pub report_dingding_enabled: bool,
    pub report_mail_enabled: bool,
    pub port: u16,
    pub log_level: String,
    pub worker_pool_size: usize,
    pub max_instances_per_task: usize,
    pub misfire_grace_time_secs: u64,
    pub smtp_server: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            mail_receivers: Vec::new(),
            history_days: 3,
            enable_alerts: true,
            enable_dingding: false,
            enable_mail: false,
            dingding_webhook: None,
            dingding_access_token: None,
            alert_log_enabled: true,
            alert_log_retention_days: 30,
            report_enabled: true,
            report_interval_hours: 2,
            report_dingding_enabled: false,
            report_mail_enabled: false,
            port: 4000,
            log_level: "info".to_owned(),
            worker_pool_size: 5,
            max_instances_per_task: 3,
            misfire_grace_time_secs: 60,
            smtp_server: None,
            smtp_port: 465,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
        }
    }
}

impl GlobalConfig {
    /// Build the config from defaults overlaid with `URL_CHECK_*`
    /// (and a handful of bare SMTP_*) environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        let env = |key: &str| std::env::var(format!("URL_CHECK_{key}")).ok();

        if let Some(v) = env("MAIL_RECEIVERS") {
            cfg.mail_receivers = v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect();
        }
        if let Some(v) = env("HISTORY_DATA_DAYS").and_then(|s| s.parse().ok()) {
            cfg.history_days = v;
        }
        if let Some(v) = env("ENABLE_ALERTS").and_then(|s| parse_bool(&s)) {
            cfg.enable_alerts = v;
        }
        if let Some(v) = env("ENABLE_DINGDING").and_then(|s| parse_bool(&s)) {
            cfg.enable_dingding = v;
        }
        if let Some(v) = env("ENABLE_MAIL").and_then(|s| parse_bool(&s)) {
            cfg.enable_mail = v;
        }
        cfg.dingding_webhook = env("DINGDING_WEBHOOK");
        cfg.dingding_access_token = env("DINGDING_ACCESS_TOKEN");
        if let Some(v) = env("ALERT_LOG_ENABLED").and_then(|s| parse_bool(&s)) {
            cfg.alert_log_enabled = v;
        }
        if let Some(v) = env("ALERT_LOG_RETENTION_DAYS").and_then(|s| s.parse().ok()) {
            cfg.alert_log_retention_days = v;
        }
        if let Some(v) = env("REPORT_ENABLED").and_then(|s| parse_bool(&s)) {
            cfg.report_enabled = v;
        }
        if let Some(v) = env("REPORT_INTERVAL_HOURS").and_then(|s| s.parse().ok()) {
            cfg.report_interval_hours = v;
        }
        if let Some(v) = env("REPORT_DINGDING_ENABLED").and_then(|s| parse_bool(&s)) {
            cfg.report_dingding_enabled = v;
        }
        if let Some(v) = env("REPORT_MAIL_ENABLED").and_then(|s| parse_bool(&s)) {
            cfg.report_mail_enabled = v;
        }
        if let Some(v) = env("PORT").and_then(|s| s.parse().ok()) {
            cfg.port = v;
        }
        if let Some(v) = std::env::var("LOG_LEVEL").ok() {
            cfg.log_level = v;
        }
        if let Some(v) = env("WORKER_POOL_SIZE").and_then(|s| s.parse().ok()) {
            cfg.worker_pool_size = v;
        }
        cfg.smtp_server = std::env::var("SMTP_SERVER").ok();
        if let Some(v) = std::env::var("SMTP_PORT").ok().and_then(|s| s.parse().ok()) {
            cfg.smtp_port = v;
        }
        cfg.smtp_username = std::env::var("SMTP_USERNAME").ok();
        cfg.smtp_password = std::env::var("SMTP_PASSWORD").ok();
        cfg.smtp_from = std::env::var("SMTP_FROM").ok();

        cfg
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.history_days >= 0, "history_days must be >= 0");
        ensure!(self.alert_log_retention_days >= 0, "alert_log_retention_days must be >= 0");
        ensure!(self.report_interval_hours >= 1, "report_interval_hours must be >= 1");
        ensure!(self.worker_pool_size >= 1, "worker_pool_size must be >= 1");
        ensure!(self.max_instances_per_task >= 1, "max_instances_per_task must be >= 1");
        ensure!(self.port > 0, "port must be nonzero");
        if self.enable_mail {
            ensure!(self.smtp_server.is_some(), "enable_mail requires SMTP_SERVER");
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
