//! Core data model: Task Expectation, Probe Observation, Condition Flags.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP method a task probes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
}

/// Retry policy for transient transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub count: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub delay_seconds: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 0,
            delay_seconds: default_retry_delay_seconds(),
        }
    }
}

fn default_retry_delay_seconds() -> u64 {
    1
}

/// Immutable, per-configured-endpoint expectation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expectation {
    pub task_name: String,
    pub method: Method,
    pub url: String,

    #[serde(default = "default_expect_status")]
    pub expect_status: i32,
    #[serde(default)]
    pub expect_substring: Option<String>,
    #[serde(default)]
    pub delay_ms_budget: Option<u64>,
    #[serde(default)]
    pub expect_json: bool,
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub json_path_value: Option<String>,
    #[serde(default = "default_ssl_warning_days")]
    pub ssl_warning_days: i64,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub payload: Option<String>,

    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,

    /// Opt-in legacy behavior: require N consecutive delay breaches before
    /// `delay_fail` fires, instead of the canonical single-breach rule.
    #[serde(default)]
    pub legacy_delay_consecutive_n: Option<u32>,
}

fn default_expect_status() -> i32 {
    200
}

fn default_ssl_warning_days() -> i64 {
    30
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_max_response_size() -> usize {
    1024 * 1024
}

/// Outcome of a single completed HTTP attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Observation {
    /// An HTTP response was actually received.
    HttpResponse {
        status_code: i32,
        resp_time_ms: u64,
        body: String,
        ssl_days_remaining: Option<i64>,
    },
    /// No HTTP response: timeout, DNS, TLS handshake, or connect failure.
    TransportFailure { reason: String },
}

impl Observation {
    pub fn has_http_response(&self) -> bool {
        matches!(self, Observation::HttpResponse { .. })
    }
}

/// One probe's timestamped outcome for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeObservation {
    pub task_name: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub observation: Observation,
}

/// Closed set of alert kinds the state machine tracks independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StatusCode,
    Timeout,
    ContentMatch,
    JsonPath,
    Delay,
    SslExpiry,
}

impl AlertKind {
    /// All kinds, in a stable order used for iteration and reporting.
    pub const ALL: [AlertKind; 6] = [
        AlertKind::StatusCode,
        AlertKind::Timeout,
        AlertKind::ContentMatch,
        AlertKind::JsonPath,
        AlertKind::Delay,
        AlertKind::SslExpiry,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::StatusCode => "status_code",
            AlertKind::Timeout => "timeout",
            AlertKind::ContentMatch => "content_match",
            AlertKind::JsonPath => "json_path",
            AlertKind::Delay => "delay",
            AlertKind::SslExpiry => "ssl_expiry",
        }
    }

    /// Human-readable, bilingual alert label.
    pub fn display_name(self) -> &'static str {
        match self {
            AlertKind::StatusCode => "状态码异常",
            AlertKind::Timeout => "请求超时",
            AlertKind::ContentMatch => "关键字不匹配",
            AlertKind::JsonPath => "JSON验证失败",
            AlertKind::Delay => "响应时间过长",
            AlertKind::SslExpiry => "SSL证书过期",
        }
    }
}

/// Derived boolean condition flags plus provenance bits, pure output of the
/// evaluator for one (Expectation, Observation) pair.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConditionFlags {
    pub code_fail: bool,
    pub timeout_fail: bool,
    pub substring_fail: bool,
    pub json_fail: bool,
    pub delay_fail: bool,
    pub ssl_fail: bool,

    pub has_http_response: bool,
    pub json_parseable: bool,
    pub json_path_matched: bool,
}

impl ConditionFlags {
    /// The flag for a given alert kind.
    pub fn get(&self, kind: AlertKind) -> bool {
        match kind {
            AlertKind::StatusCode => self.code_fail,
            AlertKind::Timeout => self.timeout_fail,
            AlertKind::ContentMatch => self.substring_fail,
            AlertKind::JsonPath => self.json_fail,
            AlertKind::Delay => self.delay_fail,
            AlertKind::SslExpiry => self.ssl_fail,
        }
    }
}
