//! Alert event dispatch: chat webhook, SMTP email, JSON alert log.
//!
//! Tries every enabled channel independently, logging and swallowing
//! per-channel failures so one channel's outage never blocks another.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{Channel, GlobalConfig};
use crate::state_machine::AlertEvent;
use crate::types::Observation;

/// One line written to `logs/alert_<YYYY-MM-DD>.log`.
#[derive(Debug, Serialize)]
struct LogLine<'a> {
    timestamp: DateTime<Utc>,
    level: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    task_name: &'a str,
    alert_type: &'a str,
    message: &'a str,
}

/// Builds human-readable subject/body for an alert event and dispatches it
/// to every channel enabled for that kind.
pub struct Notifier {
    logs_dir: PathBuf,
    http: reqwest::Client,
    last_purge: Mutex<Option<DateTime<Utc>>>,
}

impl Notifier {
    pub fn new(logs_dir: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            http,
            last_purge: Mutex::new(None),
        }
    }

    /// Dispatch one Alert Event to every channel configured for its kind.
    pub async fn notify(&self, global: &GlobalConfig, channels: &[Channel], event: &AlertEvent) {
        let (subject, body) = build_message(event);

        if global.enable_alerts && global.alert_log_enabled {
            if let Err(e) = self.append_json_log(event, &body).await {
                warn!(error = %e, "failed to append alert log line");
            }
            self.purge_old_logs(global.alert_log_retention_days).await;
        }

        for channel in channels {
            match channel {
                Channel::Dingding => {
                    if global.enable_dingding {
                        if let Err(e) = self.send_dingding(global, &subject, &body).await {
                            warn!(error = %e, "dingding webhook send failed");
                        }
                    }
                }
                Channel::Mail => {
                    if global.enable_mail {
                        if let Err(e) = self
                            .send_mail_to(global, &global.mail_receivers, &subject, &body)
                            .await
                        {
                            warn!(error = %e, "smtp send failed");
                        }
                    }
                }
            }
        }
    }

    /// Send an ad-hoc email outside the alert pipeline, for the admin
    /// surface's `/sender/mail` endpoint.
    pub async fn send_ad_hoc_mail(
        &self,
        global: &GlobalConfig,
        recipients: &[String],
        subject: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        self.send_mail_to(global, recipients, subject, content).await
    }

    async fn send_dingding(
        &self,
        global: &GlobalConfig,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let webhook = global
            .dingding_webhook
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("dingding webhook not configured"))?;
        let token = global.dingding_access_token.as_deref().unwrap_or_default();

        let payload = serde_json::json!({
            "msgtype": "markdown",
            "markdown": {
                "title": subject,
                "text": format!("## {subject}\n### {body}"),
            }
        });

        let resp = self
            .http
            .post(format!("{webhook}access_token={token}"))
            .timeout(std::time::Duration::from_secs(10))
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("dingding webhook returned {}", resp.status());
        }
        info!("dingding alert sent");
        Ok(())
    }

    async fn send_mail_to(
        &self,
        global: &GlobalConfig,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        use lettre::message::Mailbox;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let server = global
            .smtp_server
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("smtp server not configured"))?;
        let from: Mailbox = global
            .smtp_from
            .as_deref()
            .unwrap_or("url-check@localhost")
            .parse()?;

        let mut builder = Message::builder().from(from).subject(subject.to_owned());
        for to in recipients {
            builder = builder.to(to.parse()?);
        }
        let message = builder.body(body.to_owned())?;

        let mut transport = AsyncSmtpTransport::<Tokio1Executor>::relay(server)?
            .port(global.smtp_port);
        if let (Some(user), Some(pass)) = (&global.smtp_username, &global.smtp_password) {
            transport = transport.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport.build().send(message).await?;
        info!("smtp alert sent");
        Ok(())
    }

    async fn append_json_log(&self, event: &AlertEvent, message: &str) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.logs_dir).await?;
        let path = self
            .logs_dir
            .join(format!("alert_{}.log", Utc::now().format("%Y-%m-%d")));

        let line = LogLine {
            timestamp: event.observation.timestamp,
            level: if event.is_recovery { "info" } else { "error" },
            kind: if event.is_recovery { "恢复" } else { "故障" },
            task_name: &event.task_name,
            alert_type: event.kind.display_name(),
            message,
        };

        let mut serialized = serde_json::to_string(&line)?;
        serialized.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(serialized.as_bytes()).await?;
        Ok(())
    }

    /// Purge alert log files older than `retention_days`, at most once per
    /// minute (the retention scan walks the whole logs directory, which is
    /// wasteful to do on every single alert).
    async fn purge_old_logs(&self, retention_days: i64) {
        if retention_days <= 0 {
            return;
        }

        {
            let mut guard = self.last_purge.lock().expect("lock poisoned");
            let now = Utc::now();
            if let Some(last) = *guard {
                if now - last < chrono::Duration::minutes(1) {
                    return;
                }
            }
            *guard = Some(now);
        }

        let dir = self.logs_dir.clone();
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(retention_days);
        let result = tokio::task::spawn_blocking(move || purge_old_logs_sync(&dir, cutoff)).await;
        if let Ok(Err(e)) = result {
            warn!(error = %e, "alert log retention purge failed");
        }
    }
}

fn purge_old_logs_sync(dir: &std::path::Path, cutoff: chrono::NaiveDate) -> anyhow::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(date_str) = stem.strip_prefix("alert_") else {
            continue;
        };
        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            if date < cutoff {
                if let Err(e) = std::fs::remove_file(&path) {
                    error!(path = %path.display(), error = %e, "failed to remove expired alert log");
                }
            }
        }
    }
    Ok(())
}

/// Build subject/body for an Alert Event. For `delay` recovery the body is
/// regenerated from the *current* observation's response time, not the one
/// captured at firing (see DESIGN.md for why this is deliberate).
fn build_message(event: &AlertEvent) -> (String, String) {
    let kind_name = event.kind.display_name();
    let action = if event.is_recovery { "恢复" } else { "故障" };
    let subject = format!("[{action}] {} - {}", event.task_name, kind_name);

    let (actual_status, actual_resp_ms) = match &event.observation.observation {
        Observation::HttpResponse {
            status_code,
            resp_time_ms,
            ..
        } => (*status_code, Some(*resp_time_ms)),
        Observation::TransportFailure { .. } => (-1, None),
    };

    let body = format!(
        "任务: {}\nURL: {}\n类型: {}\n期望: {}\n实际: {}\n响应时间: {}\n时间: {}",
        event.task_name,
        event.observation.url,
        kind_name,
        describe_expected(event),
        actual_status,
        actual_resp_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "不匹配".to_owned()),
        event.observation.timestamp.format("%Y-%m-%d %H:%M:%S"),
    );

    (subject, body)
}

fn describe_expected(event: &AlertEvent) -> String {
    match event.kind {
        crate::types::AlertKind::StatusCode => event.expectation.expect_status.to_string(),
        crate::types::AlertKind::ContentMatch => event
            .expectation
            .expect_substring
            .clone()
            .unwrap_or_default(),
        crate::types::AlertKind::JsonPath => event
            .expectation
            .json_path_value
            .clone()
            .unwrap_or_default(),
        crate::types::AlertKind::Delay => event
            .expectation
            .delay_ms_budget
            .map(|ms| format!("<{ms}ms"))
            .unwrap_or_default(),
        crate::types::AlertKind::Timeout => "无超时".to_owned(),
        crate::types::AlertKind::SslExpiry => format!(">={} 天", event.expectation.ssl_warning_days),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Expectation, Method, ProbeObservation};
    use std::collections::HashMap;

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
            headers: HashMap::new(),
            cookies: HashMap::new(),
            payload: None,
            retry: Default::default(),
            proxy: None,
            max_response_size: 1024 * 1024,
            legacy_delay_consecutive_n: None,
        }
    }

    fn event(is_recovery: bool) -> AlertEvent {
        AlertEvent {
            kind: crate::types::AlertKind::StatusCode,
            task_name: "t".into(),
            is_recovery,
            observation: ProbeObservation {
                task_name: "t".into(),
                url: "https://example.test/".into(),
                timestamp: Utc::now(),
                observation: Observation::HttpResponse {
                    status_code: 500,
                    resp_time_ms: 12,
                    body: String::new(),
                    ssl_days_remaining: None,
                },
            },
            previous_observation: None,
            expectation: expectation(),
        }
    }

    #[tokio::test]
    async fn json_log_line_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new(dir.path(), reqwest::Client::new());
        notifier
            .append_json_log(&event(false), "some message")
            .await
            .unwrap();

        let today = Utc::now().format("%Y-%m-%d");
        let path = dir.path().join(format!("alert_{today}.log"));
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("故障"));
        assert!(content.contains("\"task_name\":\"t\""));
    }

    #[test]
    fn message_distinguishes_firing_and_recovery() {
        let (subject_fire, _) = build_message(&event(false));
        let (subject_recover, _) = build_message(&event(true));
        assert!(subject_fire.contains("故障"));
        assert!(subject_recover.contains("恢复"));
    }
}
