//! HTTP Prober: issues one probe for an Expectation, with retry, body
//! truncation, and optional TLS certificate inspection.
//!
//! Bounded concurrency across the whole process (not just per task) is
//! enforced by the caller via a shared `Semaphore`, the same structure the
//! other_examples healthcheck crate uses for `buffer_unordered`-style fan-out.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::types::{Expectation, Method, Observation, ProbeObservation};

/// Transport-level failure classification, distinct from an HTTP response
/// that merely fails the evaluator's conditions.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("{0}")]
    Other(String),
}

impl ProbeError {
    fn reason(&self) -> String {
        match self {
            ProbeError::Timeout => "timeout".to_owned(),
            ProbeError::Connect(_) => "connect".to_owned(),
            ProbeError::Tls(_) => "tls".to_owned(),
            ProbeError::Dns(_) => "dns".to_owned(),
            ProbeError::Other(_) => "other".to_owned(),
        }
    }

    fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeError::Timeout
        } else if e.is_connect() {
            ProbeError::Connect(e.to_string())
        } else {
            ProbeError::Other(e.to_string())
        }
    }
}

/// Process-wide bound on in-flight probes, independent of per-task
/// scheduling. Shared across every spawned task loop.
#[derive(Clone)]
pub struct ProbeLimiter {
    semaphore: Arc<Semaphore>,
}

impl ProbeLimiter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }
}

/// Issue one probe for `expectation`, retrying transport failures per its
/// `RetryPolicy` with exponential-ish backoff and jitter. HTTP responses —
/// even error statuses — are never retried; only transport failures are.
pub async fn probe(
    client: &Client,
    limiter: &ProbeLimiter,
    expectation: &Expectation,
) -> ProbeObservation {
    let _permit = limiter
        .semaphore
        .acquire()
        .await
        .expect("probe limiter semaphore closed");

    let mut attempt = 0u32;
    loop {
        match probe_once(client, expectation).await {
            Ok(observation) => return observation,
            Err(e) if attempt < expectation.retry.count => {
                attempt += 1;
                warn!(
                    task = %expectation.task_name,
                    attempt,
                    reason = %e,
                    "probe attempt failed, retrying"
                );
                let base_ms = expectation.retry.delay_seconds.saturating_mul(1000);
                let jitter_bound = base_ms.max(1).saturating_div(2).saturating_add(1);
                let jitter_ms = rand::thread_rng().gen_range(0..=jitter_bound);
                tokio::time::sleep(std::time::Duration::from_millis(
                    base_ms.saturating_add(jitter_ms),
                ))
                .await;
            }
            Err(e) => {
                return ProbeObservation {
                    task_name: expectation.task_name.clone(),
                    url: expectation.url.clone(),
                    timestamp: Utc::now(),
                    observation: Observation::TransportFailure { reason: e.reason() },
                };
            }
        }
    }
}

async fn probe_once(
    client: &Client,
    expectation: &Expectation,
) -> Result<ProbeObservation, ProbeError> {
    let start = Instant::now();

    let mut request = match expectation.method {
        Method::Get => client.get(&expectation.url),
        Method::Post => client.post(&expectation.url),
    };
    request = request.timeout(std::time::Duration::from_secs(expectation.timeout_seconds));
    for (key, value) in &expectation.headers {
        request = request.header(key, value);
    }
    if !expectation.cookies.is_empty() {
        let cookie_header = expectation
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        request = request.header(reqwest::header::COOKIE, cookie_header);
    }
    if let Some(payload) = &expectation.payload {
        request = request.body(payload.clone());
    }

    let response = request.send().await.map_err(|e| ProbeError::from_reqwest(&e))?;
    let status_code = i32::from(response.status().as_u16());

    let ssl_days_remaining = if expectation.ssl_warning_days > 0 && expectation.url.starts_with("https") {
        match inspect_certificate(&expectation.url, expectation.timeout_seconds).await {
            Ok(days) => Some(days),
            Err(e) => {
                debug!(task = %expectation.task_name, error = %e, "certificate inspection failed");
                None
            }
        }
    } else {
        None
    };

    let body_bytes = response
        .bytes()
        .await
        .map_err(|e| ProbeError::from_reqwest(&e))?;
    let truncated = &body_bytes[..body_bytes.len().min(expectation.max_response_size)];
    let body = String::from_utf8_lossy(truncated).into_owned();

    let resp_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    Ok(ProbeObservation {
        task_name: expectation.task_name.clone(),
        url: expectation.url.clone(),
        timestamp: Utc::now(),
        observation: Observation::HttpResponse {
            status_code,
            resp_time_ms,
            body,
            ssl_days_remaining,
        },
    })
}

/// Connect to `url`'s host:443 (or explicit port) and return days until the
/// leaf certificate's `not_after`: native-tls handshake, then x509-parser
/// over the DER-encoded peer certificate.
async fn inspect_certificate(url: &str, timeout_seconds: u64) -> anyhow::Result<i64> {
    let parsed = url::Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("url has no host"))?
        .to_owned();
    let port = parsed.port_or_known_default().unwrap_or(443);

    let connect = async {
        let tcp = tokio::net::TcpStream::connect((host.as_str(), port)).await?;
        let connector = tokio_native_tls::TlsConnector::from(native_tls::TlsConnector::new()?);
        let tls_stream = connector.connect(&host, tcp).await?;

        let cert = tls_stream
            .get_ref()
            .peer_certificate()
            .map_err(|e| anyhow::anyhow!("failed to read peer certificate: {e}"))?
            .ok_or_else(|| anyhow::anyhow!("server presented no certificate"))?;
        let der = cert.to_der()?;
        let (_, parsed_cert) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| anyhow::anyhow!("failed to parse certificate: {e}"))?;

        let not_after = parsed_cert.validity().not_after.timestamp();
        let seconds_remaining = not_after - Utc::now().timestamp();
        Ok::<i64, anyhow::Error>(seconds_remaining.div_euclid(86_400))
    };

    tokio::time::timeout(std::time::Duration::from_secs(timeout_seconds), connect)
        .await
        .map_err(|_| anyhow::anyhow!("certificate inspection timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_error_reason_classifies_timeout() {
        assert_eq!(ProbeError::Timeout.reason(), "timeout");
    }

    #[tokio::test]
    async fn limiter_allows_configured_concurrency() {
        let limiter = ProbeLimiter::new(2);
        assert_eq!(limiter.semaphore.available_permits(), 2);
    }
}
