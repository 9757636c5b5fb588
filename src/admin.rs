//! HTTP Admin Surface: health/metrics exposition plus scheduler job control
//! and ad-hoc mail dispatch.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::GlobalConfig;
use crate::notifier::Notifier;
use crate::scheduler::Scheduler;
use crate::types::Expectation;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AdminState {
    pub scheduler: Arc<Scheduler>,
    pub metrics_handle: PrometheusHandle,
    pub notifier: Arc<Notifier>,
    pub global: Arc<GlobalConfig>,
}

/// Build the admin router. Bind and serve with `axum::serve` from `main`.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/job/opt", post(job_opt))
        .route("/sender/mail", post(sender_mail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthScheduler {
    initialized: bool,
    running: bool,
    jobs: usize,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    scheduler: HealthScheduler,
}

async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    let jobs = state.scheduler.list_jobs().await;
    let running = jobs.iter().any(|j| j.running);
    Json(HealthResponse {
        status: "ok",
        scheduler: HealthScheduler {
            initialized: true,
            running,
            jobs: jobs.len(),
        },
    })
}

async fn metrics(State(state): State<AdminState>) -> String {
    state.metrics_handle.render()
}

/// One `POST /job/opt` request body. Exactly one operation field should be
/// set; unrecognized/absent operations are a no-op that returns an empty
/// `list_jobs` result, matching a permissive control endpoint rather than a
/// strict RPC.
#[derive(Debug, Deserialize, Default)]
struct JobOptRequest {
    #[serde(default)]
    list_jobs: bool,
    #[serde(default)]
    add_job: Option<Expectation>,
    #[serde(default)]
    remove_job: Option<String>,
    #[serde(default)]
    stop_job: Option<String>,
    #[serde(default)]
    resume_job: Option<String>,
    #[serde(default)]
    shut_sched: bool,
    #[serde(default)]
    start_sched: Option<Vec<Expectation>>,
}

#[derive(Debug, Serialize)]
struct JobOptResponse {
    ok: bool,
    jobs: Vec<JobSummary>,
}

#[derive(Debug, Serialize)]
struct JobSummary {
    task_name: String,
    url: String,
    interval_seconds: u64,
    running: bool,
}

async fn job_opt(
    State(state): State<AdminState>,
    Json(req): Json<JobOptRequest>,
) -> (StatusCode, Json<JobOptResponse>) {
    let mut ok = true;

    if let Some(expectation) = req.add_job {
        state.scheduler.add_job(expectation).await;
    }
    if let Some(name) = req.remove_job {
        ok &= state.scheduler.remove_job(&name).await;
    }
    if let Some(name) = req.stop_job {
        ok &= state.scheduler.stop_job(&name).await;
    }
    if let Some(name) = req.resume_job {
        ok &= state.scheduler.resume_job(&name).await;
    }
    if req.shut_sched {
        state.scheduler.shut_sched().await;
    }
    if let Some(expectations) = req.start_sched {
        state.scheduler.start_sched(expectations).await;
    }

    let jobs = state
        .scheduler
        .list_jobs()
        .await
        .into_iter()
        .map(|j| JobSummary {
            task_name: j.task_name,
            url: j.url,
            interval_seconds: j.interval_seconds,
            running: j.running,
        })
        .collect();

    let status = if ok { StatusCode::OK } else { StatusCode::NOT_FOUND };
    (status, Json(JobOptResponse { ok, jobs }))
}

#[derive(Debug, Deserialize)]
struct SenderMailRequest {
    tos: String,
    subject: String,
    content: String,
}

async fn sender_mail(
    State(state): State<AdminState>,
    Json(req): Json<SenderMailRequest>,
) -> (StatusCode, &'static str) {
    let recipients: Vec<String> = req
        .tos
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    match state
        .notifier
        .send_ad_hoc_mail(&state.global, &recipients, &req.subject, &req.content)
        .await
    {
        Ok(()) => (StatusCode::OK, "success"),
        Err(e) => {
            warn!(error = %e, "ad-hoc mail send failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "false")
        }
    }
}
