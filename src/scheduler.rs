//! Per-task scheduling: one `tokio::spawn` loop per configured task,
//! administrable via add/remove/stop/resume through the admin job-control
//! API.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{AlertsConfig, GlobalConfig};
use crate::notifier::Notifier;
use crate::prober::{self, ProbeLimiter};
use crate::state::StateStore;
use crate::types::Expectation;

/// Everything one spawned task loop needs, shared across all tasks.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub client: reqwest::Client,
    pub probe_limiter: ProbeLimiter,
    pub state_store: Arc<StateStore>,
    pub notifier: Arc<Notifier>,
    pub alerts: Arc<AlertsConfig>,
    pub global: Arc<GlobalConfig>,
}

struct TaskRuntime {
    handle: JoinHandle<()>,
    running: watch::Sender<bool>,
    expectation: Expectation,
}

/// Owns the live set of task loops and lets the admin surface mutate it.
pub struct Scheduler {
    deps: SchedulerDeps,
    tasks: Mutex<HashMap<String, TaskRuntime>>,
}

/// Snapshot of one scheduled job for `list_jobs`.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub task_name: String,
    pub url: String,
    pub interval_seconds: u64,
    pub running: bool,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        Self {
            deps,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Start loops for every task in `expectations`. Used at process
    /// startup and by the admin `start_sched` control.
    pub async fn start_sched(&self, expectations: Vec<Expectation>) {
        for expectation in expectations {
            self.add_job(expectation).await;
        }
    }

    /// Abort every running task loop without removing their state files.
    pub async fn shut_sched(&self) {
        let mut tasks = self.tasks.lock().await;
        for (name, runtime) in tasks.drain() {
            runtime.handle.abort();
            info!(task = %name, "scheduler shut down task loop");
        }
    }

    /// Spawn a new task loop. Replaces and aborts any existing loop under
    /// the same name.
    pub async fn add_job(&self, expectation: Expectation) {
        let name = expectation.task_name.clone();
        let (running_tx, running_rx) = watch::channel(true);
        let deps = self.deps.clone();
        let exp_for_loop = expectation.clone();

        let handle = tokio::spawn(async move {
            run_task_loop(exp_for_loop, deps, running_rx).await;
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.insert(
            name.clone(),
            TaskRuntime {
                handle,
                running: running_tx,
                expectation,
            },
        ) {
            old.handle.abort();
        }
        info!(task = %name, "scheduler added job");
    }

    /// Abort and forget a task loop entirely.
    pub async fn remove_job(&self, task_name: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.remove(task_name) {
            Some(runtime) => {
                runtime.handle.abort();
                info!(task = %task_name, "scheduler removed job");
                true
            }
            None => false,
        }
    }

    /// Pause a task loop in place: the loop keeps running but skips probing
    /// until resumed, so `resume_job` doesn't need to re-spawn.
    pub async fn stop_job(&self, task_name: &str) -> bool {
        let tasks = self.tasks.lock().await;
        match tasks.get(task_name) {
            Some(runtime) => {
                let _ = runtime.running.send(false);
                info!(task = %task_name, "scheduler stopped job");
                true
            }
            None => false,
        }
    }

    pub async fn resume_job(&self, task_name: &str) -> bool {
        let tasks = self.tasks.lock().await;
        match tasks.get(task_name) {
            Some(runtime) => {
                let _ = runtime.running.send(true);
                info!(task = %task_name, "scheduler resumed job");
                true
            }
            None => false,
        }
    }

    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let tasks = self.tasks.lock().await;
        let mut jobs: Vec<JobInfo> = tasks
            .values()
            .map(|runtime| JobInfo {
                task_name: runtime.expectation.task_name.clone(),
                url: runtime.expectation.url.clone(),
                interval_seconds: runtime.expectation.interval_seconds,
                running: *runtime.running.borrow(),
            })
            .collect();
        jobs.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        jobs
    }
}

async fn run_task_loop(
    expectation: Expectation,
    deps: SchedulerDeps,
    mut running_rx: watch::Receiver<bool>,
) {
    let startup_jitter_ms = rand::thread_rng().gen_range(0..1000);
    tokio::time::sleep(std::time::Duration::from_millis(startup_jitter_ms)).await;

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        expectation.interval_seconds.max(1),
    ));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let per_task_limit = deps.global.max_instances_per_task.max(1);
    let instance_gate = Arc::new(Semaphore::new(per_task_limit));
    // Guards the load -> evaluate -> apply -> save sequence for this task so
    // that overlapping instances (when a probe outruns the interval) can
    // still run concurrently up to `instance_gate`, but never interleave
    // their state updates and clobber each other's save.
    let state_lock = Arc::new(Mutex::new(()));

    loop {
        interval.tick().await;

        if !*running_rx.borrow() {
            continue;
        }

        let Ok(permit) = instance_gate.clone().try_acquire_owned() else {
            warn!(
                task = %expectation.task_name,
                "skipping tick: max_instances_per_task already in flight (misfire)"
            );
            continue;
        };

        let expectation = expectation.clone();
        let deps = deps.clone();
        let state_lock = state_lock.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_one_tick(&expectation, &deps, &state_lock).await;
        });
    }
}

async fn run_one_tick(expectation: &Expectation, deps: &SchedulerDeps, state_lock: &Mutex<()>) {
    let observation = prober::probe(&deps.client, &deps.probe_limiter, expectation).await;
    let flags = crate::evaluator::evaluate(expectation, &observation.observation);
    crate::metrics::record_probe(expectation, &observation.observation, &flags);

    // Hold the per-task lock across the whole read-evaluate-write sequence:
    // two overlapping ticks must never both load the same prior state and
    // race to save over each other.
    let _guard = state_lock.lock().await;

    let state = match deps.state_store.load(&expectation.task_name).await {
        Ok(Some(state)) => state,
        Ok(None) => crate::state::TaskState::default(),
        Err(e) => {
            warn!(task = %expectation.task_name, error = %e, "failed to load task state, starting fresh");
            crate::state::TaskState::default()
        }
    };

    let (new_state, events) = crate::state_machine::apply(
        expectation,
        &deps.alerts,
        deps.global.enable_alerts,
        deps.global.history_days,
        state,
        flags,
        observation,
        Utc::now(),
    );

    if let Err(e) = deps.state_store.save(&expectation.task_name, &new_state).await {
        warn!(task = %expectation.task_name, error = %e, "failed to persist task state");
    }

    drop(_guard);

    for event in &events {
        let channels = deps.alerts.policy(event.kind).channels.clone();
        deps.notifier.notify(&deps.global, &channels, event).await;
    }
}
