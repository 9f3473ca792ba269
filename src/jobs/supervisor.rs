//! Runs one background task per job and folds its events into the registry.

use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::ProgressEvent;
use super::registry::JobRegistry;
use super::types::{Artifacts, JobId, JobStatus, ProgressSnapshot};
use crate::engine::{JobSpec, TranslationEngine};

/// Ties a job id to the task driving it.
#[derive(Debug)]
pub struct ExecutionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct TaskSupervisor {
    registry: Arc<JobRegistry>,
    engine: Arc<dyn TranslationEngine>,
    handles: Arc<DashMap<JobId, ExecutionHandle>>,
    shutdown: CancellationToken,
}

impl TaskSupervisor {
    pub fn new(registry: Arc<JobRegistry>, engine: Arc<dyn TranslationEngine>) -> Self {
        Self {
            registry,
            engine,
            handles: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawns the driving task for a job whose `Pending` record is already
    /// in the registry. Returns immediately.
    pub fn start(&self, spec: JobSpec) {
        let id = spec.id;
        let cancel = CancellationToken::new();
        // The handle must be registered before the task can finish and try to
        // release it.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let registry = Arc::clone(&self.registry);
        let engine = Arc::clone(&self.engine);
        let handles = Arc::clone(&self.handles);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            if registered_rx.await.is_err() {
                return;
            }
            let run = AssertUnwindSafe(drive(&registry, engine.as_ref(), spec, &token));
            if let Err(panic) = run.catch_unwind().await {
                let detail = panic_message(panic.as_ref());
                error!(job_id = %id, "job task panicked: {detail}");
                record_terminal(&registry, &id, JobStatus::Error(detail));
            }
            handles.remove(&id);
        });

        self.handles.insert(id, ExecutionHandle { cancel, task });
        let _ = registered_tx.send(());
        debug!(job_id = %id, "job started");
    }

    /// Requests cooperative cancellation, waits for the task to stop, then
    /// moves the job to `Cancelled`.
    ///
    /// Returns `true` only when this call moved the job to `Cancelled`. Jobs
    /// that already reached a terminal state, and callers that lose a race to
    /// another `cancel`, get `false`. The wait and the write run on their own
    /// task, so dropping the returned future still settles the job.
    pub async fn cancel(&self, id: &JobId) -> bool {
        let Some((_, handle)) = self.handles.remove(id) else {
            return false;
        };
        handle.cancel.cancel();
        let registry = Arc::clone(&self.registry);
        let id = *id;
        let settle = tokio::spawn(async move {
            if let Err(err) = handle.task.await {
                warn!(job_id = %id, "job task ended abnormally: {err}");
            }
            match registry.transition(&id, JobStatus::Cancelled) {
                Ok(_) => {
                    info!(job_id = %id, "job cancelled");
                    true
                }
                Err(err) => {
                    debug!(job_id = %id, "cancel had no effect: {err}");
                    false
                }
            }
        });
        match settle.await {
            Ok(won) => won,
            Err(err) => {
                error!(job_id = %id, "cancellation task failed: {err}");
                false
            }
        }
    }

    /// Number of jobs with a live task.
    pub fn active(&self) -> usize {
        self.handles.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops accepting work and cancels every running job.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<JobId> = self.handles.iter().map(|h| *h.key()).collect();
        if !ids.is_empty() {
            info!(count = ids.len(), "cancelling active jobs for shutdown");
        }
        for id in ids {
            self.cancel(&id).await;
        }
    }
}

async fn drive(
    registry: &JobRegistry,
    engine: &dyn TranslationEngine,
    spec: JobSpec,
    cancel: &CancellationToken,
) {
    let id = spec.id;
    if cancel.is_cancelled() {
        return;
    }
    if let Err(err) = registry.transition(&id, JobStatus::Progress(ProgressSnapshot::starting())) {
        debug!(job_id = %id, "not starting: {err}");
        return;
    }

    let mut events = engine.translate(spec, cancel.clone());
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(job_id = %id, "stopping on cancellation");
                return;
            }
            next = events.next() => next,
        };

        let status = match next {
            Some(Ok(ProgressEvent::Progress(snapshot))) => {
                debug!(job_id = %id, stage = %snapshot.stage, overall = snapshot.overall, "progress");
                if let Err(err) = registry.transition(&id, JobStatus::Progress(snapshot)) {
                    debug!(job_id = %id, "dropping progress: {err}");
                    return;
                }
                continue;
            }
            Some(Ok(ProgressEvent::Finish(outputs))) => JobStatus::Success(existing(outputs).await),
            Some(Ok(ProgressEvent::Error(detail))) => JobStatus::Error(detail),
            Some(Err(fault)) => {
                warn!(job_id = %id, "event stream failed: {fault:#}");
                JobStatus::Error(format!("{fault:#}"))
            }
            None => JobStatus::Error("translation ended without a result".into()),
        };
        record_terminal(registry, &id, status);
        return;
    }
}

fn record_terminal(registry: &JobRegistry, id: &JobId, status: JobStatus) {
    let state = status.state();
    match registry.transition(id, status) {
        Ok(_) => info!(job_id = %id, %state, "job finished"),
        Err(err) => debug!(job_id = %id, "dropping late {state}: {err}"),
    }
}

/// Keeps only outputs whose file is present right now.
async fn existing(outputs: Artifacts) -> Artifacts {
    let mut kept = Artifacts::new();
    for (kind, path) in outputs {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            kept.insert(kind, path);
        } else {
            warn!(artifact = %kind, path = %path.display(), "reported output is missing; omitting");
        }
    }
    kept
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("internal error: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("internal error: {s}")
    } else {
        "internal error".to_string()
    }
}
