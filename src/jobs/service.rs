use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::registry::JobRegistry;
use super::supervisor::TaskSupervisor;
use super::types::{ArtifactKind, JobId, JobRecord, JobState, JobStatus};
use crate::config::Config;
use crate::engine::{JobSpec, TranslationEngine};
use crate::overrides::Overrides;
use crate::settings::{JobSettings, SettingsError};
use crate::util::{ensure_dir_async, looks_like_url};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} is {state}, not SUCCESS")]
    Conflict { id: JobId, state: JobState },
    #[error("{kind} output of job {id} is not available")]
    Gone { id: JobId, kind: ArtifactKind },
    #[error("service is shutting down")]
    Unavailable,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SettingsError> for JobError {
    fn from(err: SettingsError) -> Self {
        JobError::Validation(err.to_string())
    }
}

/// A submission: the uploaded PDF plus per-job overrides.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Where the upload currently lives. It is copied into the job directory.
    pub input: PathBuf,
    /// File name to keep inside the job directory. Defaults to the input's name.
    pub file_name: Option<String>,
    pub overrides: Overrides,
}

impl SubmitRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            file_name: None,
            overrides: Overrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

/// Entry point for submitting, polling, cancelling and fetching jobs.
pub struct JobService {
    cfg: Config,
    registry: Arc<JobRegistry>,
    supervisor: TaskSupervisor,
}

impl JobService {
    pub fn new(cfg: &Config, engine: Arc<dyn TranslationEngine>) -> Self {
        let registry = Arc::new(JobRegistry::new(cfg.jobs.event_buffer));
        let supervisor = TaskSupervisor::new(Arc::clone(&registry), engine);
        Self {
            cfg: cfg.clone(),
            registry,
            supervisor,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Validates and registers a job, then starts it in the background.
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId, JobError> {
        if self.supervisor.is_shutting_down() {
            return Err(JobError::Unavailable);
        }
        self.validate_input(&req.input)?;
        let settings = JobSettings::build(&self.cfg, &req.overrides)?;

        let id = JobId::new();
        let job_dir = self.cfg.jobs_dir().join(id.to_string());
        ensure_dir_async(&job_dir).await?;
        let file_name = pdf_file_name(req.file_name.as_deref(), &req.input);
        let input_pdf = job_dir.join(file_name);
        tokio::fs::copy(&req.input, &input_pdf).await?;

        self.registry.put(JobRecord::pending(id));
        self.supervisor.start(JobSpec {
            id,
            input_pdf,
            output_dir: job_dir,
            settings,
        });
        info!(job_id = %id, "job submitted");
        Ok(id)
    }

    pub fn status(&self, id: &JobId) -> Result<JobRecord, JobError> {
        self.registry.get(id).ok_or(JobError::NotFound(*id))
    }

    /// `Ok(true)` when this call cancelled the job, `Ok(false)` when it was
    /// already finished or cancelled.
    pub async fn cancel(&self, id: &JobId) -> Result<bool, JobError> {
        self.status(id)?;
        Ok(self.supervisor.cancel(id).await)
    }

    /// Location of a produced output, checked to still exist.
    pub async fn artifact(&self, id: &JobId, kind: ArtifactKind) -> Result<PathBuf, JobError> {
        let record = self.status(id)?;
        let JobStatus::Success(artifacts) = &record.status else {
            return Err(JobError::Conflict {
                id: *id,
                state: record.state(),
            });
        };
        let path = artifacts
            .get(&kind)
            .ok_or(JobError::Gone { id: *id, kind })?;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(JobError::Gone { id: *id, kind });
        }
        Ok(path.clone())
    }

    pub fn list(&self) -> Vec<JobRecord> {
        self.registry.list()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobRecord> {
        self.registry.subscribe()
    }

    pub fn active(&self) -> usize {
        self.supervisor.active()
    }

    pub fn retention(&self) -> Option<Duration> {
        match self.cfg.jobs.retention_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Evicts finished jobs last updated before `now - retention`. Does
    /// nothing when retention is disabled.
    pub async fn sweep_expired(&self, now: OffsetDateTime) -> Vec<JobId> {
        let Some(retention) = self.retention() else {
            return Vec::new();
        };
        let mut evicted = Vec::new();
        for record in self.registry.list() {
            if !record.state().is_terminal() || now - record.updated_at < retention {
                continue;
            }
            self.registry.remove(&record.id);
            if self.cfg.jobs.purge_artifacts {
                let dir = self.cfg.jobs_dir().join(record.id.to_string());
                if let Err(err) = tokio::fs::remove_dir_all(&dir).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(job_id = %record.id, "failed to purge {}: {err}", dir.display());
                    }
                }
            }
            evicted.push(record.id);
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted expired jobs");
        }
        evicted
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    fn validate_input(&self, input: &Path) -> Result<(), JobError> {
        let shown = input.display().to_string();
        if self.cfg.security.reject_url_inputs && looks_like_url(&shown) {
            return Err(JobError::Validation(format!("URL inputs are disabled: {shown}")));
        }
        if !input.is_file() {
            return Err(JobError::Validation(format!("input does not exist: {shown}")));
        }
        match input.extension().and_then(|s| s.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => Ok(()),
            Some(_) => Err(JobError::Validation(format!("input is not a PDF: {shown}"))),
            None => {
                warn!("input has no extension; assuming PDF: {shown}");
                Ok(())
            }
        }
    }
}

/// Keeps only the final path component and forces a `.pdf` extension.
fn pdf_file_name(requested: Option<&str>, input: &Path) -> String {
    let stem = requested
        .map(Path::new)
        .unwrap_or(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "..")
        .unwrap_or("input");
    format!("{stem}.pdf")
}
