//! REST surface over [`JobService`].
//!
//! - `POST   /v1/translate`                 multipart `file` + optional `data` overrides
//! - `GET    /v1/translate`                 all jobs, newest first
//! - `GET    /v1/translate/{id}`            one job
//! - `DELETE /v1/translate/{id}`            cancel
//! - `GET    /v1/translate/{id}/events`     SSE feed of record changes
//! - `GET    /v1/translate/{id}/{artifact}` download `mono`, `dual` or `glossary`

use crate::config::Config;
use crate::jobs::{ArtifactKind, JobError, JobId, JobService, JobView, SubmitRequest};
use crate::overrides::Overrides;
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct AppState {
    pub service: Arc<JobService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::Job(JobError::Validation(_)) | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "Invalid request")
            }
            ApiError::Job(JobError::NotFound(_)) => (StatusCode::NOT_FOUND, "Job not found"),
            ApiError::Job(JobError::Conflict { .. }) => {
                (StatusCode::CONFLICT, "Job has not succeeded")
            }
            ApiError::Job(JobError::Gone { .. }) => (StatusCode::GONE, "Output not available"),
            ApiError::Job(JobError::Unavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service shutting down")
            }
            ApiError::Job(JobError::Io(_)) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, %status, "request rejected");
        }
        (status, Json(ErrorResponse::with_details(error, self.to_string()))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
    pub cancelled: bool,
}

pub fn router(service: Arc<JobService>, max_upload_bytes: usize) -> Router {
    let state = Arc::new(AppState { service });
    Router::new()
        .route("/v1/translate", get(list_jobs).post(submit_job))
        .route("/v1/translate/{id}", get(get_job).delete(cancel_job))
        .route("/v1/translate/{id}/events", get(job_events))
        .route("/v1/translate/{id}/{artifact}", get(download_artifact))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

fn parse_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}

/// POST /v1/translate
async fn submit_job(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    let mut upload: Option<(tempfile::NamedTempFile, Option<String>)> = None;
    let mut overrides = Overrides::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                if let Some(ct) = field.content_type() {
                    if ct != "application/pdf" && ct != "application/octet-stream" {
                        return Err(ApiError::BadRequest(format!(
                            "unsupported content type: {ct}"
                        )));
                    }
                }
                let file_name = field.file_name().map(str::to_string);
                let tmp = tempfile::Builder::new()
                    .prefix("upload-")
                    .suffix(".pdf")
                    .tempfile()
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                let mut out = tmp
                    .reopen()
                    .map(tokio::fs::File::from_std)
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?
                {
                    out.write_all(&chunk)
                        .await
                        .map_err(|e| ApiError::Internal(e.to_string()))?;
                }
                out.flush()
                    .await
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                upload = Some((tmp, file_name));
            }
            Some("data") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                if raw.trim().is_empty() {
                    continue;
                }
                let value: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::BadRequest(format!("data is not JSON: {e}")))?;
                overrides = Overrides::from_json(&value)
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }

    let Some((tmp, file_name)) = upload else {
        return Err(ApiError::BadRequest("missing `file` field".into()));
    };
    let mut req = SubmitRequest::new(tmp.path()).with_overrides(overrides);
    if let Some(name) = file_name {
        req = req.with_file_name(name);
    }
    // The service copies the upload, so the temp file can go once this returns.
    let id = state.service.submit(req).await?;
    Ok(Json(SubmitResponse { id }))
}

/// GET /v1/translate
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobView>> {
    Json(state.service.list().iter().map(|r| r.view()).collect())
}

/// GET /v1/translate/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.status(&id)?.view()))
}

/// DELETE /v1/translate/{id}
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = parse_id(&id)?;
    let cancelled = state.service.cancel(&id).await?;
    Ok(Json(CancelResponse {
        ok: true,
        cancelled,
    }))
}

/// GET /v1/translate/{id}/events
///
/// Sends the current record first, then every change, and ends after a
/// terminal state. Event names are the lower-cased state.
async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = parse_id(&id)?;
    let service = Arc::clone(&state.service);
    // Subscribe before the first read so no change falls in between.
    let mut changes = service.subscribe();
    let current = service.status(&id)?;

    let stream = async_stream::stream! {
        let mut last = current.updated_at;
        let terminal = current.state().is_terminal();
        yield Ok(view_event(&current.view()));
        if terminal {
            return;
        }
        loop {
            let record = match changes.recv().await {
                Ok(record) if record.id == id => record,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(job_id = %id, skipped, "event feed lagged; resyncing");
                    match service.status(&id) {
                        Ok(record) => record,
                        Err(_) => break,
                    }
                }
                Err(RecvError::Closed) => break,
            };
            if record.updated_at < last {
                continue;
            }
            last = record.updated_at;
            let done = record.state().is_terminal();
            yield Ok(view_event(&record.view()));
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn view_event(view: &JobView) -> Event {
    let name = view.state.to_string().to_ascii_lowercase();
    match serde_json::to_string(view) {
        Ok(json) => Event::default().event(name).data(json),
        Err(e) => {
            error!(error = %e, "failed to serialize job view");
            Event::default().event(name).data("{}")
        }
    }
}

/// GET /v1/translate/{id}/{artifact}
async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path((id, artifact)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let kind: ArtifactKind = artifact.parse().map_err(ApiError::BadRequest)?;
    let path = state.service.artifact(&id, kind).await?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| JobError::Gone { id, kind })?;

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(kind.as_str())
        .replace('"', "");
    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .header(header::CONTENT_TYPE, kind.media_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Periodically evicts expired jobs until `stop` fires.
pub fn spawn_sweeper(
    service: Arc<JobService>,
    every: Duration,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    service.sweep_expired(OffsetDateTime::now_utc()).await;
                }
            }
        }
    })
}

/// Serves until Ctrl-C, then cancels every running job.
pub async fn serve(cfg: &Config, service: Arc<JobService>) -> Result<()> {
    let app = router(Arc::clone(&service), cfg.server.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    info!("listening on {}", listener.local_addr()?);

    let stop = CancellationToken::new();
    let sweeper = service.retention().map(|retention| {
        info!(retention_secs = retention.as_secs(), "retention sweeper enabled");
        let every = Duration::from_secs(cfg.jobs.sweep_interval_seconds.max(1));
        spawn_sweeper(Arc::clone(&service), every, stop.clone())
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
            }
            info!("shutting down");
        })
        .await
        .with_context(|| "server error")?;

    stop.cancel();
    if let Some(task) = sweeper {
        let _ = task.await;
    }
    service.shutdown().await;
    Ok(())
}
