#![allow(dead_code)]

use quack_translate::config::Config;
use quack_translate::engine::{JobSpec, TranslationEngine};
use quack_translate::engine_settings::{GenericApiSettings, TranslateEngineSettings};
use quack_translate::jobs::{EventStream, JobId, JobRecord, JobService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Engine whose event stream is produced by a closure.
pub struct FnEngine<F>(pub F);

impl<F> TranslationEngine for FnEngine<F>
where
    F: Fn(JobSpec, CancellationToken) -> EventStream + Send + Sync + 'static,
{
    fn translate(&self, spec: JobSpec, cancel: CancellationToken) -> EventStream {
        (self.0)(spec, cancel)
    }
}

pub fn config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.jobs_dir = root.join("jobs").display().to_string();
    cfg.translate_engine = TranslateEngineSettings::GenericApi(GenericApiSettings {
        generic_api_url: Some("http://127.0.0.1:9/translate".into()),
        ..Default::default()
    });
    cfg
}

pub fn service<F>(cfg: &Config, f: F) -> JobService
where
    F: Fn(JobSpec, CancellationToken) -> EventStream + Send + Sync + 'static,
{
    JobService::new(cfg, Arc::new(FnEngine(f)))
}

pub fn sample_pdf(root: &Path) -> PathBuf {
    let path = root.join("paper.pdf");
    std::fs::write(&path, b"%PDF-1.4\n%%EOF\n").expect("write sample pdf");
    path
}

/// Polls until the job reaches a terminal state.
pub async fn wait_terminal(svc: &JobService, id: &JobId) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let rec = svc.status(id).expect("job exists");
            if rec.state().is_terminal() {
                return rec;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
