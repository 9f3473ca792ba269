pub mod process;
pub mod types;

use crate::jobs::{EventStream, JobId};
use crate::settings::JobSettings;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub use process::ProcessEngine;
pub use types::{DocDiag, RunnerEvent, RunnerRequest, TranslateResult};

/// Everything a computation needs to translate one job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    pub input_pdf: PathBuf,
    /// Directory the outputs are written to.
    pub output_dir: PathBuf,
    pub settings: JobSettings,
}

/// Produces the event stream for a job.
///
/// Implementations should watch `cancel` at their suspension points; the
/// stream is also dropped when the job is cancelled.
pub trait TranslationEngine: Send + Sync + 'static {
    fn translate(&self, spec: JobSpec, cancel: CancellationToken) -> EventStream;
}
