use crate::jobs::{ArtifactKind, ProgressEvent, ProgressSnapshot};
use crate::settings::JobSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocDiag {
    pub python_exe: String,
    pub python_version: String,
    #[serde(default)]
    pub translator_version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Written to the runner's stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum RunnerRequest<'a> {
    Doctor,
    Translate {
        input_pdf: &'a str,
        output_dir: &'a str,
        settings: &'a JobSettings,
    },
}

/// One line of the runner's stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    ProgressStart(RunnerProgress),
    ProgressUpdate(RunnerProgress),
    ProgressEnd(RunnerProgress),
    Finish { translate_result: TranslateResult },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RunnerProgress {
    #[serde(default)]
    pub stage: Option<String>,
    /// Percentage, 0 to 100.
    #[serde(default)]
    pub overall_progress: Option<f64>,
    #[serde(default)]
    pub part_index: Option<u32>,
    #[serde(default)]
    pub total_parts: Option<u32>,
    #[serde(default)]
    pub stage_current: Option<u64>,
    #[serde(default)]
    pub stage_total: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TranslateResult {
    #[serde(default)]
    pub mono_pdf_path: Option<PathBuf>,
    #[serde(default)]
    pub dual_pdf_path: Option<PathBuf>,
    #[serde(default)]
    pub auto_extracted_glossary_path: Option<PathBuf>,
}

impl TranslateResult {
    pub fn into_artifacts(self) -> BTreeMap<ArtifactKind, PathBuf> {
        [
            (ArtifactKind::Mono, self.mono_pdf_path),
            (ArtifactKind::Dual, self.dual_pdf_path),
            (ArtifactKind::Glossary, self.auto_extracted_glossary_path),
        ]
        .into_iter()
        .filter_map(|(k, p)| p.map(|p| (k, p)))
        .collect()
    }
}

impl From<RunnerEvent> for ProgressEvent {
    fn from(ev: RunnerEvent) -> Self {
        match ev {
            RunnerEvent::ProgressStart(p)
            | RunnerEvent::ProgressUpdate(p)
            | RunnerEvent::ProgressEnd(p) => ProgressEvent::Progress(
                ProgressSnapshot::new(
                    p.stage.unwrap_or_default(),
                    p.overall_progress.unwrap_or(0.0) / 100.0,
                    p.stage_current.unwrap_or(0),
                    p.stage_total.unwrap_or(0),
                )
                .with_parts(p.part_index, p.total_parts),
            ),
            RunnerEvent::Finish { translate_result } => {
                ProgressEvent::Finish(translate_result.into_artifacts())
            }
            RunnerEvent::Error { error } => {
                ProgressEvent::Error(error.unwrap_or_else(|| "Unknown error".into()))
            }
        }
    }
}
