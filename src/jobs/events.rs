//! Events produced by a running translation.

use super::types::{ArtifactKind, ProgressSnapshot};
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One step reported by the computation. `Finish` and `Error` end the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress(ProgressSnapshot),
    /// Outputs the computation claims to have produced. Files are checked
    /// for existence when the job is marked successful.
    Finish(BTreeMap<ArtifactKind, PathBuf>),
    Error(String),
}

impl ProgressEvent {
    pub fn progress(stage: impl Into<String>, overall: f64, current: u64, total: u64) -> Self {
        ProgressEvent::Progress(ProgressSnapshot::new(stage, overall, current, total))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress(_))
    }
}

/// `Err` items are faults of the stream itself, not reported failures.
pub type EventStream = BoxStream<'static, anyhow::Result<ProgressEvent>>;
