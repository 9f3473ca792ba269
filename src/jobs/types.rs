use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::util::format_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Progress,
    Success,
    Error,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Error | JobState::Cancelled)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Progress)
                | (Pending, Cancelled)
                | (Progress, Progress)
                | (Progress, Success)
                | (Progress, Error)
                | (Progress, Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Progress => "PROGRESS",
            JobState::Success => "SUCCESS",
            JobState::Error => "ERROR",
            JobState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Progress as reported by the most recent event. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: String,
    /// Overall completion in `[0, 1]`.
    pub overall: f64,
    pub stage_current: u64,
    pub stage_total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_parts: Option<u32>,
}

impl ProgressSnapshot {
    pub fn new(stage: impl Into<String>, overall: f64, stage_current: u64, stage_total: u64) -> Self {
        Self {
            stage: stage.into(),
            overall: clamp_ratio(overall),
            stage_current,
            stage_total,
            part_index: None,
            total_parts: None,
        }
    }

    /// Snapshot a job holds between starting and its first event.
    pub fn starting() -> Self {
        Self::new("starting", 0.0, 0, 0)
    }

    pub fn with_parts(mut self, part_index: Option<u32>, total_parts: Option<u32>) -> Self {
        self.part_index = part_index;
        self.total_parts = total_parts;
        self
    }
}

fn clamp_ratio(r: f64) -> f64 {
    if r.is_nan() { 0.0 } else { r.clamp(0.0, 1.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Mono,
    Dual,
    Glossary,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Mono, ArtifactKind::Dual, ArtifactKind::Glossary];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Mono => "mono",
            ArtifactKind::Dual => "dual",
            ArtifactKind::Glossary => "glossary",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ArtifactKind::Mono | ArtifactKind::Dual => "application/pdf",
            ArtifactKind::Glossary => "text/csv",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown artifact: {s}"))
    }
}

pub type Artifacts = BTreeMap<ArtifactKind, PathBuf>;

/// State plus the data that is only meaningful in that state.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Progress(ProgressSnapshot),
    Success(Artifacts),
    Error(String),
    Cancelled,
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Progress(_) => JobState::Progress,
            JobStatus::Success(_) => JobState::Success,
            JobStatus::Error(_) => JobState::Error,
            JobStatus::Cancelled => JobState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl JobRecord {
    pub fn pending(id: JobId) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    pub fn progress(&self) -> Option<&ProgressSnapshot> {
        match &self.status {
            JobStatus::Progress(p) => Some(p),
            _ => None,
        }
    }

    pub fn artifacts(&self) -> Option<&Artifacts> {
        match &self.status {
            JobStatus::Success(a) => Some(a),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Same record with a new status and a fresh `updated_at`.
    pub fn with_status(&self, status: JobStatus) -> Self {
        Self {
            id: self.id,
            status,
            created_at: self.created_at,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            state: self.state(),
            progress: self.progress().cloned(),
            artifacts: self.artifacts().map(|a| {
                a.iter()
                    .map(|(k, p)| (*k, p.display().to_string()))
                    .collect()
            }),
            error: self.error().map(str::to_string),
            created_at: format_rfc3339(self.created_at),
            updated_at: format_rfc3339(self.updated_at),
        }
    }
}

/// Client-facing shape of a [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<ArtifactKind, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
