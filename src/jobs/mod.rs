//! Background translation jobs.
//!
//! - `JobRegistry`: concurrent id to record map with guarded transitions
//! - `TaskSupervisor`: one task per job that folds its events into the registry
//! - `JobService`: submit, status, cancel and artifact lookup for callers

pub mod events;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod types;

pub use events::{EventStream, ProgressEvent};
pub use registry::{JobRegistry, TransitionError};
pub use service::{JobError, JobService, SubmitRequest};
pub use supervisor::{ExecutionHandle, TaskSupervisor};
pub use types::{
    ArtifactKind, Artifacts, JobId, JobRecord, JobState, JobStatus, JobView, ProgressSnapshot,
};
