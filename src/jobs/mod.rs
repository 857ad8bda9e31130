pub mod log_store;
pub mod runner;
pub mod session;

pub use log_store::{JobLogger, LogEntry, LogLevel, LogPage, LogStore};
pub use runner::{JobHandle, JobRunner, StageContext, StageOutcome, StagePipeline};
pub use session::Session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Longest error text kept on a job or stage record.
pub const ERROR_DISPLAY_LIMIT: usize = 500;

pub const SUBTITLE_STAGES: [&str; 8] = [
    "asr",
    "split_nlp",
    "split_meaning",
    "summarize",
    "translate",
    "split_sub",
    "gen_sub",
    "merge_sub",
];

pub const DUBBING_STAGES: [&str; 6] = [
    "audio_tasks",
    "dub_chunks",
    "refer_audio",
    "gen_audio",
    "merge_audio",
    "dub_to_vid",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Subtitle,
    Dubbing,
}

impl JobType {
    pub fn stage_names(&self) -> &'static [&'static str] {
        match self {
            JobType::Subtitle => &SUBTITLE_STAGES,
            JobType::Dubbing => &DUBBING_STAGES,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Subtitle => write!(f, "subtitle"),
            JobType::Dubbing => write!(f, "dubbing"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subtitle" => Ok(JobType::Subtitle),
            "dubbing" => Ok(JobType::Dubbing),
            _ => Err(format!("Unknown job type: {s}. Use subtitle or dubbing")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStage {
    pub name: String,
    pub status: StageStatus,
    /// 0 to 100.
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProcessingStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            progress: 0.0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.status, StageStatus::Completed | StageStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub video_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub stages: Vec<ProcessingStage>,
    pub progress: f64,
    pub current_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ProcessingJob {
    pub fn new(job_type: JobType, video_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.into(),
            job_type,
            status: JobStatus::Pending,
            stages: job_type
                .stage_names()
                .iter()
                .map(|name| ProcessingStage::new(*name))
                .collect(),
            progress: 0.0,
            current_stage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&ProcessingStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn stage_mut(&mut self, name: &str) -> Option<&mut ProcessingStage> {
        let stage = self.stages.iter_mut().find(|s| s.name == name);
        if stage.is_none() {
            warn!("Unknown stage '{}' for job {}", name, self.id);
        }
        stage
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn begin_stage(&mut self, name: &str) {
        if let Some(stage) = self.stage_mut(name) {
            stage.status = StageStatus::Running;
            stage.progress = 0.0;
            stage.started_at = Some(Utc::now());
        }
        self.current_stage = Some(name.to_string());
        self.recompute_progress();
    }

    pub fn set_stage_progress(&mut self, name: &str, progress: f64) {
        if let Some(stage) = self.stage_mut(name) {
            stage.progress = progress.clamp(0.0, 100.0);
        }
        self.recompute_progress();
    }

    pub fn complete_stage(&mut self, name: &str) {
        self.finish_stage(name, StageStatus::Completed);
    }

    pub fn skip_stage(&mut self, name: &str) {
        self.finish_stage(name, StageStatus::Skipped);
    }

    fn finish_stage(&mut self, name: &str, status: StageStatus) {
        if let Some(stage) = self.stage_mut(name) {
            stage.status = status;
            stage.progress = 100.0;
            stage.completed_at = Some(Utc::now());
        }
        self.recompute_progress();
    }

    /// Mark the stage and the job failed. The message is truncated for display.
    pub fn fail_stage(&mut self, name: &str, error: &str) {
        let display = truncate_error(error);
        if let Some(stage) = self.stage_mut(name) {
            stage.status = StageStatus::Failed;
            stage.completed_at = Some(Utc::now());
            stage.error = Some(display.clone());
        }
        self.status = JobStatus::Failed;
        self.error = Some(display);
        self.completed_at = Some(Utc::now());
        self.recompute_progress();
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.current_stage = None;
        self.completed_at = Some(Utc::now());
        self.recompute_progress();
    }

    /// A running stage goes back to pending; finished stages keep their state.
    pub fn cancel(&mut self) {
        for stage in &mut self.stages {
            if stage.status == StageStatus::Running {
                stage.status = StageStatus::Pending;
                stage.progress = 0.0;
                stage.started_at = None;
            }
        }
        self.status = JobStatus::Cancelled;
        self.current_stage = None;
        self.completed_at = Some(Utc::now());
        self.recompute_progress();
    }

    /// Each finished stage is worth `100 / n`; a running stage adds its own
    /// fraction of that weight.
    fn recompute_progress(&mut self) {
        if self.stages.is_empty() {
            self.progress = 0.0;
            return;
        }
        let weight = 100.0 / self.stages.len() as f64;
        self.progress = self
            .stages
            .iter()
            .map(|s| {
                if s.is_done() {
                    weight
                } else if s.status == StageStatus::Running {
                    weight * s.progress / 100.0
                } else {
                    0.0
                }
            })
            .sum::<f64>()
            .min(100.0);
    }
}

pub fn truncate_error(error: &str) -> String {
    if error.chars().count() <= ERROR_DISPLAY_LIMIT {
        error.to_string()
    } else {
        let mut short: String = error.chars().take(ERROR_DISPLAY_LIMIT).collect();
        short.push_str("...");
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_has_pending_stages() {
        let job = ProcessingJob::new(JobType::Subtitle, "video-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.stages.len(), 8);
        assert!(job.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(ProcessingJob::new(JobType::Dubbing, "v").stages.len(), 6);
    }

    #[test]
    fn test_progress_weights() {
        let mut job = ProcessingJob::new(JobType::Dubbing, "v");
        job.start();
        job.begin_stage("audio_tasks");
        job.complete_stage("audio_tasks");
        job.begin_stage("dub_chunks");
        job.skip_stage("dub_chunks");
        job.begin_stage("refer_audio");
        job.set_stage_progress("refer_audio", 50.0);
        // 2 of 6 done plus half of one more.
        assert!((job.progress - 250.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_truncates_error() {
        let mut job = ProcessingJob::new(JobType::Subtitle, "v");
        job.start();
        job.begin_stage("asr");
        job.fail_stage("asr", &"x".repeat(800));
        assert_eq!(job.status, JobStatus::Failed);
        let stage = job.stage("asr").unwrap();
        assert_eq!(stage.status, StageStatus::Failed);
        assert_eq!(stage.error.as_ref().unwrap().chars().count(), ERROR_DISPLAY_LIMIT + 3);
    }

    #[test]
    fn test_cancel_resets_running_stage() {
        let mut job = ProcessingJob::new(JobType::Subtitle, "v");
        job.start();
        job.begin_stage("asr");
        job.complete_stage("asr");
        job.begin_stage("split_nlp");
        job.cancel();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.stage("asr").unwrap().status, StageStatus::Completed);
        assert_eq!(job.stage("split_nlp").unwrap().status, StageStatus::Pending);
    }

    #[test]
    fn test_serialized_status_names() {
        let job = ProcessingJob::new(JobType::Subtitle, "v");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["job_type"], "subtitle");
        assert_eq!(json["stages"][0]["status"], "pending");
    }
}
