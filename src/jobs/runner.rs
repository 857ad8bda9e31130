use super::log_store::{JobLogger, LogPage};
use super::session::Session;
use super::{JobStatus, ProcessingJob};
use crate::error::{Result, TransubError};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Skipped,
}

/// A job made of named stages, run in the order of
/// [`JobType::stage_names`](super::JobType::stage_names).
#[async_trait]
pub trait StagePipeline: Send + Sync {
    fn job_type(&self) -> super::JobType;

    fn video_id(&self) -> &str;

    async fn run_stage(&self, stage: &str, ctx: &StageContext) -> Result<StageOutcome>;
}

/// What a stage sees of the job it belongs to.
pub struct StageContext {
    job: Arc<RwLock<ProcessingJob>>,
    stage: String,
    logger: JobLogger,
    session: Arc<Session>,
}

impl StageContext {
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Report in-stage progress (0 to 100).
    pub fn progress(&self, percent: f64) {
        let mut job = self.job.write().unwrap_or_else(|e| e.into_inner());
        job.set_stage_progress(&self.stage, percent);
    }

    /// Owned progress callback for components that report from other tasks.
    pub fn reporter(&self) -> Arc<dyn Fn(f64) + Send + Sync> {
        let job = self.job.clone();
        let stage = self.stage.clone();
        Arc::new(move |percent| {
            let mut job = job.write().unwrap_or_else(|e| e.into_inner());
            job.set_stage_progress(&stage, percent);
        })
    }
}

/// Clears the session's cancel state and running-job slot however the job ends.
struct SessionGuard {
    session: Arc<Session>,
    job_type: super::JobType,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.finish_job(self.job_type);
        self.session.reset();
    }
}

pub struct JobRunner {
    session: Arc<Session>,
}

impl JobRunner {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Register the job and spawn it. Fails with `JobConflict` when a job of
    /// the same type is already running. Must be called inside a Tokio runtime.
    pub fn start<P>(&self, pipeline: Arc<P>) -> Result<JobHandle>
    where
        P: StagePipeline + 'static,
    {
        let job = ProcessingJob::new(pipeline.job_type(), pipeline.video_id());
        self.session.begin_job(job.job_type, &job.id)?;
        // A stale marker from an earlier run must not cancel this one.
        self.session.reset();

        let id = job.id.clone();
        let record = Arc::new(RwLock::new(job));
        let guard = SessionGuard {
            session: self.session.clone(),
            job_type: pipeline.job_type(),
        };

        let task = tokio::spawn(run_job(pipeline, self.session.clone(), record.clone(), guard));

        Ok(JobHandle {
            id,
            job: record,
            session: self.session.clone(),
            task,
        })
    }
}

async fn run_job<P: StagePipeline>(
    pipeline: Arc<P>,
    session: Arc<Session>,
    record: Arc<RwLock<ProcessingJob>>,
    _guard: SessionGuard,
) {
    let (job_id, job_type, stages) = {
        let mut job = record.write().unwrap_or_else(|e| e.into_inner());
        job.start();
        (job.id.clone(), job.job_type, job.job_type.stage_names())
    };
    let logger = session.logger(&job_id);
    logger.info("system", format!("Started {job_type} job {job_id}"));

    for (i, stage) in stages.iter().enumerate() {
        if session.is_cancel_requested() {
            info!("Job {} cancelled before stage {}", job_id, stage);
            logger.warning("system", format!("Job cancelled before stage {stage}"));
            write(&record).cancel();
            return;
        }

        info!("Stage {}/{}: {}", i + 1, stages.len(), stage);
        logger.info("system", format!("Stage {}/{}: {}", i + 1, stages.len(), stage));
        write(&record).begin_stage(stage);

        let ctx = StageContext {
            job: record.clone(),
            stage: stage.to_string(),
            logger: logger.clone(),
            session: session.clone(),
        };

        match pipeline.run_stage(stage, &ctx).await {
            Ok(StageOutcome::Completed) => write(&record).complete_stage(stage),
            Ok(StageOutcome::Skipped) => {
                logger.info("system", format!("Stage {stage} skipped"));
                write(&record).skip_stage(stage);
            }
            Err(TransubError::Cancelled) => {
                logger.warning("system", format!("Job cancelled during stage {stage}"));
                write(&record).cancel();
                return;
            }
            Err(e) => {
                let message = e.to_string();
                error!("Stage {} failed: {}", stage, message);
                logger.error("system", format!("Stage {stage} failed: {message}"));
                write(&record).fail_stage(stage, &message);
                return;
            }
        }
    }

    write(&record).complete();
    logger.info("system", format!("Job {job_id} completed"));
}

fn write(record: &RwLock<ProcessingJob>) -> std::sync::RwLockWriteGuard<'_, ProcessingJob> {
    record.write().unwrap_or_else(|e| e.into_inner())
}

pub struct JobHandle {
    id: String,
    job: Arc<RwLock<ProcessingJob>>,
    session: Arc<Session>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of the job record as of now.
    pub fn snapshot(&self) -> ProcessingJob {
        self.job.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot().status.is_terminal()
    }

    /// Ask the job to stop at the next stage boundary.
    pub fn cancel(&self) {
        if self.is_finished() {
            warn!("Job {} already finished, ignoring cancel", self.id);
            return;
        }
        self.session.request_cancel();
    }

    pub fn logs_since(&self, last_id: u64, limit: usize) -> LogPage {
        self.session.logs().get_since(last_id, limit, None, None)
    }

    /// Wait for the job task and return the final record.
    pub async fn wait(self) -> Result<ProcessingJob> {
        let record = self.job.clone();
        self.task.await?;
        let job = record.read().unwrap_or_else(|e| e.into_inner()).clone();
        if job.status == JobStatus::Running {
            warn!("Job {} ended while still marked running", job.id);
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobType, StageStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Dubbing-typed pipeline whose stages count calls and can fail or cancel.
    struct FakePipeline {
        calls: AtomicUsize,
        fail_at: Option<&'static str>,
        cancel_after: Option<&'static str>,
        skip: Option<&'static str>,
    }

    impl FakePipeline {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_at: None,
                cancel_after: None,
                skip: None,
            }
        }
    }

    #[async_trait]
    impl StagePipeline for FakePipeline {
        fn job_type(&self) -> JobType {
            JobType::Dubbing
        }

        fn video_id(&self) -> &str {
            "video"
        }

        async fn run_stage(&self, stage: &str, ctx: &StageContext) -> Result<StageOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.progress(50.0);
            if self.fail_at == Some(stage) {
                return Err(TransubError::Media("x".repeat(700)));
            }
            if self.cancel_after == Some(stage) {
                ctx.session().request_cancel();
            }
            if self.skip == Some(stage) {
                return Ok(StageOutcome::Skipped);
            }
            Ok(StageOutcome::Completed)
        }
    }

    fn runner() -> (tempfile::TempDir, JobRunner) {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new(dir.path()));
        (dir, JobRunner::new(session))
    }

    #[tokio::test]
    async fn test_job_runs_every_stage() {
        let (_dir, runner) = runner();
        let pipeline = Arc::new(FakePipeline {
            skip: Some("refer_audio"),
            ..FakePipeline::new()
        });
        let job = runner.start(pipeline.clone()).unwrap().wait().await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 6);
        assert_eq!(job.stage("refer_audio").unwrap().status, StageStatus::Skipped);
        assert!((job.progress - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_wait_returns_final_record() {
        let (_dir, runner) = runner();
        let handle = runner.start(Arc::new(FakePipeline::new())).unwrap();
        let id = handle.id().to_string();
        let job = handle.wait().await.unwrap();

        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.stages.iter().all(|s| s.status == StageStatus::Completed));
    }

    #[tokio::test]
    async fn test_cancel_between_stages() {
        let (dir, runner) = runner();
        let pipeline = Arc::new(FakePipeline {
            cancel_after: Some("dub_chunks"),
            ..FakePipeline::new()
        });
        let job = runner.start(pipeline.clone()).unwrap().wait().await.unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.stage("dub_chunks").unwrap().status, StageStatus::Completed);
        assert_eq!(job.stage("refer_audio").unwrap().status, StageStatus::Pending);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 2);
        // Cleanup cleared the marker.
        assert!(!dir.path().join(crate::jobs::session::CANCEL_MARKER).exists());
        assert!(!runner.session().is_cancel_requested());
    }

    #[tokio::test]
    async fn test_stage_failure_is_recorded() {
        let (_dir, runner) = runner();
        let pipeline = Arc::new(FakePipeline {
            fail_at: Some("gen_audio"),
            ..FakePipeline::new()
        });
        let handle = runner.start(pipeline).unwrap();
        let session = runner.session().clone();
        let job = handle.wait().await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        let stage = job.stage("gen_audio").unwrap();
        assert_eq!(stage.status, StageStatus::Failed);
        assert!(stage.error.as_ref().unwrap().chars().count() <= 503);

        // The full message is kept in the log sink.
        let page = session.logs().get_since(0, 100, Some(crate::jobs::LogLevel::Error), None);
        assert!(page.logs.iter().any(|e| e.message.len() > 700));
        assert!(session.running_job(JobType::Dubbing).is_none());
    }

    #[tokio::test]
    async fn test_conflicting_job_is_rejected() {
        let (_dir, runner) = runner();
        runner
            .session()
            .begin_job(JobType::Dubbing, "other")
            .unwrap();
        let result = runner.start(Arc::new(FakePipeline::new()));
        assert!(matches!(result, Err(TransubError::JobConflict(_))));
    }
}
