use super::log_store::{JobLogger, LogStore};
use super::JobType;
use crate::error::{Result, TransubError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const CANCEL_MARKER: &str = ".cancel_requested";

pub struct Session {
    output_dir: PathBuf,
    cancel: AtomicBool,
    logs: Arc<LogStore>,
    running: Mutex<HashMap<JobType, String>>,
}

impl Session {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_log_store(output_dir, Arc::new(LogStore::default()))
    }

    pub fn with_log_store(output_dir: impl Into<PathBuf>, logs: Arc<LogStore>) -> Self {
        Self {
            output_dir: output_dir.into(),
            cancel: AtomicBool::new(false),
            logs,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    pub fn logger(&self, job_id: &str) -> JobLogger {
        JobLogger::new(self.logs.clone(), Some(job_id.to_string()))
    }

    pub fn cancel_marker(&self) -> PathBuf {
        self.output_dir.join(CANCEL_MARKER)
    }

    /// Set the in-process flag and write the on-disk marker.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        let marker = self.cancel_marker();
        let written = std::fs::create_dir_all(&self.output_dir)
            .and_then(|_| std::fs::write(&marker, chrono::Utc::now().to_rfc3339()));
        if let Err(e) = written {
            warn!("Could not write cancel marker {:?}: {}", marker, e);
        }
        self.logs.warning("Cancellation requested", "system");
    }

    /// True when either the flag or the marker file is set, so a separate
    /// process can request cancellation too.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.cancel_marker().exists()
    }

    /// Clear the flag and remove the marker.
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        let marker = self.cancel_marker();
        if marker.exists() {
            if let Err(e) = std::fs::remove_file(&marker) {
                warn!("Could not remove cancel marker {:?}: {}", marker, e);
            }
        }
        debug!("Session reset");
    }

    /// Register `job_id` as the running job of its type.
    pub fn begin_job(&self, job_type: JobType, job_id: &str) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = running.get(&job_type) {
            return Err(TransubError::JobConflict(format!(
                "a {job_type} job is already running ({existing})"
            )));
        }
        running.insert(job_type, job_id.to_string());
        Ok(())
    }

    pub fn finish_job(&self, job_type: JobType) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&job_type);
    }

    pub fn running_job(&self, job_type: JobType) -> Option<String> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.get(&job_type).cloned()
    }
}
