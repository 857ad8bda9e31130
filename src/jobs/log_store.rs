use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(format!("Unknown log level: {s}. Use INFO, WARNING or ERROR")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub job_id: Option<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub logs: Vec<LogEntry>,
    /// Pass back as `last_id` to continue after this page.
    pub next_id: u64,
    pub has_more: bool,
}

struct LogBuffer {
    entries: VecDeque<LogEntry>,
    next_id: u64,
}

/// Bounded, thread-safe store. Ids keep increasing across `clear`.
pub struct LogStore {
    inner: Mutex<LogBuffer>,
    capacity: usize,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogBuffer {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                next_id: 1,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn add(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        source: &str,
        job_id: Option<&str>,
        duration_ms: Option<u64>,
    ) -> u64 {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = buf.next_id;
        buf.next_id += 1;
        if buf.entries.len() == self.capacity {
            buf.entries.pop_front();
        }
        buf.entries.push_back(LogEntry {
            id,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            source: source.to_string(),
            job_id: job_id.map(str::to_string),
            duration_ms,
        });
        id
    }

    pub fn info(&self, message: impl Into<String>, source: &str) -> u64 {
        self.add(LogLevel::Info, message, source, None, None)
    }

    pub fn warning(&self, message: impl Into<String>, source: &str) -> u64 {
        self.add(LogLevel::Warning, message, source, None, None)
    }

    pub fn error(&self, message: impl Into<String>, source: &str) -> u64 {
        self.add(LogLevel::Error, message, source, None, None)
    }

    pub fn get_since(
        &self,
        last_id: u64,
        limit: usize,
        level: Option<LogLevel>,
        source: Option<&str>,
    ) -> LogPage {
        let buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching = buf.entries.iter().filter(|e| {
            e.id > last_id
                && level.map_or(true, |l| e.level == l)
                && source.map_or(true, |s| e.source == s)
        });

        let logs: Vec<LogEntry> = matching.by_ref().take(limit).cloned().collect();
        let has_more = matching.next().is_some();
        let next_id = logs.last().map_or(last_id, |e| e.id);

        LogPage {
            logs,
            next_id,
            has_more,
        }
    }

    pub fn clear(&self) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buf.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle that tags every entry with a job id.
#[derive(Clone)]
pub struct JobLogger {
    store: Arc<LogStore>,
    job_id: Option<String>,
}

impl JobLogger {
    pub fn new(store: Arc<LogStore>, job_id: Option<String>) -> Self {
        Self { store, job_id }
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.store
            .add(LogLevel::Info, message, source, self.job_id.as_deref(), None);
    }

    pub fn warning(&self, source: &str, message: impl Into<String>) {
        self.store
            .add(LogLevel::Warning, message, source, self.job_id.as_deref(), None);
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.store
            .add(LogLevel::Error, message, source, self.job_id.as_deref(), None);
    }

    pub fn timed(&self, source: &str, message: impl Into<String>, duration_ms: u64) {
        self.store.add(
            LogLevel::Info,
            message,
            source,
            self.job_id.as_deref(),
            Some(duration_ms),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase_and_survive_clear() {
        let store = LogStore::new(10);
        assert_eq!(store.info("a", "system"), 1);
        assert_eq!(store.info("b", "system"), 2);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.info("c", "system"), 3);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let store = LogStore::new(3);
        for i in 0..5 {
            store.info(format!("m{i}"), "system");
        }
        let page = store.get_since(0, 100, None, None);
        assert_eq!(page.logs.len(), 3);
        assert_eq!(page.logs[0].message, "m2");
        assert_eq!(page.next_id, 5);
    }

    #[test]
    fn test_get_since_paging_and_filters() {
        let store = LogStore::new(100);
        store.info("one", "asr");
        store.warning("two", "translate");
        store.error("three", "translate");
        store.info("four", "llm");

        let page = store.get_since(0, 2, None, None);
        assert_eq!(page.logs.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_id, 2);

        let rest = store.get_since(page.next_id, 10, None, None);
        assert_eq!(rest.logs.len(), 2);
        assert!(!rest.has_more);

        let translate = store.get_since(0, 10, None, Some("translate"));
        assert_eq!(translate.logs.len(), 2);

        let errors = store.get_since(0, 10, Some(LogLevel::Error), None);
        assert_eq!(errors.logs.len(), 1);
        assert_eq!(errors.logs[0].message, "three");

        let empty = store.get_since(4, 10, None, None);
        assert!(empty.logs.is_empty());
        assert_eq!(empty.next_id, 4);
    }

    #[test]
    fn test_job_logger_tags_entries() {
        let store = Arc::new(LogStore::default());
        let logger = JobLogger::new(store.clone(), Some("job-1".into()));
        logger.timed("llm", "request", 120);
        let page = store.get_since(0, 10, None, Some("llm"));
        assert_eq!(page.logs[0].job_id.as_deref(), Some("job-1"));
        assert_eq!(page.logs[0].duration_ms, Some(120));
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
