// LLM reply cache
use crate::error::{Result, TransubError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Scope that collects replies which failed validation.
pub const ERROR_SCOPE: &str = "error";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub model: String,
    pub prompt: String,
    pub resp_type: String,
    pub resp_content: String,
    pub resp: serde_json::Value,
    #[serde(default)]
    pub message: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

impl CacheEntry {
    pub fn new(
        model: &str,
        prompt: &str,
        resp_type: &str,
        resp_content: &str,
        resp: serde_json::Value,
    ) -> Self {
        Self {
            key: cache_key(prompt, resp_type),
            model: model.to_string(),
            prompt: prompt.to_string(),
            resp_type: resp_type.to_string(),
            resp_content: resp_content.to_string(),
            resp,
            message: None,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            duration_seconds: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

/// Hex sha256 over response type and prompt.
pub fn cache_key(prompt: &str, resp_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resp_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Reads and writes are serialized so concurrent workers never interleave a
/// read-modify-write of the same scope file.
pub struct LlmCache {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl LlmCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lookup(
        &self,
        scope: &str,
        prompt: &str,
        resp_type: &str,
    ) -> Result<Option<serde_json::Value>> {
        let _guard = self.guard()?;
        let key = cache_key(prompt, resp_type);
        let hit = read_scope(&self.scope_path(scope))?
            .into_iter()
            .find(|e| e.key == key && e.prompt == prompt && e.resp_type == resp_type)
            .map(|e| e.resp);
        if hit.is_some() {
            debug!("Cache hit in scope '{}' ({})", scope, &key[..12]);
        }
        Ok(hit)
    }

    pub fn store(&self, scope: &str, entry: CacheEntry) -> Result<()> {
        let _guard = self.guard()?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.scope_path(scope);
        let mut entries = read_scope(&path)?;
        entries.push(entry);
        std::fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    /// Keep a rejected reply for diagnosis without ever serving it as a hit.
    pub fn record_error(&self, entry: CacheEntry) -> Result<()> {
        self.store(ERROR_SCOPE, entry)
    }

    pub fn entries(&self, scope: &str) -> Result<Vec<CacheEntry>> {
        let _guard = self.guard()?;
        read_scope(&self.scope_path(scope))
    }

    fn scope_path(&self, scope: &str) -> PathBuf {
        let name: String = scope
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| TransubError::Api("LLM cache lock poisoned".to_string()))
    }
}

fn read_scope(path: &Path) -> Result<Vec<CacheEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_depends_on_type_and_prompt() {
        assert_eq!(cache_key("p", "json"), cache_key("p", "json"));
        assert_ne!(cache_key("p", "json"), cache_key("p", "text"));
        assert_ne!(cache_key("p", "json"), cache_key("q", "json"));
        assert_eq!(cache_key("p", "json").len(), 64);
    }

    #[test]
    fn test_store_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::new(dir.path().join("gpt_log"));

        assert!(cache.lookup("translate", "hi", "json").unwrap().is_none());
        cache
            .store(
                "translate",
                CacheEntry::new("m", "hi", "json", "{\"a\":1}", json!({"a": 1})),
            )
            .unwrap();

        assert_eq!(
            cache.lookup("translate", "hi", "json").unwrap(),
            Some(json!({"a": 1}))
        );
        // Scopes are isolated.
        assert!(cache.lookup("split", "hi", "json").unwrap().is_none());
    }

    #[test]
    fn test_errors_are_not_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LlmCache::new(dir.path());
        cache
            .record_error(
                CacheEntry::new("m", "hi", "json", "oops", json!(null)).with_message("bad shape"),
            )
            .unwrap();

        assert!(cache.lookup("default", "hi", "json").unwrap().is_none());
        let errors = cache.entries(ERROR_SCOPE).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message.as_deref(), Some("bad shape"));
    }
}
