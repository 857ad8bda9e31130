use crate::error::Result;
use crate::llm::prompts::trim_prompt;
use crate::llm::LlmClient;
use crate::translate::TranslationRow;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CACHE_SCOPE: &str = "trim";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrimReply {
    #[serde(default)]
    analysis: String,
    result: String,
}

pub struct SubtitleLengthTrimmer {
    llm: LlmClient,
    min_duration: f64,
    max_workers: usize,
}

impl SubtitleLengthTrimmer {
    pub fn new(llm: LlmClient, min_duration: f64) -> Self {
        Self {
            llm,
            min_duration,
            max_workers: 4,
        }
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Rewrite `text` when `duration` exceeds the minimum, otherwise return it
    /// untouched without asking the model.
    pub async fn trim(&self, text: &str, duration: f64) -> Result<String> {
        if duration <= self.min_duration || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let reply: TrimReply = self
            .llm
            .ask_json(&trim_prompt(text, duration), CACHE_SCOPE, |r: &TrimReply| {
                if r.result.trim().is_empty() {
                    Err("empty trim result".to_string())
                } else {
                    Ok(())
                }
            })
            .await?;

        debug!("Trimmed '{}' -> '{}'", text, reply.result);
        Ok(reply.result.trim().to_string())
    }

    /// Trim the translation of every row, keeping row order.
    pub async fn trim_rows(&self, rows: Vec<TranslationRow>) -> Result<Vec<TranslationRow>> {
        let candidates = rows.iter().filter(|r| r.duration > self.min_duration).count();
        info!(
            "Trimming {} of {} lines longer than {:.1}s",
            candidates,
            rows.len(),
            self.min_duration
        );

        stream::iter(rows)
            .map(|mut row| async move {
                row.translation = self.trim(&row.translation, row.duration).await?;
                Ok::<_, crate::error::TransubError>(row)
            })
            .buffered(self.max_workers)
            .try_collect()
            .await
    }
}
