use crate::config::SubtitleConfig;
use crate::error::{Result, TransubError};
use crate::llm::prompts::align_prompt;
use crate::llm::LlmClient;
use crate::split::meaning::MeaningSplitter;
use crate::text::{display_width, is_unspaced, language_name, token_count};
use crate::translate::TranslationRow;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const CACHE_SCOPE: &str = "align_subs";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlignReply {
    #[serde(default)]
    analysis: String,
    align: Vec<HashMap<String, String>>,
}

impl AlignReply {
    fn target_parts(&self) -> Vec<String> {
        self.align
            .iter()
            .enumerate()
            .map(|(i, part)| {
                part.get(&format!("target_part_{}", i + 1))
                    .map(|t| t.trim().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

pub struct BilingualAligner {
    llm: LlmClient,
    src_lang: String,
    tgt_lang: String,
}

impl BilingualAligner {
    pub fn new(llm: LlmClient, src_lang: impl Into<String>, tgt_lang: impl Into<String>) -> Self {
        Self {
            llm,
            src_lang: src_lang.into(),
            tgt_lang: tgt_lang.into(),
        }
    }

    /// Split `tr_sub` into one part per entry of `src_parts`.
    ///
    /// A reply with the wrong number of parts, or an empty part, is rejected
    /// and retried. When retries run out the translation is cut in proportion
    /// to the source part lengths instead.
    pub async fn align(&self, src_sub: &str, tr_sub: &str, src_parts: &[String]) -> Result<Vec<String>> {
        if src_parts.len() < 2 {
            return Ok(vec![tr_sub.trim().to_string()]);
        }

        let prompt = align_prompt(
            src_sub,
            tr_sub,
            src_parts,
            &language_name(&self.src_lang),
            &language_name(&self.tgt_lang),
        );
        let expected = src_parts.len();

        let reply = self
            .llm
            .ask_json(&prompt, CACHE_SCOPE, |reply: &AlignReply| {
                let parts = reply.target_parts();
                if parts.len() != expected {
                    return Err(format!("expected {} aligned parts, got {}", expected, parts.len()));
                }
                if let Some(i) = parts.iter().position(String::is_empty) {
                    return Err(format!("aligned part {} is empty", i + 1));
                }
                Ok(())
            })
            .await;

        match reply {
            Ok(reply) => Ok(reply.target_parts()),
            Err(TransubError::InvalidResponse(msg)) => {
                warn!("Alignment reply unusable ({}), splitting proportionally: {}", msg, tr_sub);
                let weights: Vec<usize> = src_parts.iter().map(|p| p.chars().count()).collect();
                Ok(proportional_split(tr_sub, &weights, &self.tgt_lang))
            }
            Err(e) => Err(e),
        }
    }
}

/// Cut `text` into `weights.len()` parts whose lengths follow `weights`.
/// Spaced scripts are cut on whitespace, unspaced ones between characters.
pub fn proportional_split(text: &str, weights: &[usize], language: &str) -> Vec<String> {
    let n = weights.len().max(1);
    let text = text.trim();
    let total_weight: usize = weights.iter().sum::<usize>().max(1);

    let units: Vec<String> = if is_unspaced(language) {
        text.chars().filter(|c| !c.is_whitespace()).map(String::from).collect()
    } else {
        text.split_whitespace().map(str::to_string).collect()
    };
    let joiner = if is_unspaced(language) { "" } else { " " };

    let unit_len: Vec<usize> = units.iter().map(|u| u.chars().count()).collect();
    let total_len: usize = unit_len.iter().sum::<usize>().max(1);

    let mut parts = Vec::with_capacity(n);
    let mut start = 0;
    let mut consumed = 0;
    let mut cumulative_weight = 0;
    for (k, weight) in weights.iter().enumerate() {
        if k + 1 == n {
            parts.push(units[start..].join(joiner));
            break;
        }
        cumulative_weight += weight;
        let target = total_len * cumulative_weight / total_weight;
        // Leave at least one unit for each remaining part.
        let max_end = units.len().saturating_sub(n - k - 1);
        let mut end = start;
        while end < max_end && (end == start || consumed + unit_len[end] <= target) {
            consumed += unit_len[end];
            end += 1;
        }
        parts.push(units[start..end].join(joiner));
        start = end;
    }
    parts.resize(n, String::new());
    parts
}

/// Keeps splitting rows until every source and translation fits on screen.
pub struct LongLineSplitter {
    splitter: MeaningSplitter,
    aligner: BilingualAligner,
    src_lang: String,
    max_length: usize,
    target_multiplier: f64,
    rounds: usize,
    max_workers: usize,
}

impl LongLineSplitter {
    pub fn new(splitter: MeaningSplitter, aligner: BilingualAligner, src_lang: impl Into<String>) -> Self {
        Self::from_config(splitter, aligner, &src_lang.into(), &SubtitleConfig::default())
    }

    pub fn from_config(
        splitter: MeaningSplitter,
        aligner: BilingualAligner,
        src_lang: &str,
        config: &SubtitleConfig,
    ) -> Self {
        Self {
            splitter,
            aligner,
            src_lang: src_lang.to_string(),
            max_length: config.max_length,
            target_multiplier: config.target_multiplier,
            rounds: config.split_rounds,
            max_workers: 4,
        }
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn too_long(&self, row: &TranslationRow) -> bool {
        row.source.chars().count() > self.max_length
            || display_width(&row.translation) * self.target_multiplier > self.max_length as f64
    }

    /// Split every over-long row in two, for up to the configured number of
    /// rounds. Rows come back untimed; timing is re-derived afterwards.
    pub async fn split_rows(&self, rows: Vec<TranslationRow>) -> Result<Vec<TranslationRow>> {
        let mut rows = rows;

        for round in 1..=self.rounds {
            let long: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(_, r)| self.too_long(r) && token_count(&r.source, &self.src_lang) >= 2)
                .map(|(i, _)| i)
                .collect();
            if long.is_empty() {
                break;
            }
            info!("Subtitle split round {}/{}: {} long lines", round, self.rounds, long.len());

            let splits: Vec<(usize, Vec<TranslationRow>)> = stream::iter(long)
                .map(|i| {
                    let row = &rows[i];
                    async move { Ok::<_, TransubError>((i, self.split_row(row).await?)) }
                })
                .buffered(self.max_workers)
                .try_collect()
                .await?;

            let mut replacements = splits.into_iter().peekable();
            let mut next = Vec::with_capacity(rows.len() * 2);
            for (i, row) in rows.into_iter().enumerate() {
                match replacements.next_if(|(j, _)| *j == i) {
                    Some((_, parts)) => next.extend(parts),
                    None => next.push(row),
                }
            }
            rows = next;
        }

        let remaining = rows.iter().filter(|r| self.too_long(r)).count();
        if remaining > 0 {
            warn!("{} subtitle lines still exceed {} characters", remaining, self.max_length);
        }
        Ok(rows)
    }

    async fn split_row(&self, row: &TranslationRow) -> Result<Vec<TranslationRow>> {
        let word_limit = token_count(&row.source, &self.src_lang).div_ceil(2).max(1);
        let src_parts = self.splitter.split_sentence(&row.source, 2, word_limit).await?;
        let tr_parts = self.aligner.align(&row.source, &row.translation, &src_parts).await?;
        debug!("Split subtitle line: {:?} / {:?}", src_parts, tr_parts);

        Ok(src_parts
            .into_iter()
            .zip(tr_parts.into_iter().chain(std::iter::repeat(String::new())))
            .map(|(src, tr)| TranslationRow::new(src, tr))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{client, ScriptedBackend};
    use std::sync::Arc;

    #[test]
    fn test_proportional_split_on_words() {
        let parts = proportional_split("one two three four", &[5, 5], "en");
        assert_eq!(parts, vec!["one two", "three four"]);
    }

    #[test]
    fn test_proportional_split_on_chars() {
        let parts = proportional_split("今天天气很好", &[2, 1], "zh");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.concat(), "今天天气很好");
        assert!(parts.iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn test_proportional_split_never_leaves_empty_parts() {
        let parts = proportional_split("a b", &[100, 1], "en");
        assert_eq!(parts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_align_returns_model_parts() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Ok(serde_json::json!({
                "analysis": "ok",
                "align": [
                    {"src_part_1": "Hello there", "target_part_1": "你好"},
                    {"src_part_2": "my friend", "target_part_2": "我的朋友"}
                ]
            })
            .to_string())
        }));
        let aligner = BilingualAligner::new(client(backend), "en", "zh");
        let parts = aligner
            .align(
                "Hello there my friend",
                "你好我的朋友",
                &["Hello there".to_string(), "my friend".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(parts, vec!["你好", "我的朋友"]);
    }

    #[tokio::test]
    async fn test_count_mismatch_falls_back_to_proportional() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Ok(r#"{"analysis": "x", "align": [{"src_part_1": "a", "target_part_1": "一二三四"}]}"#
                .to_string())
        }));
        let llm = client(backend.clone()).with_retries(2);
        let aligner = BilingualAligner::new(llm, "en", "zh");
        let parts = aligner
            .align("ab cd", "一二三四", &["ab".to_string(), "cd".to_string()])
            .await
            .unwrap();
        assert_eq!(backend.call_count(), 2);
        assert_eq!(parts, vec!["一二", "三四"]);
    }

    #[tokio::test]
    async fn test_long_rows_are_split_and_short_rows_kept() {
        let long_src = "This sentence is far too long to fit, so it has to become two lines";
        let backend = Arc::new(ScriptedBackend::new(move |prompt| {
            if prompt.contains("\"align\"") {
                Ok(serde_json::json!({
                    "analysis": "",
                    "align": [
                        {"src_part_1": "", "target_part_1": "这句话太长了"},
                        {"src_part_2": "", "target_part_2": "所以要分成两行"}
                    ]
                })
                .to_string())
            } else {
                Ok(serde_json::json!({
                    "analysis": "",
                    "split1": "This sentence is far too long to fit, [br] so it has to become two lines",
                    "assess": "",
                    "choice": "1"
                })
                .to_string())
            }
        }));
        let llm = client(backend);
        let config = SubtitleConfig {
            max_length: 40,
            ..SubtitleConfig::default()
        };
        let splitter = LongLineSplitter::from_config(
            MeaningSplitter::new(llm.clone(), "en"),
            BilingualAligner::new(llm, "en", "zh"),
            "en",
            &config,
        );

        let rows = splitter
            .split_rows(vec![
                TranslationRow::new("Short one.", "短的"),
                TranslationRow::new(long_src, "这句话太长了所以要分成两行"),
            ])
            .await
            .unwrap();

        let sources: Vec<&str> = rows.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(
            sources,
            vec!["Short one.", "This sentence is far too long to fit,", "so it has to become two lines"]
        );
        assert_eq!(rows[2].translation, "所以要分成两行");
    }
}
