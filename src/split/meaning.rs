// LLM-assisted sentence splitting
use crate::config::MeaningConfig;
use crate::error::{Result, TransubError};
use crate::llm::prompts::{split_prompt, BREAK_MARKER};
use crate::llm::LlmClient;
use crate::split::SentenceUnit;
use crate::text::{language_name, similarity_ignoring_space, token_count};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const CACHE_SCOPE: &str = "split_by_meaning";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SplitReply {
    #[serde(default)]
    analysis: String,
    split1: String,
    #[serde(default)]
    split2: Option<String>,
    #[serde(default)]
    assess: String,
    #[serde(default)]
    choice: serde_json::Value,
}

impl SplitReply {
    /// The proposal the model picked; falls back to the first one.
    fn chosen(&self) -> &str {
        let second = match &self.choice {
            serde_json::Value::String(s) => s.trim() == "2",
            serde_json::Value::Number(n) => n.as_u64() == Some(2),
            _ => false,
        };
        match (&self.split2, second) {
            (Some(split2), true) => split2,
            _ => &self.split1,
        }
    }
}

pub struct MeaningSplitter {
    llm: LlmClient,
    language: String,
    max_split_length: usize,
    relocation_floor: f64,
    passes: usize,
    max_workers: usize,
}

impl MeaningSplitter {
    pub fn new(llm: LlmClient, language: impl Into<String>) -> Self {
        let defaults = MeaningConfig::default();
        Self {
            llm,
            language: language.into(),
            max_split_length: defaults.max_split_length,
            relocation_floor: defaults.relocation_floor,
            passes: defaults.passes,
            max_workers: 4,
        }
    }

    pub fn from_config(llm: LlmClient, language: &str, config: &MeaningConfig) -> Self {
        Self::new(llm, language)
            .with_max_split_length(config.max_split_length)
            .with_relocation_floor(config.relocation_floor)
            .with_passes(config.passes)
    }

    pub fn with_max_split_length(mut self, max: usize) -> Self {
        self.max_split_length = max.max(1);
        self
    }

    pub fn with_relocation_floor(mut self, floor: f64) -> Self {
        self.relocation_floor = floor;
        self
    }

    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = passes;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Split one sentence into `num_parts` parts of at most `word_limit` words.
    ///
    /// The model's break markers are relocated onto the original text, so the
    /// parts are always slices of `sentence`.
    pub async fn split_sentence(
        &self,
        sentence: &str,
        num_parts: usize,
        word_limit: usize,
    ) -> Result<Vec<String>> {
        let prompt = split_prompt(sentence, num_parts, word_limit, &language_name(&self.language));
        let floor = self.relocation_floor;

        let reply: SplitReply = self
            .llm
            .ask_json(&prompt, CACHE_SCOPE, |reply: &SplitReply| {
                let chosen = reply.chosen();
                if !chosen.contains(BREAK_MARKER) {
                    return Err(format!("split has no {BREAK_MARKER} marker: {chosen}"));
                }
                relocate_breaks(sentence, chosen, floor)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| match e {
                TransubError::InvalidResponse(msg) => {
                    TransubError::Alignment(format!("could not split '{sentence}': {msg}"))
                }
                other => other,
            })?;

        let cuts = relocate_breaks(sentence, reply.chosen(), floor)?;
        let parts = cut_at(sentence, &cuts);
        debug!("Meaning split into {} parts: {:?}", parts.len(), parts);
        Ok(parts)
    }

    /// Repeatedly split every sentence longer than the configured limit.
    /// Parts keep the `origin_index` of the sentence they came from.
    pub async fn split_all(&self, units: Vec<SentenceUnit>) -> Result<Vec<SentenceUnit>> {
        let mut units = units;

        for pass in 1..=self.passes {
            let long: Vec<usize> = units
                .iter()
                .enumerate()
                .filter(|(_, u)| token_count(&u.text, &self.language) > self.max_split_length)
                .map(|(i, _)| i)
                .collect();
            if long.is_empty() {
                break;
            }
            info!(
                "Meaning split pass {}/{}: {} long sentences",
                pass,
                self.passes,
                long.len()
            );

            let semaphore = Arc::new(Semaphore::new(self.max_workers));
            let mut futures = FuturesUnordered::new();

            for &i in &long {
                let sem = semaphore.clone();
                let text = units[i].text.clone();
                futures.push(async move {
                    let _permit = sem
                        .acquire()
                        .await
                        .map_err(|e| TransubError::Api(format!("Semaphore error: {e}")))?;
                    let tokens = token_count(&text, &self.language);
                    let num_parts = tokens.div_ceil(self.max_split_length).max(2);
                    let parts = self
                        .split_sentence(&text, num_parts, self.max_split_length)
                        .await?;
                    Ok::<_, TransubError>((i, parts))
                });
            }

            let mut results = Vec::with_capacity(long.len());
            while let Some(result) = futures.next().await {
                results.push(result?);
            }
            results.sort_by_key(|(i, _)| *i);

            let mut replacements = results.into_iter().peekable();
            let mut next = Vec::with_capacity(units.len() + long.len());
            for (i, unit) in units.into_iter().enumerate() {
                match replacements.next_if(|(j, _)| *j == i) {
                    Some((_, parts)) => next.extend(
                        parts
                            .into_iter()
                            .map(|text| SentenceUnit::new(text, unit.origin_index)),
                    ),
                    None => next.push(unit),
                }
            }
            units = next;
        }

        let still_long = units
            .iter()
            .filter(|u| token_count(&u.text, &self.language) > self.max_split_length)
            .count();
        if still_long > 0 {
            warn!(
                "{} sentences still exceed {} tokens after meaning split",
                still_long, self.max_split_length
            );
        }
        Ok(units)
    }
}

/// Locate each break of `split_text` in `original`.
///
/// For every part but the last, scan candidate cut offsets from the previous
/// cut and keep the one whose left side is most similar to the part, ignoring
/// whitespace. A best match below `floor` fails with [`TransubError::Alignment`].
/// Returns byte offsets into `original`.
pub fn relocate_breaks(original: &str, split_text: &str, floor: f64) -> Result<Vec<usize>> {
    let parts: Vec<&str> = split_text.split(BREAK_MARKER).collect();
    let boundaries: Vec<usize> = original
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(original.len()))
        .collect();

    let mut cuts = Vec::with_capacity(parts.len().saturating_sub(1));
    let mut start = 0;

    for part in &parts[..parts.len() - 1] {
        let mut best: Option<(usize, f64)> = None;
        for &j in boundaries.iter().filter(|&&j| j > start) {
            let score = similarity_ignoring_space(&original[start..j], part);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((j, score));
            }
        }

        match best {
            Some((j, score)) if score >= floor => {
                if score < 0.9 {
                    warn!("Low similarity {:.2} at split point for '{}'", score, part.trim());
                }
                cuts.push(j);
                start = j;
            }
            Some((_, score)) => {
                return Err(TransubError::Alignment(format!(
                    "best split point for '{}' only reaches similarity {:.2} (floor {:.2})",
                    part.trim(),
                    score,
                    floor
                )));
            }
            None => {
                return Err(TransubError::Alignment(format!(
                    "no room left in '{original}' for part '{}'",
                    part.trim()
                )));
            }
        }
    }

    Ok(cuts)
}

fn cut_at(original: &str, cuts: &[usize]) -> Vec<String> {
    let mut parts = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        parts.push(original[start..cut].trim().to_string());
        start = cut;
    }
    parts.push(original[start..].trim().to_string());
    parts.retain(|p| !p.is_empty());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{client, ScriptedBackend};

    const LONG: &str =
        "A very long sentence that needs splitting into two roughly equal parts for subtitles";

    #[test]
    fn test_relocate_exact_break() {
        let cuts = relocate_breaks(
            LONG,
            "A very long sentence that needs splitting [br] into two roughly equal parts for subtitles",
            0.8,
        )
        .unwrap();
        let parts = cut_at(LONG, &cuts);
        assert_eq!(parts[0], "A very long sentence that needs splitting");
        assert_eq!(parts.join(" "), LONG);
    }

    #[test]
    fn test_relocate_tolerates_small_rewrites() {
        let cuts = relocate_breaks(
            "Well, I think we should go now because it is late",
            "Well I think we should go now[br]because it's late",
            0.8,
        )
        .unwrap();
        let parts = cut_at("Well, I think we should go now because it is late", &cuts);
        assert_eq!(parts, vec!["Well, I think we should go now", "because it is late"]);
    }

    #[test]
    fn test_relocate_fails_below_floor() {
        let err = relocate_breaks("short text here", "completely different words[br]x", 0.8);
        assert!(matches!(err, Err(TransubError::Alignment(_))));
    }

    fn split_reply(split1: &str, split2: &str, choice: &str) -> String {
        serde_json::json!({
            "analysis": "a",
            "split1": split1,
            "split2": split2,
            "assess": "b",
            "choice": choice,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_split_sentence_scenario() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Ok(split_reply(
                "A very long sentence[br]that needs splitting into two roughly equal parts for subtitles",
                "A very long sentence that needs splitting[br]into two roughly equal parts for subtitles",
                "2",
            ))
        }));
        let splitter = MeaningSplitter::new(client(backend), "en");
        let parts = splitter.split_sentence(LONG, 2, 8).await.unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts.join(" "), LONG);
        let (a, b) = (parts[0].len() as f64, parts[1].len() as f64);
        assert!(a.max(b) / a.min(b) < 1.5);
    }

    #[tokio::test]
    async fn test_unrelocatable_reply_is_alignment_error() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Ok(split_reply("nothing like it[br]at all", "nope[br]nope", "1"))
        }));
        let splitter = MeaningSplitter::new(client(backend.clone()).with_retries(2), "en");
        let err = splitter.split_sentence(LONG, 2, 8).await.unwrap_err();
        assert!(matches!(err, TransubError::Alignment(_)));
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_split_all_keeps_order_and_origin() {
        let backend = Arc::new(ScriptedBackend::new(|prompt| {
            assert!(prompt.contains(LONG));
            Ok(split_reply(
                "A very long sentence that needs splitting[br]into two roughly equal parts for subtitles",
                "",
                "1",
            ))
        }));
        let splitter = MeaningSplitter::new(client(backend.clone()), "en").with_max_split_length(10);
        let units = vec![
            SentenceUnit::new("Short one.", 0),
            SentenceUnit::new(LONG, 1),
            SentenceUnit::new("Another short one.", 2),
        ];

        let out = splitter.split_all(units).await.unwrap();
        let texts: Vec<&str> = out.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Short one.",
                "A very long sentence that needs splitting",
                "into two roughly equal parts for subtitles",
                "Another short one."
            ]
        );
        assert_eq!(out[1].origin_index, 1);
        assert_eq!(out[2].origin_index, 1);
        assert_eq!(backend.call_count(), 1);
    }
}
