//! Concurrent two-pass chunk translation and reassembly into line order.

use crate::error::{Result, TransubError};
use crate::jobs::log_store::JobLogger;
use crate::llm::prompts::{expressiveness_prompt, faithfulness_prompt, shared_prompt};
use crate::llm::LlmClient;
use crate::text::{language_name, similarity};
use crate::translate::{LineTranslation, Terminology, TranslationChunk, TranslationRow};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const FAITHFULNESS_SCOPE: &str = "translate_faithfulness";
const EXPRESSIVENESS_SCOPE: &str = "translate_expressiveness";

/// Called with `(completed, total)` chunks as translation advances.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

type LineField = fn(&LineTranslation) -> &String;

/// Translation of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub index: usize,
    pub lines: Vec<LineTranslation>,
}

impl ChunkResult {
    /// Source text as echoed back by the model, one entry per line.
    pub fn origins(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.origin.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct TranslationOutput {
    /// Chunk results sorted by chunk index.
    pub results: Vec<ChunkResult>,
    /// Source/translation pairs in line order, without timing.
    pub rows: Vec<TranslationRow>,
}

impl TranslationOutput {
    pub fn lines(&self) -> Vec<LineTranslation> {
        self.results.iter().flat_map(|r| r.lines.clone()).collect()
    }

    /// Non-empty echoed origins in line order.
    pub fn origins(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|r| r.lines.iter())
            .map(|l| l.origin.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}

pub struct ChunkTranslator {
    llm: LlmClient,
    src_lang: String,
    tgt_lang: String,
    terminology: Arc<Terminology>,
    max_workers: usize,
    reflect: bool,
    match_floor: f64,
    show_progress: bool,
    on_progress: Option<ProgressFn>,
    logger: Option<JobLogger>,
}

impl ChunkTranslator {
    pub fn new(
        llm: LlmClient,
        src_lang: impl Into<String>,
        tgt_lang: impl Into<String>,
        terminology: Terminology,
    ) -> Self {
        Self {
            llm,
            src_lang: src_lang.into(),
            tgt_lang: tgt_lang.into(),
            terminology: Arc::new(terminology),
            max_workers: 4,
            reflect: true,
            match_floor: 0.9,
            show_progress: false,
            on_progress: None,
            logger: None,
        }
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Enable or disable the second, expressive pass.
    pub fn with_reflect(mut self, reflect: bool) -> Self {
        self.reflect = reflect;
        self
    }

    pub fn with_match_floor(mut self, floor: f64) -> Self {
        self.match_floor = floor;
        self
    }

    /// Enable or disable progress bar display.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressFn) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn with_logger(mut self, logger: JobLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Translate every chunk with at most `max_workers` in flight, then put the
    /// lines back in source order.
    pub async fn translate_all(&self, chunks: &[TranslationChunk]) -> Result<TranslationOutput> {
        let total = chunks.len();
        let start_time = Instant::now();
        info!(
            "Translating {} chunks with {} concurrent requests",
            total, self.max_workers
        );

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut futures = FuturesUnordered::new();

        for chunk in chunks {
            let sem = semaphore.clone();
            futures.push(async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| TransubError::Api(format!("Semaphore error: {e}")))?;
                let chunk_start = Instant::now();
                let result = self.translate_chunk(chunk).await;
                debug!(
                    "Chunk {} finished in {}ms",
                    chunk.index,
                    chunk_start.elapsed().as_millis()
                );
                result
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(result) = futures.next().await {
            let result = match result {
                Ok(r) => r,
                Err(e) => {
                    if let Some(pb) = &progress_bar {
                        pb.abandon_with_message("Translation failed");
                    }
                    return Err(e);
                }
            };
            results.push(result);
            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
            if let Some(callback) = &self.on_progress {
                callback(results.len(), total);
            }
            if let Some(logger) = &self.logger {
                logger.info(
                    "translate",
                    format!("Translated {}/{} chunks", results.len(), total),
                );
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Translation complete");
        }

        // Arrival order is not chunk order.
        results.sort_by_key(|r| r.index);

        let rows = reassemble(chunks, &results, self.match_floor, self.logger.as_ref())?;
        info!(
            "Translated {} lines in {:.1}s",
            rows.len(),
            start_time.elapsed().as_secs_f64()
        );

        Ok(TranslationOutput { results, rows })
    }

    /// Literal pass, then (optionally) the reflective pass over its output.
    pub async fn translate_chunk(&self, chunk: &TranslationChunk) -> Result<ChunkResult> {
        let lines = chunk.lines();
        let src_lang = language_name(&self.src_lang);
        let tgt_lang = language_name(&self.tgt_lang);
        let shared = shared_prompt(
            &chunk.previous_context,
            &chunk.following_context,
            &self.terminology.theme,
            &self.terminology.things_to_note(&chunk.text()),
        );

        let prompt = faithfulness_prompt(&lines, &shared, &src_lang, &tgt_lang);
        let faithful = self
            .ask_lines(&prompt, FAITHFULNESS_SCOPE, lines.len(), Some(literal_of as LineField))
            .await?;
        let faithful: Vec<LineTranslation> = faithful
            .into_iter()
            .zip(&lines)
            .map(|(mut l, src)| {
                l.literal = l.literal.replace('\n', " ").trim().to_string();
                if l.origin.trim().is_empty() {
                    l.origin = src.clone();
                }
                l
            })
            .collect();

        if !self.reflect {
            return Ok(ChunkResult {
                index: chunk.index,
                lines: faithful,
            });
        }

        let pairs: Vec<(String, String)> = faithful
            .iter()
            .map(|l| (l.origin.clone(), l.literal.clone()))
            .collect();
        let prompt = expressiveness_prompt(&pairs, &shared, &src_lang, &tgt_lang);
        let expressive = self
            .ask_lines(&prompt, EXPRESSIVENESS_SCOPE, lines.len(), None)
            .await?;

        let lines = faithful
            .into_iter()
            .zip(expressive)
            .map(|(first, second)| LineTranslation {
                origin: if second.origin.trim().is_empty() {
                    first.origin
                } else {
                    second.origin
                },
                literal: first.literal,
                reflective_note: second.reflective_note,
                free: second.free.replace('\n', " ").trim().to_string(),
            })
            .collect();

        Ok(ChunkResult {
            index: chunk.index,
            lines,
        })
    }

    /// Ask for a `{"1": {...}, .., "n": {...}}` reply and return it in key order.
    /// Missing or extra keys count as invalid replies, as does an empty
    /// `required` field.
    async fn ask_lines(
        &self,
        prompt: &str,
        scope: &str,
        expected: usize,
        required: Option<LineField>,
    ) -> Result<Vec<LineTranslation>> {
        let reply: HashMap<String, LineTranslation> = self
            .llm
            .ask_json(prompt, scope, |reply: &HashMap<String, LineTranslation>| {
                if reply.len() != expected {
                    return Err(format!(
                        "expected {expected} lines, got {}",
                        reply.len()
                    ));
                }
                for n in 1..=expected {
                    match reply.get(&n.to_string()) {
                        None => return Err(format!("line {n} missing")),
                        Some(line) if required.is_some_and(|f| f(line).trim().is_empty()) => {
                            return Err(format!("line {n} has no translation"))
                        }
                        Some(_) => {}
                    }
                }
                Ok(())
            })
            .await?;

        let mut reply = reply;
        (1..=expected)
            .map(|n| {
                reply.remove(&n.to_string()).ok_or_else(|| {
                    TransubError::InvalidResponse(format!("line {n} missing"))
                })
            })
            .collect()
    }
}

fn literal_of(line: &LineTranslation) -> &String {
    &line.literal
}

/// Assign each chunk's lines the translation of the best-matching result.
///
/// The match is by similarity between the chunk's source text and the source
/// each result echoed back. Below `floor` is an [`TransubError::Alignment`];
/// a count mismatch between source and translation lines is padded with
/// empty strings.
pub fn reassemble(
    chunks: &[TranslationChunk],
    results: &[ChunkResult],
    floor: f64,
    logger: Option<&JobLogger>,
) -> Result<Vec<TranslationRow>> {
    let echoed: Vec<String> = results
        .iter()
        .map(|r| r.origins().concat().to_lowercase())
        .collect();

    let mut source: Vec<String> = Vec::new();
    let mut translation: Vec<String> = Vec::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let lines = chunk.lines();
        let chunk_text = lines.concat().to_lowercase();

        // The result with the same index almost always matches exactly.
        let same = results.iter().position(|r| r.index == chunk.index);
        let best = match same {
            Some(j) if echoed[j] == chunk_text => Some((j, 1.0)),
            _ => echoed
                .iter()
                .enumerate()
                .map(|(j, text)| (j, similarity(text, &chunk_text)))
                .max_by(|a, b| a.1.total_cmp(&b.1)),
        };

        let Some((j, score)) = best.filter(|(_, s)| *s >= floor) else {
            let score = best.map_or(0.0, |(_, s)| s);
            return Err(TransubError::Alignment(format!(
                "Translation matching failed (chunk {i}, best similarity {score:.3})"
            )));
        };
        if score < 1.0 {
            warn!("Similar match found (chunk {}, similarity: {:.3})", i, score);
        }

        source.extend(lines);
        translation.extend(results[j].lines.iter().map(|l| l.text().to_string()));
    }

    if source.len() != translation.len() {
        let message = format!(
            "Length mismatch: src={}, trans={}. Padding with empty lines",
            source.len(),
            translation.len()
        );
        warn!("{}", message);
        if let Some(logger) = logger {
            logger.warning("translate", message);
        }
        let len = source.len().max(translation.len());
        source.resize(len, String::new());
        translation.resize(len, String::new());
    }

    Ok(source
        .into_iter()
        .zip(translation)
        .map(|(s, t)| TranslationRow::new(s, t))
        .collect())
}
