use crate::align::TimestampAligner;
use crate::asr::segment::TimeGapSegmenter;
use crate::asr::WordTable;
use crate::bilingual::{BilingualAligner, LongLineSplitter};
use crate::config::Config;
use crate::error::{Result, TransubError};
use crate::jobs::{JobType, StageContext, StageOutcome, StagePipeline};
use crate::llm::{LlmBackend, LlmCache, LlmClient, OpenAiClient};
use crate::media::{burn_subtitles, BurnRequest};
use crate::split::{load_lines, save_lines, MeaningSplitter, SentenceSplitter};
use crate::subtitle::{entries_from_rows, write_variants, SubtitleVariant};
use crate::translate::{
    load_table, partition, save_table, write_transcript, ChunkTranslator, Summarizer,
    Terminology,
};
use crate::trim::SubtitleLengthTrimmer;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where every stage reads and writes its artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("gpt_log")
    }

    pub fn words(&self) -> PathBuf {
        self.log_dir().join("words.json")
    }

    pub fn split_nlp(&self) -> PathBuf {
        self.log_dir().join("split_by_nlp.txt")
    }

    pub fn split_meaning(&self) -> PathBuf {
        self.log_dir().join("split_by_meaning.txt")
    }

    pub fn terminology(&self) -> PathBuf {
        self.log_dir().join("terminology.json")
    }

    pub fn translation(&self) -> PathBuf {
        self.log_dir().join("translation.json")
    }

    pub fn transcript(&self) -> PathBuf {
        self.log_dir().join("translation.txt")
    }

    pub fn translation_split(&self) -> PathBuf {
        self.log_dir().join("translation_split.json")
    }

    pub fn subtitle(&self, variant: SubtitleVariant) -> PathBuf {
        self.root.join(variant.file_name())
    }

    pub fn burned_video(&self) -> PathBuf {
        self.root.join("output_sub.mp4")
    }
}

pub struct SubtitlePipeline {
    config: Config,
    words_input: PathBuf,
    video: Option<PathBuf>,
    paths: ArtifactPaths,
    backend: Arc<dyn LlmBackend>,
    cache: Arc<LlmCache>,
    retry_delay: Option<Duration>,
    show_progress: bool,
    detected_language: Mutex<Option<String>>,
}

impl SubtitlePipeline {
    pub fn new(config: Config, words_input: impl Into<PathBuf>, backend: Arc<dyn LlmBackend>) -> Self {
        let paths = ArtifactPaths::new(config.output_dir.clone());
        let cache = Arc::new(LlmCache::new(paths.cache_dir()));
        Self {
            config,
            words_input: words_input.into(),
            video: None,
            paths,
            backend,
            cache,
            retry_delay: None,
            show_progress: false,
            detected_language: Mutex::new(None),
        }
    }

    /// Pipeline backed by the OpenAI-compatible endpoint in `config.api`.
    pub fn from_config(config: Config, words_input: impl Into<PathBuf>) -> Result<Self> {
        let backend = Arc::new(OpenAiClient::from_config(&config.api)?);
        Ok(Self::new(config, words_input, backend))
    }

    pub fn with_video(mut self, video: impl Into<PathBuf>) -> Self {
        self.video = Some(video.into());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Enable or disable progress bar display.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    fn llm(&self, ctx: &StageContext) -> LlmClient {
        let client = LlmClient::new(self.backend.clone())
            .with_cache(self.cache.clone())
            .with_retries(self.config.api.max_retries)
            .with_logger(ctx.logger().clone());
        match self.retry_delay {
            Some(delay) => client.with_retry_delay(delay),
            None => client,
        }
    }

    /// Source language in effect: configured, or detected by ASR for `auto`.
    fn language(&self) -> String {
        let detected = self
            .detected_language
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if self.config.language.source.eq_ignore_ascii_case("auto") {
            detected.unwrap_or_else(|| self.config.source_language().to_string())
        } else {
            self.config.language.source.clone()
        }
    }

    fn target_language(&self) -> &str {
        &self.config.language.target
    }

    async fn asr(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let mut table = WordTable::load(&self.words_input)?;
        if table.is_empty() {
            return Err(TransubError::Parse(format!(
                "no words in {}",
                self.words_input.display()
            )));
        }
        if let Some(language) = &table.language {
            info!("ASR detected language: {}", language);
            *self
                .detected_language
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(language.clone());
        }

        if self.config.time_offset != 0.0 {
            table.shift(self.config.time_offset);
            ctx.logger().info(
                "asr",
                format!("Shifted timestamps by {:+.3}s", self.config.time_offset),
            );
        }

        std::fs::create_dir_all(self.paths.log_dir())?;
        table.save(&self.paths.words())?;
        ctx.logger()
            .info("asr", format!("Loaded {} words ({})", table.len(), self.language()));
        Ok(StageOutcome::Completed)
    }

    async fn split_nlp(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let language = self.language();
        let table = WordTable::load(&self.paths.words())?;

        let fragments = TimeGapSegmenter::from_config(&language, &self.config.split).segment(&table.words);
        ctx.progress(50.0);
        let units = SentenceSplitter::from_config(&language, &self.config.split).split(&fragments);

        save_lines(&self.paths.split_nlp(), &units)?;
        ctx.logger().info(
            "split",
            format!("{} fragments split into {} sentences", fragments.len(), units.len()),
        );
        Ok(StageOutcome::Completed)
    }

    async fn split_meaning(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let units = load_lines(&self.paths.split_nlp())?;
        let before = units.len();

        let splitter = MeaningSplitter::from_config(self.llm(ctx), &self.language(), &self.config.meaning)
            .with_max_workers(self.config.max_workers);
        let units = splitter.split_all(units).await?;

        save_lines(&self.paths.split_meaning(), &units)?;
        ctx.logger().info(
            "split",
            format!("Meaning split: {} -> {} sentences", before, units.len()),
        );
        Ok(StageOutcome::Completed)
    }

    async fn summarize(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let units = load_lines(&self.paths.split_meaning())?;

        let custom = match &self.config.custom_terms {
            Some(path) if path.exists() => Some(Terminology::load(path)?),
            Some(path) => {
                warn!("Custom terms file {:?} not found, ignoring", path);
                None
            }
            None => None,
        };

        let summary = Summarizer::new(self.llm(ctx), self.language(), self.target_language())
            .with_summary_length(self.config.summary_length)
            .summarize(&units, custom.as_ref())
            .await?;

        summary.save(&self.paths.terminology())?;
        ctx.logger().info(
            "translate",
            format!("Extracted {} terms: {}", summary.terms.len(), summary.theme),
        );
        Ok(StageOutcome::Completed)
    }

    async fn translate(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let language = self.language();
        let units = load_lines(&self.paths.split_meaning())?;
        let terminology = Terminology::load(&self.paths.terminology())?;
        let table = WordTable::load(&self.paths.words())?;

        let settings = &self.config.translation;
        let chunks = partition(&units, settings.chunk_size, settings.max_lines);
        ctx.logger().info(
            "translate",
            format!("Translating {} lines in {} chunks", units.len(), chunks.len()),
        );

        let report = ctx.reporter();
        let output = ChunkTranslator::new(self.llm(ctx), &language, self.target_language(), terminology)
            .with_max_workers(self.config.max_workers)
            .with_reflect(settings.reflect)
            .with_match_floor(settings.chunk_match_floor)
            .with_progress(self.show_progress)
            .with_progress_callback(Arc::new(move |done, total| {
                // The last 10% is alignment and trimming.
                report(done as f64 * 90.0 / total.max(1) as f64);
            }))
            .with_logger(ctx.logger().clone())
            .translate_all(&chunks)
            .await?;

        write_transcript(&self.paths.transcript(), &output.lines())?;

        let aligner = TimestampAligner::from_config(&table.words, &language, &self.config.alignment);
        let rows = aligner.align_with_origins(output.rows.clone(), &output.origins())?;
        ctx.progress(95.0);

        let rows = SubtitleLengthTrimmer::new(self.llm(ctx), self.config.min_trim_duration)
            .with_max_workers(self.config.max_workers)
            .trim_rows(rows)
            .await?;

        save_table(&self.paths.translation(), &rows)?;
        ctx.logger()
            .info("translate", format!("Translation table saved ({} lines)", rows.len()));
        Ok(StageOutcome::Completed)
    }

    async fn split_sub(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let language = self.language();
        let rows = load_table(&self.paths.translation())?;
        let llm = self.llm(ctx);

        let splitter = LongLineSplitter::from_config(
            MeaningSplitter::from_config(llm.clone(), &language, &self.config.meaning),
            BilingualAligner::new(llm, &language, self.target_language()),
            &language,
            &self.config.subtitle,
        )
        .with_max_workers(self.config.max_workers);

        let before = rows.len();
        let rows = splitter.split_rows(rows).await?;
        save_table(&self.paths.translation_split(), &rows)?;
        ctx.logger().info(
            "subtitle",
            format!("Subtitle split: {} -> {} lines", before, rows.len()),
        );
        Ok(StageOutcome::Completed)
    }

    async fn gen_sub(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let language = self.language();
        let rows = load_table(&self.paths.translation_split())?;
        let table = WordTable::load(&self.paths.words())?;

        let rows = TimestampAligner::from_config(&table.words, &language, &self.config.alignment).align(rows)?;
        let entries = entries_from_rows(&rows);
        let paths = write_variants(self.paths.root(), &entries)?;

        debug!("Subtitle files: {:?}", paths);
        ctx.logger().info(
            "subtitle",
            format!("Wrote {} subtitle files with {} entries", paths.len(), entries.len()),
        );
        Ok(StageOutcome::Completed)
    }

    async fn merge_sub(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let Some(video) = self.video.clone().filter(|_| self.config.burn.enabled) else {
            debug!("Burn-in disabled or no video given");
            return Ok(StageOutcome::Skipped);
        };

        let request = BurnRequest {
            video,
            src_srt: self.paths.subtitle(SubtitleVariant::Source),
            trans_srt: self.paths.subtitle(SubtitleVariant::Translation),
            output: self.paths.burned_video(),
        };
        let style = self.config.burn.clone();
        let output = request.output.clone();

        tokio::task::spawn_blocking(move || burn_subtitles(&request, &style)).await??;

        ctx.logger()
            .info("subtitle", format!("Subtitles burned into {}", output.display()));
        Ok(StageOutcome::Completed)
    }
}

#[async_trait]
impl StagePipeline for SubtitlePipeline {
    fn job_type(&self) -> JobType {
        JobType::Subtitle
    }

    fn video_id(&self) -> &str {
        self.video
            .as_deref()
            .unwrap_or(self.words_input.as_path())
            .to_str()
            .unwrap_or("input")
    }

    async fn run_stage(&self, stage: &str, ctx: &StageContext) -> Result<StageOutcome> {
        match stage {
            "asr" => self.asr(ctx).await,
            "split_nlp" => self.split_nlp(ctx).await,
            "split_meaning" => self.split_meaning(ctx).await,
            "summarize" => self.summarize(ctx).await,
            "translate" => self.translate(ctx).await,
            "split_sub" => self.split_sub(ctx).await,
            "gen_sub" => self.gen_sub(ctx).await,
            "merge_sub" => self.merge_sub(ctx).await,
            other => Err(TransubError::Config(format!("unknown subtitle stage: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_layout() {
        let paths = ArtifactPaths::new("out");
        assert_eq!(paths.words(), PathBuf::from("out/log/words.json"));
        assert_eq!(paths.cache_dir(), PathBuf::from("out/gpt_log"));
        assert_eq!(
            paths.subtitle(SubtitleVariant::TranslationOverSource),
            PathBuf::from("out/trans_src.srt")
        );
    }
}
