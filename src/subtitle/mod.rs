pub mod srt;

use crate::error::Result;
use crate::translate::TranslationRow;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
    pub original_text: Option<String>,
}

impl SubtitleEntry {
    pub fn new(index: usize, start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            index,
            start,
            end,
            text: text.into(),
            original_text: None,
        }
    }

    pub fn with_original(mut self, original: impl Into<String>) -> Self {
        self.original_text = Some(original.into());
        self
    }

    /// Build a display entry from an aligned row. Times are rounded to the
    /// millisecond.
    pub fn from_row(index: usize, row: &TranslationRow) -> Self {
        Self::new(
            index,
            seconds_to_duration(row.start),
            seconds_to_duration(row.end),
            display_translation(&row.translation),
        )
        .with_original(row.source.trim())
    }
}

fn seconds_to_duration(secs: f64) -> Duration {
    Duration::from_millis((secs.max(0.0) * 1000.0).round() as u64)
}

/// Full-width comma and period read as pauses on screen; show them as spaces.
pub fn display_translation(text: &str) -> String {
    text.replace(['，', '。'], " ").trim().to_string()
}

/// The four subtitle files written for every job. All share the same timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleVariant {
    Source,
    Translation,
    /// Translation on the first line, source below.
    TranslationOverSource,
    /// Source on the first line, translation below.
    SourceOverTranslation,
}

impl SubtitleVariant {
    pub const ALL: [SubtitleVariant; 4] = [
        SubtitleVariant::Source,
        SubtitleVariant::Translation,
        SubtitleVariant::TranslationOverSource,
        SubtitleVariant::SourceOverTranslation,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            SubtitleVariant::Source => "src.srt",
            SubtitleVariant::Translation => "trans.srt",
            SubtitleVariant::TranslationOverSource => "trans_src.srt",
            SubtitleVariant::SourceOverTranslation => "src_trans.srt",
        }
    }

    fn text(&self, entry: &SubtitleEntry) -> String {
        let source = entry.original_text.as_deref().unwrap_or_default();
        let translation = entry.text.as_str();
        match self {
            SubtitleVariant::Source => source.to_string(),
            SubtitleVariant::Translation => translation.to_string(),
            SubtitleVariant::TranslationOverSource => stack(translation, source),
            SubtitleVariant::SourceOverTranslation => stack(source, translation),
        }
    }

    /// Project entries onto this variant, keeping their timing.
    pub fn entries(&self, entries: &[SubtitleEntry]) -> Vec<SubtitleEntry> {
        entries
            .iter()
            .map(|e| SubtitleEntry::new(e.index, e.start, e.end, self.text(e)))
            .collect()
    }
}

/// Two cue lines, or just the non-empty one.
fn stack(top: &str, bottom: &str) -> String {
    match (top.trim().is_empty(), bottom.trim().is_empty()) {
        (false, false) => format!("{top}\n{bottom}"),
        (true, _) => bottom.to_string(),
        (false, true) => top.to_string(),
    }
}

pub fn entries_from_rows(rows: &[TranslationRow]) -> Vec<SubtitleEntry> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| SubtitleEntry::from_row(i + 1, row))
        .collect()
}

/// Write every variant into `dir` and return the paths in [`SubtitleVariant::ALL`] order.
pub fn write_variants(dir: &Path, entries: &[SubtitleEntry]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(SubtitleVariant::ALL.len());
    for variant in SubtitleVariant::ALL {
        let path = dir.join(variant.file_name());
        std::fs::write(&path, srt::format(&variant.entries(entries)))?;
        paths.push(path);
    }
    info!("Wrote {} subtitle entries to {}", entries.len(), dir.display());
    Ok(paths)
}
