pub mod chunk;
pub mod summary;
pub mod translator;

pub use chunk::{partition, TranslationChunk};
pub use summary::{Summarizer, Term, Terminology};
pub use translator::{ChunkTranslator, TranslationOutput};

use crate::error::{Result, TransubError};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// One line of a chunk reply, keyed by line number in the model's JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineTranslation {
    #[serde(default)]
    pub origin: String,
    #[serde(rename = "direct", default)]
    pub literal: String,
    #[serde(rename = "reflect", default)]
    pub reflective_note: String,
    #[serde(default)]
    pub free: String,
}

impl LineTranslation {
    /// The text used downstream: the free translation, else the literal one.
    pub fn text(&self) -> &str {
        if self.free.trim().is_empty() {
            self.literal.trim()
        } else {
            self.free.trim()
        }
    }
}

/// A row of the translation table. Column names are part of the file format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationRow {
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Translation")]
    pub translation: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub duration: f64,
}

impl TranslationRow {
    pub fn new(source: impl Into<String>, translation: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            translation: translation.into(),
            ..Self::default()
        }
    }

    pub fn set_times(&mut self, start: f64, end: f64) {
        self.start = start;
        self.end = end;
        self.duration = end - start;
    }
}

pub fn save_table(path: &Path, rows: &[TranslationRow]) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(rows)?)?;
    Ok(())
}

pub fn load_table(path: &Path) -> Result<Vec<TranslationRow>> {
    if !path.exists() {
        return Err(TransubError::FileNotFound(path.display().to_string()));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| TransubError::Parse(format!("{}: {e}", path.display())))
}

/// Human-readable "origin / free" transcript of every translated line.
pub fn write_transcript(path: &Path, lines: &[LineTranslation]) -> Result<()> {
    let rule = "=".repeat(60);
    let mut out = format!("{rule}\nTranslate Expressiveness (Origin -> Free)\n{rule}\n\n");
    for (i, line) in lines.iter().enumerate() {
        let _ = write!(out, "[{}]  {}\n     {}\n\n", i + 1, line.origin, line.text());
    }
    std::fs::write(path, out)?;
    Ok(())
}
