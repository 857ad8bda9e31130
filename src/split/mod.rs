pub mod connector;
pub mod mark;
pub mod meaning;

pub use meaning::MeaningSplitter;

use crate::config::SplitConfig;
use crate::error::{Result, TransubError};
use crate::text::joiner;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One source-language line. Its position in the list is its line number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceUnit {
    pub text: String,
    /// Index of the rule-based sentence this line descends from.
    pub origin_index: usize,
}

impl SentenceUnit {
    pub fn new(text: impl Into<String>, origin_index: usize) -> Self {
        Self {
            text: text.into(),
            origin_index,
        }
    }
}

/// Write one sentence per line.
pub fn save_lines(path: &Path, units: &[SentenceUnit]) -> Result<()> {
    let lines: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
    std::fs::write(path, lines.join("\n"))?;
    Ok(())
}

/// Read lines written by [`save_lines`]. Blank lines are skipped; each line
/// becomes its own origin.
pub fn load_lines(path: &Path) -> Result<Vec<SentenceUnit>> {
    if !path.exists() {
        return Err(TransubError::FileNotFound(path.display().to_string()));
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, l)| SentenceUnit::new(l, i))
        .collect())
}

/// Rule-based splitting: sentence boundaries, continuation and punctuation
/// merging, then comma and connector splits.
pub struct SentenceSplitter {
    language: String,
    comma_min_words: usize,
    connector_context_words: usize,
}

impl SentenceSplitter {
    pub fn new(language: impl Into<String>) -> Self {
        let defaults = SplitConfig::default();
        Self {
            language: language.into(),
            comma_min_words: defaults.comma_min_words,
            connector_context_words: defaults.connector_context_words,
        }
    }

    pub fn from_config(language: &str, config: &SplitConfig) -> Self {
        Self {
            language: language.to_string(),
            comma_min_words: config.comma_min_words,
            connector_context_words: config.connector_context_words,
        }
    }

    pub fn split(&self, fragments: &[String]) -> Vec<SentenceUnit> {
        let joiner = joiner(&self.language);

        let by_mark: Vec<String> = fragments
            .iter()
            .flat_map(|f| mark::split_boundaries(f, &self.language))
            .collect();
        let by_mark = mark::merge_continuations(by_mark, joiner);
        let by_mark = mark::merge_punctuation_only(by_mark);

        let by_comma: Vec<String> = by_mark
            .iter()
            .flat_map(|s| mark::split_by_comma(s, &self.language, self.comma_min_words))
            .collect();

        let sentences: Vec<String> = by_comma
            .iter()
            .flat_map(|s| {
                connector::split_by_connectors(s, &self.language, self.connector_context_words)
            })
            .filter(|s| !s.is_empty())
            .collect();

        info!(
            "Rule-based split: {} fragments -> {} by mark -> {} by comma -> {} sentences",
            fragments.len(),
            by_mark.len(),
            by_comma.len(),
            sentences.len()
        );

        sentences
            .into_iter()
            .enumerate()
            .map(|(i, text)| SentenceUnit::new(text, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_based_pipeline() {
        let splitter = SentenceSplitter::new("en");
        let units = splitter.split(&[
            "Hello everyone. Today we are going to look at the new release".to_string(),
            "because it changes how the whole build system works for everybody. Thanks!".to_string(),
        ]);
        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Hello everyone.",
                "Today we are going to look at the new release",
                "because it changes how the whole build system works for everybody.",
                "Thanks!"
            ]
        );
        assert!(units.iter().enumerate().all(|(i, u)| u.origin_index == i));
    }

    #[test]
    fn test_save_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.txt");
        save_lines(&path, &[SentenceUnit::new("a", 0), SentenceUnit::new("b", 1)]).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a\nb");
    }
}
