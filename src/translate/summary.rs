use crate::error::{Result, TransubError};
use crate::llm::prompts::summary_prompt;
use crate::llm::LlmClient;
use crate::split::SentenceUnit;
use crate::text::{joiner, language_name};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

const CACHE_SCOPE: &str = "summary";
const MAX_TERMS: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub src: String,
    pub tgt: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Terminology {
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub terms: Vec<Term>,
}

impl Terminology {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TransubError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| TransubError::Parse(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Numbered notes for the terms that occur in `text` (case-insensitive).
    pub fn things_to_note(&self, text: &str) -> String {
        let haystack = text.to_lowercase();
        let mut notes = String::new();
        for (i, term) in self
            .terms
            .iter()
            .filter(|t| !t.src.is_empty() && haystack.contains(&t.src.to_lowercase()))
            .enumerate()
        {
            let _ = writeln!(
                notes,
                "{}. \"{}\": \"{}\", meaning: {}",
                i + 1,
                term.src,
                term.tgt,
                term.note
            );
        }
        notes
    }
}

pub struct Summarizer {
    llm: LlmClient,
    src_lang: String,
    tgt_lang: String,
    summary_length: usize,
}

impl Summarizer {
    pub fn new(llm: LlmClient, src_lang: impl Into<String>, tgt_lang: impl Into<String>) -> Self {
        Self {
            llm,
            src_lang: src_lang.into(),
            tgt_lang: tgt_lang.into(),
            summary_length: 8000,
        }
    }

    pub fn with_summary_length(mut self, chars: usize) -> Self {
        self.summary_length = chars;
        self
    }

    /// Extract the theme and up to 15 terms from the start of the transcript.
    /// `custom` terms are excluded from extraction and merged into the result.
    pub async fn summarize(
        &self,
        units: &[SentenceUnit],
        custom: Option<&Terminology>,
    ) -> Result<Terminology> {
        let text: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        let content: String = text
            .join(joiner(&self.src_lang))
            .chars()
            .take(self.summary_length)
            .collect();

        let existing = custom.map(|c| c.terms.as_slice()).unwrap_or_default();
        let prompt = summary_prompt(
            &content,
            &language_name(&self.src_lang),
            &language_name(&self.tgt_lang),
            existing,
        );

        let mut summary: Terminology = self
            .llm
            .ask_json(&prompt, CACHE_SCOPE, |t: &Terminology| {
                if t.theme.trim().is_empty() {
                    Err("summary has no theme".to_string())
                } else {
                    Ok(())
                }
            })
            .await?;

        if summary.terms.len() > MAX_TERMS {
            warn!(
                "Summary returned {} terms, keeping the first {}",
                summary.terms.len(),
                MAX_TERMS
            );
            summary.terms.truncate(MAX_TERMS);
        }
        summary
            .terms
            .retain(|t| !existing.iter().any(|e| e.src.eq_ignore_ascii_case(&t.src)));
        summary.terms.extend(existing.iter().cloned());

        info!(
            "Summary: {} terms ({} custom)",
            summary.terms.len(),
            existing.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{client, ScriptedBackend};
    use std::sync::Arc;

    fn term(src: &str, tgt: &str) -> Term {
        Term {
            src: src.into(),
            tgt: tgt.into(),
            note: "n".into(),
        }
    }

    #[test]
    fn test_things_to_note_matches_case_insensitively() {
        let t = Terminology {
            theme: "t".into(),
            terms: vec![term("Machine Learning", "机器学习"), term("CNN", "CNN")],
        };
        let notes = t.things_to_note("we use machine learning here");
        assert_eq!(notes, "1. \"Machine Learning\": \"机器学习\", meaning: n\n");
        assert!(t.things_to_note("nothing relevant").is_empty());
    }

    #[tokio::test]
    async fn test_custom_terms_are_excluded_then_merged() {
        let backend = Arc::new(ScriptedBackend::new(|prompt| {
            assert!(prompt.contains("- Rust: 锈"));
            Ok(serde_json::json!({
                "theme": "A talk about Rust.",
                "terms": [
                    {"src": "rust", "tgt": "铁锈", "note": "dup"},
                    {"src": "Cargo", "tgt": "Cargo", "note": "build tool"}
                ]
            })
            .to_string())
        }));
        let summarizer = Summarizer::new(client(backend), "en", "zh");
        let custom = Terminology {
            theme: String::new(),
            terms: vec![term("Rust", "锈")],
        };
        let units = vec![SentenceUnit::new("Rust and Cargo.", 0)];

        let summary = summarizer.summarize(&units, Some(&custom)).await.unwrap();
        let srcs: Vec<&str> = summary.terms.iter().map(|t| t.src.as_str()).collect();
        assert_eq!(srcs, vec!["Cargo", "Rust"]);
        assert_eq!(summary.theme, "A talk about Rust.");
    }
}
