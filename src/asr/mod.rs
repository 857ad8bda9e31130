pub mod segment;

pub use segment::{EnderTier, TimeGapSegmenter};

use crate::error::{Result, TransubError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Words longer than this are ASR garbage (usually a hallucinated run).
const MAX_WORD_CHARS: usize = 30;

/// Speaker runs shorter than this inherit a neighbouring speaker.
const MIN_SPEAKER_RUN_SECS: f64 = 0.5;

/// Speaker switches across a gap shorter than this are suspicious.
const SPEAKER_SWITCH_GAP_SECS: f64 = 0.3;

const SPEAKER_LOOKAHEAD: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordRecord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
}

impl WordRecord {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            speaker_id: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker_id = Some(speaker.into());
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// On-disk row of the word table; `duration` is derived on save.
#[derive(Debug, Serialize, Deserialize)]
struct WordRow {
    text: String,
    start: f64,
    end: f64,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    speaker_id: Option<String>,
}

/// WhisperX-style transcription result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AsrResult {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<AsrSegment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AsrSegment {
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "speaker_id")]
    pub speaker: Option<String>,
    #[serde(default)]
    pub words: Vec<AsrWord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AsrWord {
    pub word: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub speaker: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AsrInput {
    Table(Vec<WordRow>),
    Result(AsrResult),
}

/// Ordered word records for a whole recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordTable {
    pub words: Vec<WordRecord>,
    pub language: Option<String>,
}

impl WordTable {
    pub fn new(words: Vec<WordRecord>) -> Self {
        Self {
            words,
            language: None,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Load either a saved word table or a raw ASR result.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TransubError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let input: AsrInput = serde_json::from_str(&contents).map_err(|e| {
            TransubError::Parse(format!("{}: not a word table or ASR result: {e}", path.display()))
        })?;

        let table = match input {
            AsrInput::Table(rows) => Self::new(
                rows.into_iter()
                    .map(|r| WordRecord {
                        text: r.text,
                        start: r.start,
                        end: r.end,
                        speaker_id: r.speaker_id,
                    })
                    .collect(),
            ),
            AsrInput::Result(result) => Self::from_asr_result(result)?,
        };

        debug!("Loaded {} words from {:?}", table.len(), path);
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rows: Vec<WordRow> = self
            .words
            .iter()
            .map(|w| WordRow {
                text: w.text.clone(),
                start: w.start,
                end: w.end,
                duration: Some(w.duration()),
                speaker_id: w.speaker_id.clone(),
            })
            .collect();
        std::fs::write(path, serde_json::to_string_pretty(&rows)?)?;
        Ok(())
    }

    /// Flatten a segment/word transcription into word records, repairing missing
    /// timestamps and smoothing speaker labels.
    pub fn from_asr_result(result: AsrResult) -> Result<Self> {
        let mut words: Vec<WordRecord> = Vec::new();

        for segment in &result.segments {
            let dominant = dominant_speaker(segment);

            for (i, word) in segment.words.iter().enumerate() {
                if word.word.chars().count() > MAX_WORD_CHARS {
                    warn!("Skipping word longer than {} chars: {}", MAX_WORD_CHARS, word.word);
                    continue;
                }

                let speaker = resolve_word_speaker(segment, i, dominant.as_deref());
                let text = word.word.replace(['«', '»'], "");

                let (start, end) = match (word.start, word.end) {
                    (Some(s), Some(e)) => (s, e),
                    (Some(s), None) => (s, s),
                    (None, Some(e)) => (words.last().map_or(0.0, |w| w.end), e),
                    (None, None) => match words.last() {
                        Some(prev) => (prev.end, prev.end),
                        None => {
                            let next = segment
                                .words
                                .iter()
                                .find(|w| w.start.is_some() && w.end.is_some())
                                .ok_or_else(|| {
                                    TransubError::Parse(format!(
                                        "no timed word to borrow a timestamp from for '{}'",
                                        word.word
                                    ))
                                })?;
                            (next.start.unwrap_or_default(), next.end.unwrap_or_default())
                        }
                    },
                };

                words.push(WordRecord {
                    text,
                    start,
                    end,
                    speaker_id: speaker,
                });
            }
        }

        smooth_speakers(&mut words);
        info!("ASR result flattened to {} words", words.len());

        Ok(Self {
            words,
            language: result.language,
        })
    }

    /// Apply a global time offset (clamped at zero).
    pub fn shift(&mut self, offset: f64) {
        for word in &mut self.words {
            word.start = (word.start + offset).max(0.0);
            word.end = (word.end + offset).max(0.0);
        }
    }
}

fn dominant_speaker(segment: &AsrSegment) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in &segment.words {
        if let Some(sp) = word.speaker.as_deref().or(segment.speaker.as_deref()) {
            *counts.entry(sp).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(sp, _)| sp.to_string())
        .or_else(|| segment.speaker.clone())
}

fn resolve_word_speaker(segment: &AsrSegment, i: usize, dominant: Option<&str>) -> Option<String> {
    let words = &segment.words;
    let own = match words[i].speaker.as_deref() {
        None => return dominant.map(str::to_string),
        Some(sp) => sp,
    };
    if Some(own) == dominant {
        return Some(own.to_string());
    }

    let neighbour = |j: Option<usize>| {
        j.and_then(|j| words.get(j))
            .and_then(|w| w.speaker.as_deref())
            .or(dominant)
    };
    let prev = neighbour(i.checked_sub(1));
    let next = neighbour(Some(i + 1).filter(|j| *j < words.len()));

    match (prev, next) {
        (Some(p), Some(n)) if p == n && p != own => Some(p.to_string()),
        _ => Some(own.to_string()),
    }
}

/// Fix fragmented speaker labels: fill gaps, absorb short runs, revert noisy switches.
pub fn smooth_speakers(words: &mut [WordRecord]) {
    if words.iter().all(|w| w.speaker_id.is_none()) {
        return;
    }

    // Forward fill, then backward fill the leading gap.
    let mut last: Option<String> = None;
    for w in words.iter_mut() {
        match &w.speaker_id {
            Some(sp) => last = Some(sp.clone()),
            None => w.speaker_id = last.clone(),
        }
    }
    let first = words.iter().find_map(|w| w.speaker_id.clone());
    for w in words.iter_mut().take_while(|w| w.speaker_id.is_none()) {
        w.speaker_id = first.clone();
    }

    // Runs of consecutive words sharing a speaker: (begin, end_exclusive).
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut begin = 0;
    for i in 1..=words.len() {
        if i == words.len() || words[i].speaker_id != words[begin].speaker_id {
            runs.push((begin, i));
            begin = i;
        }
    }
    let run_speakers: Vec<Option<String>> =
        runs.iter().map(|(b, _)| words[*b].speaker_id.clone()).collect();

    for (r, &(b, e)) in runs.iter().enumerate() {
        let start = words[b..e].iter().map(|w| w.start).fold(f64::INFINITY, f64::min);
        let end = words[b..e].iter().map(|w| w.end).fold(f64::NEG_INFINITY, f64::max);
        if end - start >= MIN_SPEAKER_RUN_SECS {
            continue;
        }
        let prev = r.checked_sub(1).and_then(|p| run_speakers[p].clone());
        let next = run_speakers.get(r + 1).cloned().flatten();
        if let Some(speaker) = prev.or(next) {
            for w in &mut words[b..e] {
                w.speaker_id = Some(speaker.clone());
            }
        }
    }

    for i in 1..words.len() {
        let gap = words[i].start - words[i - 1].end;
        if gap >= SPEAKER_SWITCH_GAP_SECS || words[i].speaker_id == words[i - 1].speaker_id {
            continue;
        }
        let prev = words[i - 1].speaker_id.clone();
        let curr = words[i].speaker_id.clone();
        let window = &words[i..(i + SPEAKER_LOOKAHEAD).min(words.len())];
        let back = window.iter().filter(|w| w.speaker_id == prev).count();
        let stay = window.iter().filter(|w| w.speaker_id == curr).count();
        if back > stay {
            words[i].speaker_id = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(word: &str, start: f64, end: f64) -> AsrWord {
        AsrWord {
            word: word.to_string(),
            start: Some(start),
            end: Some(end),
            speaker: None,
        }
    }

    #[test]
    fn test_missing_timestamps_are_repaired() {
        let result = AsrResult {
            language: Some("en".into()),
            segments: vec![AsrSegment {
                words: vec![
                    AsrWord {
                        word: "So".into(),
                        ..Default::default()
                    },
                    timed("hello", 1.0, 1.5),
                    AsrWord {
                        word: "42".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
        };

        let table = WordTable::from_asr_result(result).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!((table.words[0].start, table.words[0].end), (1.0, 1.5));
        assert_eq!((table.words[2].start, table.words[2].end), (1.5, 1.5));
        assert_eq!(table.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_untimed_segment_is_an_error() {
        let result = AsrResult {
            language: None,
            segments: vec![AsrSegment {
                words: vec![AsrWord {
                    word: "lost".into(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };
        assert!(WordTable::from_asr_result(result).is_err());
    }

    #[test]
    fn test_long_words_and_guillemets_dropped() {
        let result = AsrResult {
            language: None,
            segments: vec![AsrSegment {
                words: vec![
                    timed("«Bonjour»", 0.0, 0.4),
                    timed(&"a".repeat(31), 0.4, 0.5),
                ],
                ..Default::default()
            }],
        };
        let table = WordTable::from_asr_result(result).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.words[0].text, "Bonjour");
    }

    #[test]
    fn test_shift_clamps_at_zero() {
        let mut table = WordTable::new(vec![WordRecord::new("a", 0.2, 0.5)]);
        table.shift(-0.3);
        assert_eq!(table.words[0].start, 0.0);
        assert!((table.words[0].end - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_smooth_short_run_inherits_previous_speaker() {
        let mut words = vec![
            WordRecord::new("a", 0.0, 1.0).with_speaker("A"),
            WordRecord::new("b", 1.0, 2.0).with_speaker("A"),
            WordRecord::new("c", 2.5, 2.7).with_speaker("B"),
            WordRecord::new("d", 3.5, 5.0).with_speaker("A"),
        ];
        smooth_speakers(&mut words);
        assert!(words.iter().all(|w| w.speaker_id.as_deref() == Some("A")));
    }

    #[test]
    fn test_smooth_fills_missing_speakers() {
        let mut words = vec![
            WordRecord::new("a", 0.0, 1.0),
            WordRecord::new("b", 1.0, 2.0).with_speaker("A"),
            WordRecord::new("c", 2.0, 3.0),
        ];
        smooth_speakers(&mut words);
        assert!(words.iter().all(|w| w.speaker_id.as_deref() == Some("A")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.json");
        let table = WordTable::new(vec![
            WordRecord::new("Hello", 0.0, 0.5),
            WordRecord::new("world", 0.5, 1.0).with_speaker("SPEAKER_00"),
        ]);
        table.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"duration\""));

        let loaded = WordTable::load(&path).unwrap();
        assert_eq!(loaded.words, table.words);
    }

    #[test]
    fn test_load_asr_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asr.json");
        std::fs::write(
            &path,
            r#"{"language":"ja","segments":[{"start":0.0,"end":1.0,"text":"こんにちは",
               "words":[{"word":"こん","start":0.0,"end":0.4},{"word":"にちは","start":0.4,"end":1.0}]}]}"#,
        )
        .unwrap();
        let table = WordTable::load(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.language.as_deref(), Some("ja"));
    }
}
