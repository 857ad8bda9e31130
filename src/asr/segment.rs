use super::WordRecord;
use crate::config::SplitConfig;
use crate::text::{self, TERMINAL_PUNCTUATION};
use tracing::debug;

/// A family of sentence-final inflections that ends a fragment once the buffer
/// is long enough and (optionally) the following pause is long enough.
#[derive(Debug, Clone)]
pub struct EnderTier {
    pub endings: &'static [&'static str],
    pub min_chars: usize,
    /// `None` splits regardless of the pause after the word.
    pub min_gap: Option<f64>,
}

const JA_TIERS: [EnderTier; 3] = [
    EnderTier {
        endings: &["ます", "です", "ました", "でした", "ません", "ください", "ましょう"],
        min_chars: 5,
        min_gap: None,
    },
    EnderTier {
        endings: &["だ", "た", "る", "い", "ない", "ある", "いる", "える", "める", "のだ", "んだ"],
        min_chars: 8,
        min_gap: Some(0.05),
    },
    EnderTier {
        endings: &["ね", "よ", "わ", "ぞ", "な", "さ", "の", "か", "よね", "かな", "かね"],
        min_chars: 3,
        min_gap: Some(0.08),
    },
];

const KO_TIERS: [EnderTier; 2] = [
    EnderTier {
        endings: &["습니다", "니다", "세요", "어요", "아요", "예요", "이에요", "죠"],
        min_chars: 5,
        min_gap: None,
    },
    EnderTier {
        endings: &["다", "야", "지", "네"],
        min_chars: 8,
        min_gap: Some(0.05),
    },
];

/// Groups word records into fragments at pauses, punctuation and
/// language-specific sentence endings.
#[derive(Debug, Clone)]
pub struct TimeGapSegmenter {
    gap_threshold: f64,
    min_fragment_chars: usize,
    joiner: &'static str,
    tiers: &'static [EnderTier],
}

impl TimeGapSegmenter {
    pub fn new(language: &str, gap_threshold: f64) -> Self {
        let tiers: &'static [EnderTier] = match text::base_code(language).as_str() {
            "ja" | "japanese" => &JA_TIERS,
            "ko" | "korean" => &KO_TIERS,
            _ => &[],
        };
        Self {
            gap_threshold,
            min_fragment_chars: 5,
            joiner: text::joiner(language),
            tiers,
        }
    }

    /// Build from config: an unset threshold falls back to the CJK threshold for
    /// unspaced scripts, which rarely carry reliable ASR punctuation.
    pub fn from_config(language: &str, config: &SplitConfig) -> Self {
        let threshold = if config.gap_threshold <= 0.0 && text::is_unspaced(language) {
            config.cjk_gap_threshold
        } else {
            config.gap_threshold
        };
        Self::new(language, threshold).with_min_fragment_chars(config.min_fragment_chars)
    }

    pub fn with_min_fragment_chars(mut self, chars: usize) -> Self {
        self.min_fragment_chars = chars;
        self
    }

    pub fn segment(&self, words: &[WordRecord]) -> Vec<String> {
        if words.is_empty() {
            return Vec::new();
        }

        if self.gap_threshold <= 0.0 {
            let whole = self.join(words.iter().map(|w| clean_token(&w.text)));
            return if whole.is_empty() { Vec::new() } else { vec![whole] };
        }

        let mut fragments: Vec<String> = Vec::new();
        let mut buffer: Vec<String> = Vec::new();

        for (i, word) in words.iter().enumerate() {
            let token = clean_token(&word.text);
            if !token.is_empty() {
                buffer.push(token);
            }
            if buffer.is_empty() {
                continue;
            }

            let current = self.join(buffer.iter().cloned());
            let gap = words.get(i + 1).map(|next| next.start - word.end);

            if self.should_split(&current, word, gap) {
                fragments.push(current);
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            fragments.push(self.join(buffer.into_iter()));
        }

        let merged = self.merge_short(fragments);
        debug!(
            "Time-gap segmentation produced {} fragments (threshold {:.2}s)",
            merged.len(),
            self.gap_threshold
        );
        merged
    }

    fn should_split(&self, current: &str, word: &WordRecord, gap: Option<f64>) -> bool {
        if current.trim_end().ends_with(TERMINAL_PUNCTUATION) {
            return true;
        }
        if word.duration() > self.gap_threshold {
            return true;
        }
        if gap.is_some_and(|g| g > self.gap_threshold) {
            return true;
        }

        let chars = current.chars().count();
        self.tiers.iter().any(|tier| {
            chars >= tier.min_chars
                && tier.min_gap.map_or(true, |min| gap.is_some_and(|g| g > min))
                && tier.endings.iter().any(|e| current.ends_with(e))
        })
    }

    /// Short fragments join the previous one, never the next.
    fn merge_short(&self, fragments: Vec<String>) -> Vec<String> {
        let mut merged: Vec<String> = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let fragment = fragment.trim().to_string();
            if fragment.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(prev) if fragment.chars().count() < self.min_fragment_chars => {
                    prev.push_str(self.joiner);
                    prev.push_str(&fragment);
                }
                _ => merged.push(fragment),
            }
        }
        merged
    }

    fn join(&self, tokens: impl Iterator<Item = String>) -> String {
        tokens.collect::<Vec<_>>().join(self.joiner).trim().to_string()
    }
}

fn clean_token(text: &str) -> String {
    text.replace('"', "").trim().to_string()
}
