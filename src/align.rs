use crate::asr::WordRecord;
use crate::config::AlignmentConfig;
use crate::error::{Result, TransubError};
use crate::text::{clean_for_match, is_cjk, similarity};
use crate::translate::TranslationRow;
use tracing::{debug, info, warn};

/// Shortest duration given to a line whose aligned end is not after its start.
const MIN_LINE_DURATION: f64 = 0.1;

/// Cleaned ASR text with, for every byte, the index of the word that owns it.
struct CharStream {
    text: String,
    owner: Vec<usize>,
}

impl CharStream {
    fn build(words: &[WordRecord]) -> Self {
        let mut text = String::new();
        let mut owner = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let clean = clean_for_match(&word.text);
            owner.extend(std::iter::repeat(i).take(clean.len()));
            text.push_str(&clean);
        }
        Self { text, owner }
    }

    /// First exact occurrence of `needle` at or after byte `from`, as the
    /// owning word indices of its first and last byte plus the end offset.
    fn find(&self, needle: &str, from: usize) -> Option<(usize, usize, usize)> {
        if needle.is_empty() || from > self.text.len() || !self.text.is_char_boundary(from) {
            return None;
        }
        let pos = self.text[from..].find(needle)? + from;
        let end = pos + needle.len();
        Some((self.owner[pos], self.owner[end - 1], end))
    }
}

pub struct TimestampAligner<'a> {
    words: &'a [WordRecord],
    stream: CharStream,
    language: String,
    gap_close_max: f64,
    origin_match_floor: f64,
    correction_min_delta: f64,
    correction_max_delta: f64,
}

impl<'a> TimestampAligner<'a> {
    pub fn new(words: &'a [WordRecord], language: impl Into<String>) -> Self {
        Self::from_config(words, &language.into(), &AlignmentConfig::default())
    }

    pub fn from_config(words: &'a [WordRecord], language: &str, config: &AlignmentConfig) -> Self {
        Self {
            words,
            stream: CharStream::build(words),
            language: language.to_string(),
            gap_close_max: config.gap_close_max,
            origin_match_floor: config.origin_match_floor,
            correction_min_delta: config.correction_min_delta,
            correction_max_delta: config.correction_max_delta,
        }
    }

    /// Time every row from its `source` text, then close small gaps.
    pub fn align(&self, rows: Vec<TranslationRow>) -> Result<Vec<TranslationRow>> {
        let mut rows = merge_empty_sources(rows);
        self.primary_pass(&mut rows)?;
        close_gaps(&mut rows, self.gap_close_max);
        enforce_min_duration(&mut rows);
        Ok(rows)
    }

    /// Like [`align`](Self::align), then for CJK sources re-anchor rows on the
    /// origin sentences the translator echoed back.
    pub fn align_with_origins(
        &self,
        rows: Vec<TranslationRow>,
        origins: &[String],
    ) -> Result<Vec<TranslationRow>> {
        let mut rows = merge_empty_sources(rows);
        self.primary_pass(&mut rows)?;
        close_gaps(&mut rows, self.gap_close_max);
        if is_cjk(&self.language) && !origins.is_empty() {
            let adjusted = self.correct_with_origins(&mut rows, origins);
            if adjusted > 0 {
                info!("CJK: made {} timestamp adjustments from echoed origins", adjusted);
            } else {
                debug!("CJK: no timestamp adjustments needed");
            }
        }
        enforce_min_duration(&mut rows);
        Ok(rows)
    }

    /// Exact substring search of each cleaned source line, moving a cursor
    /// forward through the stream. A line not found after the cursor is
    /// searched again from the start.
    fn primary_pass(&self, rows: &mut [TranslationRow]) -> Result<()> {
        let mut cursor = 0;
        for row in rows.iter_mut() {
            let clean = clean_for_match(&row.source);
            let found = self
                .stream
                .find(&clean, cursor)
                .or_else(|| {
                    let hit = self.stream.find(&clean, 0);
                    if hit.is_some() {
                        warn!("Line matched before the cursor: {}", row.source);
                    }
                    hit
                })
                .ok_or_else(|| {
                    TransubError::Alignment(format!("no exact match for sentence: {}", row.source))
                })?;

            let (first, last, end) = found;
            row.set_times(self.words[first].start, self.words[last].end);
            cursor = end;
        }
        Ok(())
    }

    /// Re-time rows from the echoed origin sentences. Returns the number of
    /// rows changed.
    fn correct_with_origins(&self, rows: &mut [TranslationRow], origins: &[String]) -> usize {
        let cleaned: Vec<String> = origins.iter().map(|o| clean_for_match(o)).collect();
        let mut used = vec![false; cleaned.len()];
        let mut adjusted = 0;

        for i in 0..rows.len() {
            let clean_src = clean_for_match(&rows[i].source);
            if clean_src.is_empty() {
                continue;
            }

            let Some(oi) = self.best_origin(&clean_src, &cleaned, &used) else {
                continue;
            };
            used[oi] = true;

            let Some((first, last, _)) = self.stream.find(&cleaned[oi], 0) else {
                continue;
            };
            let new_start = self.words[first].start;
            let new_end = self.words[last].end;
            let ds = (new_start - rows[i].start).abs();
            let de = (new_end - rows[i].end).abs();

            let meaningful = ds > self.correction_min_delta || de > self.correction_min_delta;
            let plausible = ds < self.correction_max_delta && de < self.correction_max_delta;
            let ordered = i == 0 || new_start >= rows[i - 1].start;
            if meaningful && plausible && ordered {
                debug!(
                    "Re-anchored line {}: {:.2}-{:.2} -> {:.2}-{:.2}",
                    i + 1,
                    rows[i].start,
                    rows[i].end,
                    new_start,
                    new_end
                );
                rows[i].set_times(new_start, new_end);
                adjusted += 1;
            }
        }
        adjusted
    }

    /// First unused origin with the highest similarity above the floor.
    fn best_origin(&self, clean_src: &str, cleaned: &[String], used: &[bool]) -> Option<usize> {
        let unused = || cleaned.iter().enumerate().filter(|(j, _)| !used[*j]);

        if let Some((j, _)) = unused().find(|(_, o)| o.as_str() == clean_src) {
            return Some(j);
        }

        let mut best: Option<usize> = None;
        let mut best_score = self.origin_match_floor;
        for (j, origin) in unused() {
            let score = similarity(clean_src, origin);
            if score > best_score {
                best_score = score;
                best = Some(j);
            }
        }
        best
    }
}

/// Fold rows with no source text into a neighbour so every remaining row can
/// be timed. Their translation is appended to the previous row, or to the next
/// one when they lead.
pub fn merge_empty_sources(rows: Vec<TranslationRow>) -> Vec<TranslationRow> {
    let mut merged: Vec<TranslationRow> = Vec::with_capacity(rows.len());
    let mut pending = String::new();

    for mut row in rows {
        if clean_for_match(&row.source).is_empty() {
            match merged.last_mut() {
                Some(prev) => {
                    if !row.source.trim().is_empty() {
                        prev.source.push_str(row.source.trim());
                    }
                    append_text(&mut prev.translation, &row.translation);
                }
                None => append_text(&mut pending, &row.translation),
            }
            continue;
        }
        if !pending.is_empty() {
            let mut translation = std::mem::take(&mut pending);
            append_text(&mut translation, &row.translation);
            row.translation = translation;
        }
        merged.push(row);
    }

    if !pending.is_empty() {
        warn!("Dropping translation with no source line to attach to: {}", pending);
    }
    merged
}

fn append_text(target: &mut String, extra: &str) {
    let extra = extra.trim();
    if extra.is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(extra);
}

/// Extend a line to the next start when the pause between them is shorter
/// than `max_gap`.
pub fn close_gaps(rows: &mut [TranslationRow], max_gap: f64) {
    for i in 1..rows.len() {
        let gap = rows[i].start - rows[i - 1].end;
        if gap > 0.0 && gap < max_gap {
            let start = rows[i - 1].start;
            let next_start = rows[i].start;
            rows[i - 1].set_times(start, next_start);
        }
    }
}

pub fn enforce_min_duration(rows: &mut [TranslationRow]) {
    for row in rows {
        if row.end <= row.start {
            let start = row.start;
            row.set_times(start, start + MIN_LINE_DURATION);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[(&str, f64, f64)]) -> Vec<WordRecord> {
        items
            .iter()
            .map(|(t, s, e)| WordRecord::new(*t, *s, *e))
            .collect()
    }

    #[test]
    fn test_hello_world_scenario() {
        let w = words(&[("Hello", 0.0, 0.5), ("world", 0.5, 1.0), ("foo", 1.0, 1.5)]);
        let aligner = TimestampAligner::new(&w, "en");
        let rows = aligner
            .align(vec![TranslationRow::new("Hello world", "你好世界")])
            .unwrap();
        assert_eq!(rows[0].start, 0.0);
        assert_eq!(rows[0].end, 1.0);
    }

    #[test]
    fn test_punctuation_and_case_are_ignored() {
        let w = words(&[("hello,", 0.0, 0.4), ("World!", 0.6, 1.0), ("Again", 3.0, 3.5)]);
        let aligner = TimestampAligner::new(&w, "en");
        let rows = aligner
            .align(vec![
                TranslationRow::new("Hello, world!", "a"),
                TranslationRow::new("again.", "b"),
            ])
            .unwrap();
        assert_eq!((rows[0].start, rows[0].end), (0.0, 1.0));
        assert_eq!((rows[1].start, rows[1].end), (3.0, 3.5));
    }

    #[test]
    fn test_repeated_phrase_uses_cursor() {
        let w = words(&[
            ("yes", 0.0, 0.5),
            ("no", 0.5, 1.0),
            ("yes", 5.0, 5.5),
        ]);
        let aligner = TimestampAligner::new(&w, "en");
        let rows = aligner
            .align(vec![
                TranslationRow::new("yes no", "a"),
                TranslationRow::new("yes", "b"),
            ])
            .unwrap();
        assert_eq!(rows[1].start, 5.0);
    }

    #[test]
    fn test_missing_line_is_alignment_error() {
        let w = words(&[("Hello", 0.0, 0.5)]);
        let aligner = TimestampAligner::new(&w, "en");
        let err = aligner.align(vec![TranslationRow::new("Goodbye", "x")]);
        assert!(matches!(err, Err(TransubError::Alignment(_))));
    }

    #[test]
    fn test_gap_closing_and_duration_floor() {
        let mut rows = vec![TranslationRow::new("a", ""), TranslationRow::new("b", ""), TranslationRow::new("c", "")];
        rows[0].set_times(0.0, 1.0);
        rows[1].set_times(1.5, 2.0);
        rows[2].set_times(4.0, 4.0);
        close_gaps(&mut rows, 1.0);
        enforce_min_duration(&mut rows);
        assert_eq!(rows[0].end, 1.5);
        assert_eq!(rows[1].end, 2.0);
        assert!((rows[2].end - 4.1).abs() < 1e-9);
    }

    #[test]
    fn test_empty_sources_merge_into_neighbours() {
        let rows = merge_empty_sources(vec![
            TranslationRow::new("", "lead"),
            TranslationRow::new("One", "一"),
            TranslationRow::new("", "extra"),
            TranslationRow::new("Two", "二"),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].translation, "lead 一 extra");
        assert_eq!(rows[1].translation, "二");
    }

    #[test]
    fn test_cjk_origin_correction() {
        // ASR put the first character of the second sentence at the end of the first word run.
        let w = words(&[
            ("今日", 0.0, 0.4),
            ("は", 0.4, 0.6),
            ("晴れ", 0.6, 1.0),
            ("です", 1.0, 1.4),
            ("明", 1.4, 3.0),
            ("日", 3.0, 3.2),
            ("も", 3.2, 3.4),
            ("晴れ", 3.4, 3.8),
        ]);
        let aligner = TimestampAligner::new(&w, "ja");
        let rows = aligner
            .align_with_origins(
                vec![
                    TranslationRow::new("今日は晴れです明", "a"),
                    TranslationRow::new("日も晴れ", "b"),
                ],
                &["今日は晴れです".to_string(), "明日も晴れ".to_string()],
            )
            .unwrap();

        // "明日も晴れ" re-anchors the second row onto the stray character.
        assert_eq!(rows[1].start, 1.4);
        assert_eq!(rows[1].end, 3.8);
        // Monotonic starts hold.
        assert!(rows[1].start >= rows[0].start);
    }

    #[test]
    fn test_correction_skipped_for_spaced_languages() {
        let w = words(&[("Hello", 0.0, 0.5), ("world", 0.5, 1.0)]);
        let aligner = TimestampAligner::new(&w, "en");
        let rows = aligner
            .align_with_origins(
                vec![TranslationRow::new("Hello world", "x")],
                &["world".to_string()],
            )
            .unwrap();
        assert_eq!((rows[0].start, rows[0].end), (0.0, 1.0));
    }
}
