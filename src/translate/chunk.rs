use crate::split::SentenceUnit;

const PREVIOUS_CONTEXT_LINES: usize = 3;
const FOLLOWING_CONTEXT_LINES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationChunk {
    pub index: usize,
    pub source_lines: Vec<SentenceUnit>,
    /// Last lines of the previous chunk, for context only.
    pub previous_context: Vec<String>,
    /// First lines of the next chunk, for context only.
    pub following_context: Vec<String>,
}

impl TranslationChunk {
    pub fn lines(&self) -> Vec<String> {
        self.source_lines.iter().map(|u| u.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.source_lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_lines.is_empty()
    }

    pub fn text(&self) -> String {
        self.lines().join("\n")
    }
}

/// Pack lines into chunks of at most `chunk_size` characters (counting one
/// newline per line) and at most `max_lines` lines. A line longer than the
/// budget gets a chunk of its own.
pub fn partition(units: &[SentenceUnit], chunk_size: usize, max_lines: usize) -> Vec<TranslationChunk> {
    let max_lines = max_lines.max(1);
    let mut groups: Vec<Vec<SentenceUnit>> = Vec::new();
    let mut current: Vec<SentenceUnit> = Vec::new();
    let mut chars = 0;

    for unit in units {
        let line_chars = unit.text.chars().count() + 1;
        if !current.is_empty() && (chars + line_chars > chunk_size || current.len() == max_lines) {
            groups.push(std::mem::take(&mut current));
            chars = 0;
        }
        chars += line_chars;
        current.push(unit.clone());
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let texts: Vec<Vec<String>> = groups
        .iter()
        .map(|g| g.iter().map(|u| u.text.clone()).collect())
        .collect();

    groups
        .into_iter()
        .enumerate()
        .map(|(index, source_lines)| {
            let previous_context = index
                .checked_sub(1)
                .map(|p| {
                    let prev = &texts[p];
                    prev[prev.len().saturating_sub(PREVIOUS_CONTEXT_LINES)..].to_vec()
                })
                .unwrap_or_default();
            let following_context = texts
                .get(index + 1)
                .map(|next| next.iter().take(FOLLOWING_CONTEXT_LINES).cloned().collect())
                .unwrap_or_default();
            TranslationChunk {
                index,
                source_lines,
                previous_context,
                following_context,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(texts: &[&str]) -> Vec<SentenceUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| SentenceUnit::new(*t, i))
            .collect()
    }

    #[test]
    fn test_closes_on_char_budget() {
        // 9 chars + newline each: two fit in 20, the third does not.
        let chunks = partition(&units(&["aaaaaaaaa", "bbbbbbbbb", "ccccccccc"]), 20, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].lines(), vec!["ccccccccc"]);
    }

    #[test]
    fn test_closes_on_line_count() {
        let chunks = partition(&units(&["a", "b", "c", "d", "e"]), 600, 2);
        let sizes: Vec<usize> = chunks.iter().map(TranslationChunk::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_oversized_line_gets_own_chunk() {
        let long = "x".repeat(50);
        let chunks = partition(&units(&["a", &long, "b"]), 20, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_context_windows() {
        let texts: Vec<String> = (0..12).map(|i| format!("line{i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let chunks = partition(&units(&refs), 600, 5);

        assert!(chunks[0].previous_context.is_empty());
        assert_eq!(chunks[0].following_context, vec!["line5", "line6"]);
        assert_eq!(chunks[1].previous_context, vec!["line2", "line3", "line4"]);
        assert!(chunks[2].following_context.is_empty());
    }

    #[test]
    fn test_every_line_once_in_order() {
        let texts: Vec<String> = (0..37).map(|i| format!("sentence number {i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let chunks = partition(&units(&refs), 60, 10);
        let flat: Vec<String> = chunks.iter().flat_map(TranslationChunk::lines).collect();
        assert_eq!(flat, texts);
    }
}
