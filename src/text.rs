use similar::TextDiff;

/// Languages written without spaces between words.
const UNSPACED_LANGUAGES: [&str; 7] = ["zh", "ja", "ko", "th", "chinese", "japanese", "korean"];

/// Languages that get the origin-based timestamp correction pass.
const CJK_LANGUAGES: [&str; 6] = ["ja", "zh", "ko", "japanese", "chinese", "korean"];

/// Sentence-terminal punctuation, ASCII and full-width.
pub const TERMINAL_PUNCTUATION: [char; 9] = ['.', '!', '?', '。', '！', '？', '．', '…', '‼'];

/// Strip everything but alphanumerics and `_`, lowercased. Used for exact matching
/// of sentences against the ASR character stream.
pub fn clean_for_match(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Character-level similarity ratio in `[0, 1]` (2 * matches / total length).
pub fn similarity(a: &str, b: &str) -> f64 {
    f64::from(TextDiff::from_chars(a, b).ratio())
}

/// Similarity after removing all whitespace from both sides.
pub fn similarity_ignoring_space(a: &str, b: &str) -> f64 {
    let a: String = a.chars().filter(|c| !c.is_whitespace()).collect();
    let b: String = b.chars().filter(|c| !c.is_whitespace()).collect();
    similarity(&a, &b)
}

/// Primary subtag of a language tag, lowercased (`ja-JP` -> `ja`).
pub fn base_code(language: &str) -> String {
    language
        .trim()
        .to_lowercase()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn is_unspaced(language: &str) -> bool {
    UNSPACED_LANGUAGES.contains(&base_code(language).as_str())
}

pub fn is_cjk(language: &str) -> bool {
    CJK_LANGUAGES.contains(&base_code(language).as_str())
}

/// String used to glue tokens of `language` back together.
pub fn joiner(language: &str) -> &'static str {
    if is_unspaced(language) {
        ""
    } else {
        " "
    }
}

/// Count tokens the way length limits are expressed: words for spaced scripts,
/// characters (ignoring whitespace and punctuation) for unspaced ones.
pub fn token_count(text: &str, language: &str) -> usize {
    if is_unspaced(language) {
        text.chars()
            .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
            .count()
    } else {
        text.split_whitespace()
            .filter(|w| w.chars().any(|c| !is_punctuation(c)))
            .count()
    }
}

pub fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '。' | '、' | '，' | '！' | '？' | '．' | '：' | '；' | '「' | '」' | '『' | '』'
                | '（' | '）' | '…' | '—' | '–' | '«' | '»' | '“' | '”' | '‘' | '’' | '・'
                | '¿' | '¡' | '‼'
        )
}

pub fn is_punctuation_only(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| is_punctuation(c) || c.is_whitespace())
}

/// Approximate on-screen width: wide scripts count for more than one column.
pub fn display_width(text: &str) -> f64 {
    text.chars()
        .map(|c| match c as u32 {
            0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF => 1.75,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => 1.5,
            0x0E00..=0x0E7F => 1.0,
            0xFF01..=0xFF5E => 1.8,
            _ => 1.0,
        })
        .sum()
}

/// Convert a language code to a human-readable name for prompting.
/// Anything that is not a known code is passed through as written.
pub fn language_name(code: &str) -> String {
    let name = match base_code(code).as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "id" => "Indonesian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        _ => return code.trim().to_string(),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_for_match() {
        assert_eq!(clean_for_match("Hello, World!"), "helloworld");
        assert_eq!(clean_for_match("こんにちは、世界。"), "こんにちは世界");
        assert_eq!(clean_for_match("it's 3 o'clock"), "its3oclock");
    }

    #[test]
    fn test_similarity_bounds() {
        assert!((similarity("abc", "abc") - 1.0).abs() < 1e-6);
        assert!(similarity("abc", "xyz") < 1e-6);
        let partial = similarity("hello world", "hello word");
        assert!(partial > 0.9 && partial < 1.0);
    }

    #[test]
    fn test_similarity_ignoring_space() {
        assert!((similarity_ignoring_space("a b c", "abc") - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_language_classes() {
        assert!(is_cjk("ja"));
        assert!(is_cjk("Japanese"));
        assert!(is_cjk("zh-CN"));
        assert!(!is_cjk("en"));
        assert_eq!(joiner("ja"), "");
        assert_eq!(joiner("en"), " ");
    }

    #[test]
    fn test_token_count() {
        assert_eq!(token_count("Hello there , friend", "en"), 3);
        assert_eq!(token_count("今日は、晴れ", "ja"), 5);
    }

    #[test]
    fn test_display_width() {
        assert!((display_width("abc") - 3.0).abs() < 1e-9);
        assert!((display_width("中文") - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_language_name() {
        assert_eq!(language_name("en"), "English");
        assert_eq!(language_name("ZH"), "Chinese");
        assert_eq!(language_name("Simplified Chinese"), "Simplified Chinese");
    }

    #[test]
    fn test_punctuation_only() {
        assert!(is_punctuation_only("..."));
        assert!(is_punctuation_only(" 。"));
        assert!(!is_punctuation_only("ok."));
        assert!(!is_punctuation_only(""));
    }
}
