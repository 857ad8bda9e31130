use crate::text::{is_punctuation_only, is_unspaced, token_count};

/// Abbreviations whose trailing period never ends a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "no", "fig",
    "approx", "dept", "inc", "ltd", "co", "u.s", "u.k", "mt", "ft", "jan", "feb", "mar", "apr",
    "jun", "jul", "aug", "sep", "sept", "oct", "nov", "dec",
];

const SENTENCE_ENDERS: &[char] = &['.', '!', '?', '。', '！', '？', '．', '…', '‼'];

/// Closers that stay attached to the sentence they close.
const CLOSERS: &[char] = &['"', '\'', '”', '’', ')', ']', '」', '』', '）', '»'];

const COMMAS: &[char] = &[',', '，', '、'];

/// Split running text into sentences at terminal punctuation.
pub fn split_boundaries(text: &str, language: &str) -> Vec<String> {
    let unspaced = is_unspaced(language);
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let (_, c) = chars[i];
        if !SENTENCE_ENDERS.contains(&c) {
            i += 1;
            continue;
        }

        // Swallow runs like "?!" or "..." plus any closing quotes.
        let mut j = i + 1;
        while j < chars.len() && SENTENCE_ENDERS.contains(&chars[j].1) {
            j += 1;
        }
        while j < chars.len() && CLOSERS.contains(&chars[j].1) {
            j += 1;
        }

        let end = chars.get(j).map_or(text.len(), |(b, _)| *b);
        let followed_by_space = chars.get(j).map_or(true, |(_, n)| n.is_whitespace());
        let wide = !c.is_ascii();

        let is_boundary = if unspaced && wide {
            true
        } else if !followed_by_space {
            false
        } else if c == '.' && j == i + 1 {
            !is_abbreviation(&text[start..chars[i].0]) && !next_starts_lowercase(&chars[j..])
        } else {
            true
        };

        if is_boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
        i = j;
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn is_abbreviation(before: &str) -> bool {
    let Some(word) = before.split_whitespace().last() else {
        return false;
    };
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric());
    let lower = word.to_lowercase();
    // Single initials such as "J." in "J. R. R. Tolkien".
    if word.chars().count() == 1 && word.chars().all(char::is_uppercase) {
        return true;
    }
    ABBREVIATIONS.contains(&lower.as_str())
}

fn next_starts_lowercase(rest: &[(usize, char)]) -> bool {
    rest.iter()
        .map(|(_, c)| *c)
        .find(|c| !c.is_whitespace())
        .is_some_and(char::is_lowercase)
}

/// Glue sentences that start or end with a dash or ellipsis onto their neighbour.
pub fn merge_continuations(sentences: Vec<String>, joiner: &str) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(sentences.len());
    for sentence in sentences {
        let continues = merged.last().is_some_and(|prev: &String| {
            sentence.starts_with('-')
                || sentence.starts_with("...")
                || sentence.starts_with('…')
                || prev.ends_with('-')
                || prev.ends_with("...")
                || prev.ends_with('…')
        });
        match merged.last_mut() {
            Some(prev) if continues => {
                prev.push_str(joiner);
                prev.push_str(&sentence);
            }
            _ => merged.push(sentence),
        }
    }
    merged
}

/// Append lines made only of punctuation to the previous line.
pub fn merge_punctuation_only(sentences: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(sentences.len());
    for sentence in sentences {
        match merged.last_mut() {
            Some(prev) if is_punctuation_only(&sentence) => prev.push_str(sentence.trim()),
            _ => merged.push(sentence),
        }
    }
    merged
}

/// Split after commas whose both sides are long enough to stand alone.
///
/// Spaced scripts need `min_words` words on each side; unspaced scripts need
/// twice that many characters.
pub fn split_by_comma(sentence: &str, language: &str, min_words: usize) -> Vec<String> {
    let min_tokens = if is_unspaced(language) {
        min_words * 2
    } else {
        min_words
    };

    let mut parts = Vec::new();
    let mut start = 0;

    for (idx, c) in sentence.char_indices() {
        if !COMMAS.contains(&c) {
            continue;
        }
        let cut = idx + c.len_utf8();
        let left = &sentence[start..cut];
        let right = &sentence[cut..];
        if token_count(left, language) >= min_tokens && token_count(right, language) >= min_tokens
        {
            parts.push(left.trim().to_string());
            start = cut;
        }
    }

    let rest = sentence[start..].trim();
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_english() {
        let s = split_boundaries("Hello there. How are you? I'm fine!", "en");
        assert_eq!(s, vec!["Hello there.", "How are you?", "I'm fine!"]);
    }

    #[test]
    fn test_abbreviations_and_initials_do_not_split() {
        let s = split_boundaries("Mr. Smith met Dr. Jones. They talked.", "en");
        assert_eq!(s, vec!["Mr. Smith met Dr. Jones.", "They talked."]);

        let s = split_boundaries("Written by J. Tolkien in 1954. Great book.", "en");
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_decimals_and_lowercase_continuations() {
        let s = split_boundaries("It costs 3.5 dollars. ok fine", "en");
        assert_eq!(s, vec!["It costs 3.5 dollars. ok fine"]);
    }

    #[test]
    fn test_closing_quote_stays_with_sentence() {
        let s = split_boundaries("He said \"stop.\" Then he left.", "en");
        assert_eq!(s, vec!["He said \"stop.\"", "Then he left."]);
    }

    #[test]
    fn test_boundaries_unspaced() {
        let s = split_boundaries("今日は晴れです。明日は雨？そうですね", "ja");
        assert_eq!(s, vec!["今日は晴れです。", "明日は雨？", "そうですね"]);
    }

    #[test]
    fn test_merge_continuations() {
        let merged = merge_continuations(
            vec!["Well...".into(), "maybe not.".into(), "- Right.".into(), "Done.".into()],
            " ",
        );
        assert_eq!(merged, vec!["Well... maybe not. - Right.", "Done."]);
    }

    #[test]
    fn test_merge_punctuation_only() {
        let merged = merge_punctuation_only(vec!["好的".into(), "。".into(), "走吧".into()]);
        assert_eq!(merged, vec!["好的。", "走吧"]);
    }

    #[test]
    fn test_split_by_comma_needs_long_sides() {
        let parts = split_by_comma("When I got home, the lights were all off", "en", 3);
        assert_eq!(parts, vec!["When I got home,", "the lights were all off"]);

        let parts = split_by_comma("Yes, I think so", "en", 3);
        assert_eq!(parts, vec!["Yes, I think so"]);
    }
}
