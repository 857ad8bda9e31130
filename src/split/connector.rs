//! Splitting long sentences before (or after) connector words.
//!
//! Each pass makes at most one cut per sentence and the passes repeat until no
//! cut qualifies, so one bad match cannot shred a sentence in a single step.

use crate::text::{is_punctuation, is_punctuation_only, is_unspaced};
use tracing::debug;

/// Where the cut goes relative to the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cut {
    Before,
    After,
}

struct ConnectorTable {
    connectors: &'static [&'static str],
    /// Connectors that can also act as a determiner or pronoun in front of a noun.
    ambiguous: &'static [&'static str],
    /// Clause-final connectors; the cut goes after them.
    trailing: &'static [&'static str],
    /// Words that open a clause; an ambiguous connector followed by one of
    /// these is a conjunction rather than a determiner.
    clause_starters: &'static [&'static str],
}

static EN: ConnectorTable = ConnectorTable {
    connectors: &[
        "because", "since", "therefore", "thus", "hence", "so", "but", "however", "although",
        "though", "yet", "while", "whereas", "and", "or", "also", "moreover", "furthermore",
        "besides", "that", "which", "where", "when", "who", "whom", "whose", "if", "unless",
        "provided", "even", "despite",
    ],
    ambiguous: &["that", "which", "whose", "so", "yet", "even"],
    trailing: &[],
    clause_starters: EN_CLAUSE_STARTERS,
};

static ZH: ConnectorTable = ConnectorTable {
    connectors: &[
        "因为", "所以", "因此", "故而", "于是", "由于", "但是", "然而", "不过", "可是", "而且",
        "并且", "同时", "另外", "此外", "还有", "如果", "假如", "要是", "倘若", "若是", "万一",
        "虽然", "尽管", "即使", "哪怕", "纵然", "就算",
    ],
    ambiguous: &[],
    trailing: &[],
    clause_starters: &[],
};

static JA: ConnectorTable = ConnectorTable {
    connectors: &[
        "けれども", "けれど", "けど", "しかし", "だが", "でも", "ところが", "にもかかわらず",
        "それでも", "ただし", "もっとも", "だから", "それで", "ので", "から", "ため",
        "したがって", "そのため", "よって", "ゆえに", "なぜなら", "そして", "また", "さらに",
        "それから", "および", "しかも", "その上", "加えて", "なら", "ならば", "たら", "れば",
        "もし", "のに", "ても", "といっても", "にしても", "ときに", "際に",
    ],
    ambiguous: &[],
    trailing: &[
        "けれども", "けれど", "けど", "ので", "から", "ため", "なら", "ならば", "たら", "れば",
        "のに", "ても", "にしても", "ときに", "際に",
    ],
    clause_starters: &[],
};

static FR: ConnectorTable = ConnectorTable {
    connectors: &[
        "parce que", "car", "donc", "ainsi", "puisque", "mais", "cependant", "pourtant",
        "toutefois", "néanmoins", "et", "ou", "aussi", "de plus", "en outre", "que", "qui", "où",
        "quand", "dont", "lequel", "si", "pourvu que", "à condition que", "bien que", "quoique",
        "même si",
    ],
    ambiguous: &["que", "qui", "lequel", "dont"],
    trailing: &[],
    clause_starters: &[],
};

static RU: ConnectorTable = ConnectorTable {
    connectors: &[
        "потому что", "поэтому", "так как", "ведь", "ибо", "но", "однако", "хотя", "впрочем",
        "зато", "и", "или", "также", "кроме того", "притом", "что", "который", "где", "когда",
        "чей", "если", "при условии", "несмотря на", "даже если",
    ],
    ambiguous: &["что", "который", "чей"],
    trailing: &[],
    clause_starters: &[],
};

static ES: ConnectorTable = ConnectorTable {
    connectors: &[
        "porque", "por eso", "así que", "ya que", "puesto que", "pero", "sin embargo", "aunque",
        "no obstante", "y", "o", "también", "además", "asimismo", "que", "cual", "donde",
        "cuando", "quien", "cuyo", "si", "a menos que", "con tal de que", "a pesar de que",
        "si bien",
    ],
    ambiguous: &["que", "cual", "cuyo", "quien"],
    trailing: &[],
    clause_starters: &[],
};

static DE: ConnectorTable = ConnectorTable {
    connectors: &[
        "weil", "denn", "deshalb", "daher", "darum", "aber", "jedoch", "obwohl", "trotzdem",
        "dennoch", "und", "oder", "auch", "außerdem", "ferner", "dass", "welche", "wo", "wann",
        "wer", "dessen", "wenn", "falls", "sofern", "obgleich", "selbst wenn",
    ],
    ambiguous: &["welche", "dessen"],
    trailing: &[],
    clause_starters: &[],
};

static IT: ConnectorTable = ConnectorTable {
    connectors: &[
        "perché", "quindi", "perciò", "poiché", "siccome", "ma", "però", "tuttavia", "sebbene",
        "benché", "e", "o", "anche", "inoltre", "pure", "che", "quale", "dove", "quando", "chi",
        "cui", "se", "qualora", "purché", "anche se", "nonostante", "malgrado",
    ],
    ambiguous: &["che", "quale", "cui"],
    trailing: &[],
    clause_starters: &[],
};

const EN_CLAUSE_STARTERS: &[&str] = &[
    "i", "you", "he", "she", "it", "we", "they", "this", "these", "those", "there", "the", "a",
    "an", "my", "your", "his", "her", "our", "their", "its", "is", "was", "are", "were", "will",
    "would", "can", "could", "should", "has", "have", "had", "do", "does", "did", "if", "though",
    "when", "not",
];

const CONTRACTION_SUFFIXES: &[&str] = &[
    "'s", "'re", "'ve", "'ll", "'d", "’s", "’re", "’ve", "’ll", "’d",
];

fn table_for(language: &str) -> Option<&'static ConnectorTable> {
    let code = language.trim().to_lowercase();
    let code = code.split(['-', '_']).next().unwrap_or_default();
    match code {
        "en" | "english" => Some(&EN),
        "zh" | "chinese" => Some(&ZH),
        "ja" | "japanese" => Some(&JA),
        "fr" | "french" => Some(&FR),
        "ru" | "russian" => Some(&RU),
        "es" | "spanish" => Some(&ES),
        "de" | "german" => Some(&DE),
        "it" | "italian" => Some(&IT),
        _ => None,
    }
}

/// Split one sentence at connectors that have at least `context_words` words of
/// context on both sides. Languages without a table are returned unchanged.
pub fn split_by_connectors(sentence: &str, language: &str, context_words: usize) -> Vec<String> {
    let Some(table) = table_for(language) else {
        return vec![sentence.trim().to_string()];
    };
    let unspaced = is_unspaced(language);
    let context_words = context_words.max(1);

    let mut sentences = vec![sentence.trim().to_string()];
    loop {
        let mut split_occurred = false;
        let mut next = Vec::with_capacity(sentences.len() + 1);

        for sent in sentences {
            let cut = if unspaced {
                find_unspaced_cut(&sent, table, context_words)
            } else {
                find_spaced_cut(&sent, table, context_words)
            };
            match cut {
                Some(at) => {
                    let (left, right) = sent.split_at(at);
                    debug!("Split at connector: {} | {}", left.trim(), right.trim());
                    next.push(left.trim().to_string());
                    next.push(right.trim().to_string());
                    split_occurred = true;
                }
                None => next.push(sent),
            }
        }

        sentences = next;
        if !split_occurred {
            return sentences;
        }
    }
}

struct Token<'a> {
    text: &'a str,
    offset: usize,
}

impl Token<'_> {
    fn core(&self) -> String {
        self.text
            .trim_matches(|c: char| is_punctuation(c) && c != '\'' && c != '’')
            .to_lowercase()
    }

    fn is_word(&self) -> bool {
        !is_punctuation_only(self.text)
    }
}

fn tokenize(sentence: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in sentence.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                tokens.push(Token {
                    text: &sentence[s..i],
                    offset: s,
                });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            text: &sentence[s..],
            offset: s,
        });
    }
    tokens
}

/// Byte offset of the first qualifying cut in a space-separated sentence.
fn find_spaced_cut(
    sentence: &str,
    table: &ConnectorTable,
    context_words: usize,
) -> Option<usize> {
    let tokens = tokenize(sentence);
    let cores: Vec<String> = tokens.iter().map(Token::core).collect();

    for i in 0..tokens.len() {
        let Some(len) = match_connector(&cores[i..], table.connectors) else {
            continue;
        };
        let connector = table
            .connectors
            .iter()
            .find(|c| c.split_whitespace().eq(cores[i..i + len].iter().map(String::as_str)));

        // "that's", "that 's"
        if CONTRACTION_SUFFIXES.iter().any(|s| cores[i + len - 1].ends_with(s)) {
            continue;
        }
        if let Some(next) = tokens.get(i + len) {
            if next.text.starts_with('\'') || next.text.starts_with('’') {
                continue;
            }
        }

        let left = tokens[i.saturating_sub(context_words)..i]
            .iter()
            .filter(|t| t.is_word())
            .count();
        let right_end = (i + len + context_words).min(tokens.len());
        let right = tokens[i + len..right_end]
            .iter()
            .filter(|t| t.is_word())
            .count();
        if left < context_words || right < context_words {
            continue;
        }

        if let Some(connector) = connector {
            if table.ambiguous.contains(connector) {
                let after_comma = i > 0 && tokens[i - 1].text.ends_with([',', ';', ':']);
                let opens_clause = cores
                    .get(i + len)
                    .is_some_and(|n| table.clause_starters.contains(&n.as_str()));
                if !after_comma && !opens_clause {
                    continue;
                }
            }
        }

        return Some(tokens[i].offset);
    }
    None
}

/// Number of tokens of the longest connector that starts `cores`.
fn match_connector(cores: &[String], connectors: &[&str]) -> Option<usize> {
    connectors
        .iter()
        .filter_map(|c| {
            let words: Vec<&str> = c.split_whitespace().collect();
            let matches = words.len() <= cores.len()
                && words.iter().zip(cores).all(|(w, core)| *w == core.as_str());
            matches.then_some(words.len())
        })
        .max()
}

fn content_chars(text: &str) -> usize {
    text.chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .count()
}

/// Byte offset of the first qualifying cut in an unspaced sentence.
/// Context is counted in characters.
fn find_unspaced_cut(sentence: &str, table: &ConnectorTable, context_chars: usize) -> Option<usize> {
    let mut by_length: Vec<&str> = table
        .connectors
        .iter()
        .copied()
        .filter(|c| c.chars().count() >= 2)
        .collect();
    by_length.sort_by_key(|c| std::cmp::Reverse(c.len()));

    for (pos, _) in sentence.char_indices() {
        let rest = &sentence[pos..];
        let Some(connector) = by_length.iter().find(|c| rest.starts_with(**c)) else {
            continue;
        };
        let end = pos + connector.len();
        if content_chars(&sentence[..pos]) < context_chars
            || content_chars(&sentence[end..]) < context_chars
        {
            continue;
        }
        let cut = if table.trailing.contains(connector) {
            Cut::After
        } else {
            Cut::Before
        };
        return Some(match cut {
            Cut::Before => pos,
            Cut::After => end,
        });
    }
    None
}
