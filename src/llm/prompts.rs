use crate::translate::summary::Term;

/// In-band marker the split and align prompts use between parts.
pub const BREAK_MARKER: &str = "[br]";

const JSON_ONLY: &str =
    "Note: start your answer with ```json and end it with ```. Do not add any other text.";

/// Quote a string as a JSON literal.
fn quoted(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.replace('"', "\\\"")))
}

pub fn split_prompt(sentence: &str, num_parts: usize, word_limit: usize, language: &str) -> String {
    format!(
        r#"## Role
You are a professional Netflix subtitle splitter fluent in **{language}**.

## Task
Split the given subtitle text into **{num_parts}** parts, each shorter than **{word_limit}** words.

1. Keep every part semantically coherent, following Netflix subtitle standards
2. Most important: keep the parts roughly equal in length (at least 3 words each)
3. Split at natural breaks such as punctuation or conjunctions
4. If the text is a repeated phrase, split in the middle of the repetition

## Steps
1. Analyse the sentence structure, its complexity and the hard spots for splitting
2. Write two alternative splits, marking each split point with {BREAK_MARKER}
3. Compare both alternatives and name the strengths and weaknesses of each
4. Choose the better one

## Text to split
<split_this_sentence>
{sentence}
</split_this_sentence>

## Output JSON only
```json
{{
    "analysis": "short description of the structure, complexity and split difficulties",
    "split1": "first split, with {BREAK_MARKER} at each split point",
    "split2": "alternative split, with {BREAK_MARKER} at each split point",
    "assess": "comparison of both splits",
    "choice": "1 or 2"
}}
```

{JSON_ONLY}"#
    )
}

pub fn summary_prompt(
    source_content: &str,
    src_lang: &str,
    tgt_lang: &str,
    existing_terms: &[Term],
) -> String {
    let terms_note = if existing_terms.is_empty() {
        String::new()
    } else {
        let listed: Vec<String> = existing_terms
            .iter()
            .map(|t| format!("- {}: {} ({})", t.src, t.tgt, t.note))
            .collect();
        format!(
            "\n### Existing terms\nExclude these terms from the extraction:\n{}\n",
            listed.join("\n")
        )
    };

    format!(
        r#"## Role
You are a video translation expert and terminology consultant, skilled in understanding {src_lang} and phrasing {tgt_lang}.

## Task
For the provided {src_lang} video transcript:
1. Summarize the topic in two sentences
2. Extract technical terms and names with their {tgt_lang} translation (excluding existing terms)
3. Give a short note for each term
{terms_note}
Steps:
1. Topic summary: skim for an overall understanding, then write two sentences. The first names the topic, the second the key points.
2. Term extraction: mark technical terms and names, give a {tgt_lang} translation or keep the original, add a short note. Extract no more than 15 terms.

## Input
<text>
{source_content}
</text>

## Output JSON only
```json
{{
  "theme": "two-sentence summary of the video",
  "terms": [
    {{
      "src": "{src_lang} term",
      "tgt": "{tgt_lang} translation or original",
      "note": "short note"
    }}
  ]
}}
```

{JSON_ONLY}"#
    )
}

/// Context block shared by both translation passes of one chunk.
pub fn shared_prompt(
    previous: &[String],
    following: &[String],
    theme: &str,
    things_to_note: &str,
) -> String {
    format!(
        "### Context\n<previous_content>\n{}\n</previous_content>\n\n<subsequent_content>\n{}\n</subsequent_content>\n\n### Summary\n{}\n\n### Points to note\n{}",
        previous.join("\n"),
        following.join("\n"),
        theme,
        things_to_note
    )
}

pub fn faithfulness_prompt(lines: &[String], shared: &str, src_lang: &str, tgt_lang: &str) -> String {
    let entries: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let n = i + 1;
            format!(
                "  \"{n}\": {{\n    \"origin\": {},\n    \"direct\": {}\n  }}",
                quoted(line),
                quoted(&format!("literal {tgt_lang} translation {n}."))
            )
        })
        .collect();
    let json_format = format!("{{\n{}\n}}", entries.join(",\n"));
    let subtitles = lines.join("\n");

    format!(
        r#"## Role
You are a professional Netflix subtitle translator fluent in {src_lang} and {tgt_lang} and in the cultures behind both.
Your strength is understanding the meaning and structure of the original {src_lang} text and rendering it faithfully in {tgt_lang}.

## Task
Translate the original {src_lang} subtitles below into {tgt_lang}, line by line.

1. Translate line by line
2. Stay faithful to the original and convey its meaning accurately
3. Take the context and terminology into account

{shared}

<principles>
1. Faithfulness: convey content and meaning without changing, adding or dropping anything.
2. Terminology: use technical terms correctly and consistently.
3. Context: reflect the background of the text.
</principles>

## Input
<subtitles>
{subtitles}
</subtitles>

## Output JSON only
```json
{json_format}
```

{JSON_ONLY}"#
    )
}

/// `faithful` holds `(origin, direct)` per line, in order.
pub fn expressiveness_prompt(
    faithful: &[(String, String)],
    shared: &str,
    src_lang: &str,
    tgt_lang: &str,
) -> String {
    let entries: Vec<String> = faithful
        .iter()
        .enumerate()
        .map(|(i, (origin, direct))| {
            format!(
                "  \"{}\": {{\n    \"origin\": {},\n    \"direct\": {},\n    \"reflect\": \"your reflection on the literal translation\",\n    \"free\": \"your free translation\"\n  }}",
                i + 1,
                quoted(origin),
                quoted(direct)
            )
        })
        .collect();
    let json_format = format!("{{\n{}\n}}", entries.join(",\n"));
    let subtitles: Vec<&str> = faithful.iter().map(|(o, _)| o.as_str()).collect();
    let subtitles = subtitles.join("\n");

    format!(
        r#"## Role
You are a professional Netflix subtitle translator and language consultant.
You understand the original {src_lang} precisely and know how to make a {tgt_lang} translation read naturally to its audience.

## Task
A literal translation of the original {src_lang} subtitles already exists.
Reflect on it and improve it into natural, fluent {tgt_lang} subtitles.

1. Review the literal translation line by line and point out problems
2. Suggest concrete improvements
3. Write a free translation based on that review
4. Do not add notes or explanations to the translation
5. Do not leave any free translation empty

{shared}

<analysis_steps>
1. Reflect on the literal translation: fluency, whether the style matches the original, and where it is too wordy for a subtitle.
2. Free {tgt_lang} translation: natural phrasing that a {tgt_lang} audience understands at once, with a register that fits the topic.
</analysis_steps>

## Input
<subtitles>
{subtitles}
</subtitles>

## Output JSON only
```json
{json_format}
```

{JSON_ONLY}"#
    )
}

pub fn align_prompt(
    src_sub: &str,
    tr_sub: &str,
    src_parts: &[String],
    src_lang: &str,
    tgt_lang: &str,
) -> String {
    let align_parts: Vec<String> = src_parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            format!(
                "        {{\n            \"src_part_{n}\": {},\n            \"target_part_{n}\": \"matching {tgt_lang} part\"\n        }}",
                quoted(part),
                n = i + 1
            )
        })
        .collect();
    let align_parts = align_parts.join(",\n");
    let joined = src_parts.join(&format!(" {BREAK_MARKER} "));

    format!(
        r#"## Role
You are a Netflix subtitle alignment expert fluent in {src_lang} and {tgt_lang}.

## Task
We have the {src_lang} and {tgt_lang} subtitles of one line, plus the {src_lang} line already split into parts.
Split the {tgt_lang} subtitle to match those parts.

1. Analyse how word order and structure correspond between the two subtitles
2. Split the {tgt_lang} subtitle following the pre-split {src_lang} parts
3. Never leave a part empty. If a clean semantic split is impossible, rephrase slightly
4. Do not add notes or explanations

## Input
<subtitles>
{src_lang} original: {src_sub_q}
{tgt_lang} original: {tr_sub_q}
Pre-split {src_lang} subtitle ({BREAK_MARKER} marks split points): {joined}
</subtitles>

## Output JSON only
```json
{{
    "analysis": "short analysis of word order, structure and meaning across both subtitles",
    "align": [
{align_parts}
    ]
}}
```

{JSON_ONLY}"#,
        src_sub_q = quoted(src_sub),
        tr_sub_q = quoted(tr_sub),
    )
}

pub fn trim_prompt(text: &str, duration: f64) -> String {
    format!(
        r#"## Role
You are a professional subtitle editor who tightens over-long subtitles before they reach voice actors.
You shorten a subtitle slightly while keeping its meaning and structure intact.

## Input
<subtitles>
Subtitle: {text_q}
Duration: {duration:.2} seconds
</subtitles>

## Rules
a. Remove filler words without changing meaningful content.
b. Drop unnecessary modifiers or pronouns, for example:
   - "Please explain your thought process to me" can become "Please explain your reasoning"
   - "We need to carefully analyse this complex problem" can become "We need to analyse this problem"

## Steps
1. Analysis: briefly note the structure, the key information and the filler that can go.
2. Trim: apply the rules and produce the shorter subtitle.

## Output JSON only
```json
{{
    "analysis": "short analysis of the subtitle and where to trim",
    "result": "the trimmed subtitle, in the subtitle's original language"
}}
```

{JSON_ONLY}"#,
        text_q = quoted(text),
    )
}
