// SRT subtitle format
use super::SubtitleEntry;
use crate::error::{Result, TransubError};
use std::time::Duration;

/// Render entries as SRT. Indices are renumbered from 1 in slice order.
pub fn format(entries: &[SubtitleEntry]) -> String {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            // A blank line would end the cue early.
            let text: Vec<&str> = entry.text.lines().filter(|l| !l.trim().is_empty()).collect();
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_timestamp(entry.start),
                format_timestamp(entry.end),
                text.join("\n")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse SRT text. Multi-line cue text is kept joined with `\n`.
pub fn parse(contents: &str) -> Result<Vec<SubtitleEntry>> {
    let normalized = contents.replace("\r\n", "\n");
    let mut entries = Vec::new();

    for block in normalized.split("\n\n") {
        let block = block.trim_matches('\n');
        if block.trim().is_empty() {
            continue;
        }
        let mut lines = block.lines();
        let index_line = lines.next().unwrap_or_default();
        let index: usize = index_line
            .trim()
            .parse()
            .map_err(|_| TransubError::Parse(format!("invalid subtitle index: {index_line}")))?;

        let timing = lines
            .next()
            .ok_or_else(|| TransubError::Parse(format!("subtitle {index} has no timing line")))?;
        let (start, end) = timing
            .split_once(" --> ")
            .ok_or_else(|| TransubError::Parse(format!("invalid timing line: {timing}")))?;

        let text = lines.collect::<Vec<_>>().join("\n");
        entries.push(SubtitleEntry::new(
            index,
            parse_timestamp(start.trim())?,
            parse_timestamp(end.trim())?,
            text,
        ));
    }

    Ok(entries)
}

pub fn format_timestamp(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = d.subsec_millis();
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Parse `HH:MM:SS,mmm`.
pub fn parse_timestamp(s: &str) -> Result<Duration> {
    let invalid = || TransubError::Parse(format!("invalid timestamp: {s}"));

    let (clock, millis) = s.split_once(',').ok_or_else(invalid)?;
    let fields: Vec<&str> = clock.split(':').collect();
    if fields.len() != 3 || millis.len() != 3 {
        return Err(invalid());
    }
    let number = |f: &str| f.parse::<u64>().map_err(|_| invalid());
    let hours = number(fields[0])?;
    let minutes = number(fields[1])?;
    let seconds = number(fields[2])?;
    let millis = number(millis)?;
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }

    Ok(Duration::from_millis(
        ((hours * 60 + minutes) * 60 + seconds) * 1000 + millis,
    ))
}
