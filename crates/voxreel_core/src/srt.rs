use std::path::Path;

use crate::error::{CoreError, Result};
use crate::types::{RetimedEntry, TimeMs, TimedBlock};

/// Parse SubRip text into timed blocks, in file order.
///
/// Index lines are optional. Formatting tags (`<i>`, `{\an8}`) are removed
/// and multi-line cue text is kept with `\n` separators.
pub fn parse_srt(input: &str) -> Result<Vec<TimedBlock>> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut blocks = Vec::new();
    let mut lines = input.lines().enumerate().peekable();

    while let Some((line_no, line)) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (times_no, times) = if line.contains("-->") {
            (line_no, line)
        } else {
            match lines.next() {
                Some((n, l)) => (n, l.trim()),
                None => {
                    return Err(CoreError::SrtParse {
                        line: line_no + 1,
                        reason: "cue is missing a timestamp line".into(),
                    })
                }
            }
        };

        let (start_raw, end_raw) = times.split_once("-->").ok_or_else(|| CoreError::SrtParse {
            line: times_no + 1,
            reason: "timestamp line must contain '-->'".into(),
        })?;
        let start = parse_timestamp(start_raw.trim(), times_no + 1)?;
        // Positioning hints may follow the end time.
        let end_field = end_raw.split_whitespace().next().unwrap_or_default();
        let end = parse_timestamp(end_field, times_no + 1)?;

        let mut text_lines = Vec::new();
        while let Some((_, next)) = lines.peek() {
            if next.trim().is_empty() {
                break;
            }
            if let Some((_, text)) = lines.next() {
                text_lines.push(strip_tags(text.trim()));
            }
        }

        blocks.push(TimedBlock {
            text: text_lines.join("\n"),
            start,
            end,
        });
    }

    Ok(blocks)
}

fn parse_timestamp(value: &str, line: usize) -> Result<TimeMs> {
    let bad = |reason: &str| CoreError::SrtParse {
        line,
        reason: format!("{reason} in timestamp '{value}'"),
    };

    let cleaned = value.replace('.', ",");
    let (hms, frac) = cleaned.split_once(',').unwrap_or((cleaned.as_str(), "0"));
    let mut parts = hms.split(':');
    let mut field = |name: &str| -> Result<i64> {
        parts
            .next()
            .ok_or_else(|| bad(&format!("missing {name}")))?
            .trim()
            .parse::<i64>()
            .map_err(|_| bad(&format!("invalid {name}")))
    };
    let hours = field("hours")?;
    let minutes = field("minutes")?;
    let seconds = field("seconds")?;
    if parts.next().is_some() {
        return Err(bad("too many components"));
    }

    let mut millis_str: String = frac.chars().take(3).collect();
    while millis_str.len() < 3 {
        millis_str.push('0');
    }
    let millis = millis_str
        .parse::<i64>()
        .map_err(|_| bad("invalid milliseconds"))?;

    Ok(TimeMs((hours * 3600 + minutes * 60 + seconds) * 1000 + millis))
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut closer: Option<char> = None;
    for c in text.chars() {
        match closer {
            Some(end) if c == end => closer = None,
            Some(_) => {}
            None if c == '<' => closer = Some('>'),
            None if c == '{' => closer = Some('}'),
            None => out.push(c),
        }
    }
    out
}

/// Render entries as SubRip text.
pub fn format_srt(entries: &[RetimedEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            entry.index,
            entry.start.to_srt(),
            entry.end.to_srt(),
            entry.text
        ));
    }
    out
}

pub fn read_srt_file(path: impl AsRef<Path>) -> Result<Vec<TimedBlock>> {
    let data = std::fs::read_to_string(path.as_ref())?;
    parse_srt(&data)
}

pub fn write_srt_file(path: impl AsRef<Path>, entries: &[RetimedEntry]) -> Result<()> {
    std::fs::write(path.as_ref(), format_srt(entries))?;
    Ok(())
}
