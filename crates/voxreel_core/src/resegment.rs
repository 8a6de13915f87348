use std::path::Path;

use crate::error::{CoreError, Result};
use crate::report::Reporter;
use crate::srt;
use crate::timing;
use crate::types::{RetimedEntry, SubtitleLayout, TimeMs, Transcript};

/// Clause terminators, full-width and ASCII.
pub const PUNCTUATION: [char; 11] = ['，', '。', '！', '？', '、', ',', '.', ':', ';', '!', '?'];

/// Duration given to a caption whose reconstructed end precedes its start.
pub const DEGENERATE_FLOOR: TimeMs = TimeMs(100);

pub fn is_punctuation(c: char) -> bool {
    PUNCTUATION.contains(&c)
}

/// Split text after every punctuation mark. Each clause keeps its terminator,
/// surrounding whitespace is trimmed and empty clauses are skipped.
pub fn split_clauses(text: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if is_punctuation(c) {
            push_clause(&mut clauses, &current);
            current.clear();
        }
    }
    push_clause(&mut clauses, &current);

    clauses
}

fn push_clause(clauses: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        clauses.push(trimmed.to_string());
    }
}

/// Hard-wrap a clause into lines of at most `max_chars` characters.
pub fn wrap_clause(clause: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = clause.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Re-split a transcript into display-ready captions and re-attach timing.
///
/// Lines are produced clause by clause and grouped into blocks of
/// `max_lines_per_block`. A running character offset into the transcript
/// maps every block back onto the per-character timestamps; punctuation-only
/// blocks are dropped but still advance the offset by their length.
pub fn resegment(transcript: &Transcript, layout: &SubtitleLayout) -> Result<Vec<RetimedEntry>> {
    layout.validate()?;
    if transcript.is_empty() {
        return Ok(Vec::new());
    }

    let max_chars = layout.max_chars_per_line;
    let lines: Vec<String> = split_clauses(&transcript.text())
        .iter()
        .flat_map(|clause| wrap_clause(clause, max_chars))
        .collect();

    let timestamps = &transcript.timestamps;
    let mut entries: Vec<RetimedEntry> = Vec::new();
    let mut offset = 0usize;

    for chunk in lines.chunks(layout.max_lines_per_block) {
        let mut block = chunk.to_vec();
        merge_orphan_punctuation(&mut block);

        let joined = block.join("\n");
        let joined = joined.trim();
        if joined.is_empty() {
            continue;
        }

        let block_len: usize = block.iter().map(|line| line.chars().count()).sum();
        let cleaned = joined.trim_start_matches(is_punctuation);
        if cleaned.is_empty() {
            offset += block_len;
            continue;
        }

        let end_idx = offset + block_len - 1;
        let (Some(&start), Some(&end)) = (timestamps.get(offset), timestamps.get(end_idx)) else {
            tracing::debug!(
                offset,
                end_idx,
                available = timestamps.len(),
                "caption block outside timestamp range, dropped"
            );
            continue;
        };
        let end = if end < start {
            start + DEGENERATE_FLOOR
        } else {
            end
        };

        entries.push(RetimedEntry {
            index: entries.len() + 1,
            start,
            end,
            text: cleaned.to_string(),
        });
        offset += block_len;
    }

    for entry in &mut entries {
        rebalance_two_lines(entry, max_chars);
    }

    Ok(entries)
}

/// A lone punctuation mark on the last line of a block joins the line above.
fn merge_orphan_punctuation(block: &mut Vec<String>) {
    if block.len() < 2 {
        return;
    }
    let is_orphan = block
        .last()
        .map(|line| {
            let mut chars = line.chars();
            matches!((chars.next(), chars.next()), (Some(c), None) if is_punctuation(c))
        })
        .unwrap_or(false);
    if is_orphan {
        if let Some(mark) = block.pop() {
            if let Some(last) = block.last_mut() {
                last.push_str(&mark);
            }
        }
    }
}

fn rebalance_two_lines(entry: &mut RetimedEntry, max_chars: usize) {
    let lines: Vec<&str> = entry.text.split('\n').collect();
    if lines.len() != 2 {
        return;
    }
    let combined: Vec<char> = lines.concat().chars().collect();
    entry.text = if combined.len() <= max_chars {
        combined.iter().collect()
    } else {
        let (head, tail) = combined.split_at(max_chars);
        format!(
            "{}\n{}",
            head.iter().collect::<String>(),
            tail.iter().collect::<String>()
        )
    };
}

/// Read an SRT file, resegment it and write the result to `output`.
///
/// An empty transcript produces an empty output file. Returns the number of
/// captions written.
pub fn process_subtitle_file(
    input: &Path,
    output: &Path,
    layout: &SubtitleLayout,
    reporter: &dyn Reporter,
) -> Result<usize> {
    if !input.exists() {
        return Err(CoreError::MissingAsset(input.to_path_buf()));
    }

    let blocks = srt::read_srt_file(input)?;
    let transcript = timing::reconstruct(&blocks);
    if transcript.is_empty() {
        reporter.warn(&format!("subtitle file {} has no text", input.display()));
        srt::write_srt_file(output, &[])?;
        return Ok(0);
    }

    let entries = resegment(&transcript, layout)?;
    srt::write_srt_file(output, &entries)?;
    reporter.report(&format!(
        "resegmented {} caption blocks into {} captions",
        blocks.len(),
        entries.len()
    ));
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CollectingReporter;
    use crate::types::TimedBlock;

    fn layout(max_chars: usize, max_lines: usize) -> SubtitleLayout {
        SubtitleLayout::new(max_chars, max_lines).unwrap()
    }

    fn transcript_of(blocks: &[(&str, i64, i64)]) -> Transcript {
        let blocks: Vec<TimedBlock> = blocks
            .iter()
            .map(|(text, start, end)| TimedBlock::new(*text, TimeMs(*start), TimeMs(*end)))
            .collect();
        timing::reconstruct(&blocks)
    }

    #[test]
    fn clauses_keep_their_terminators() {
        assert_eq!(split_clauses("你好，世界。"), vec!["你好，", "世界。"]);
        assert_eq!(split_clauses("one, two! three"), vec!["one,", "two!", "three"]);
        assert_eq!(split_clauses("。。"), vec!["。", "。"]);
        assert!(split_clauses("   ").is_empty());
    }

    #[test]
    fn wrap_yields_ceil_of_length_over_limit() {
        for len in 1..60usize {
            let clause: String = std::iter::repeat('字').take(len).collect();
            for max in 1..15usize {
                let lines = wrap_clause(&clause, max);
                assert_eq!(lines.len(), len.div_ceil(max), "len={len} max={max}");
                assert!(lines.iter().all(|l| l.chars().count() <= max));
                assert_eq!(lines.concat(), clause);
            }
        }
    }

    #[test]
    fn two_clause_example_rewraps_at_limit() {
        let t = transcript_of(&[("你好，世界。", 0, 2000)]);
        let entries = resegment(&t, &layout(4, 2)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].start, TimeMs(0));
        assert_eq!(entries[0].end, TimeMs(1666));
        assert_eq!(entries[0].text, "你好，世\n界。");
    }

    #[test]
    fn two_clause_example_collapses_when_it_fits() {
        let t = transcript_of(&[("你好，世界。", 0, 2000)]);
        let entries = resegment(&t, &layout(6, 2)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "你好，世界。");
        assert_eq!(entries[0].end, TimeMs(1666));
    }

    #[test]
    fn empty_transcript_yields_no_entries() {
        let entries = resegment(&Transcript::default(), &layout(12, 2)).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn invalid_layout_is_rejected() {
        let t = transcript_of(&[("abc", 0, 300)]);
        let bad = SubtitleLayout {
            max_chars_per_line: 0,
            max_lines_per_block: 2,
        };
        assert!(matches!(resegment(&t, &bad), Err(CoreError::InvalidLayout(_))));
    }

    #[test]
    fn orphan_punctuation_joins_previous_line() {
        let t = transcript_of(&[("abcd。", 0, 500)]);
        let entries = resegment(&t, &layout(4, 2)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "abcd。");
        assert_eq!(entries[0].end, TimeMs(400));
    }

    #[test]
    fn punctuation_only_block_is_dropped_but_offset_advances() {
        let t = transcript_of(&[("。。。abc", 0, 600)]);
        let entries = resegment(&t, &layout(10, 2)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].text, "abc");
        assert_eq!(entries[0].start, t.timestamps[2]);
        assert_eq!(entries[0].end, t.timestamps[5]);
    }

    #[test]
    fn blocks_past_timestamp_range_are_dropped() {
        let t = Transcript {
            chars: "ab,cd,ef,".chars().collect(),
            timestamps: vec![TimeMs(0), TimeMs(10), TimeMs(20), TimeMs(30)],
        };
        let entries = resegment(&t, &layout(10, 1)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "ab,");
    }

    #[test]
    fn degenerate_timing_gets_fixed_floor() {
        let t = transcript_of(&[("ab", 1000, 2000), ("cd", 0, 100)]);
        let entries = resegment(&t, &layout(10, 2)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start, TimeMs(1000));
        assert_eq!(entries[0].end, TimeMs(1100));
    }

    #[test]
    fn two_line_post_pass_splits_exactly_at_limit() {
        let t = transcript_of(&[("abcde,fghij,", 0, 1200)]);
        let entries = resegment(&t, &layout(6, 2)).unwrap();
        assert_eq!(entries.len(), 1);
        let lines: Vec<&str> = entries[0].lines().collect();
        assert_eq!(lines, vec!["abcde,", "fghij,"]);

        let entries = resegment(&t, &layout(12, 2)).unwrap();
        assert_eq!(entries[0].text, "abcde,fghij,");
    }

    #[test]
    fn entries_are_ordered_and_well_formed() {
        let t = transcript_of(&[
            ("今天天气很好，我们一起去公园散步吧。", 0, 4200),
            ("路上看到了很多花，红的、黄的、紫的，非常漂亮！", 4200, 9800),
            ("Then we went home, tired but happy.", 9800, 12000),
        ]);
        for max_chars in 1..16 {
            for max_lines in 1..4 {
                let entries = resegment(&t, &layout(max_chars, max_lines)).unwrap();
                assert!(!entries.is_empty());
                for (i, entry) in entries.iter().enumerate() {
                    assert_eq!(entry.index, i + 1);
                    assert!(entry.start <= entry.end);
                }
                assert!(entries.windows(2).all(|w| w[0].start <= w[1].start));
            }
        }
    }

    #[test]
    fn process_file_writes_resegmented_srt() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("raw.srt");
        let output = dir.path().join("out.srt");
        std::fs::write(
            &input,
            "1\n00:00:00,000 --> 00:00:02,000\n你好，世界。\n\n",
        )
        .unwrap();

        let reporter = CollectingReporter::new();
        let count = process_subtitle_file(&input, &output, &layout(6, 2), &reporter).unwrap();
        assert_eq!(count, 1);

        let written = std::fs::read_to_string(&output).unwrap();
        assert_eq!(written, "1\n00:00:00,000 --> 00:00:01,666\n你好，世界。\n\n");
        assert_eq!(reporter.messages().len(), 1);
    }

    #[test]
    fn process_file_with_no_text_writes_empty_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("raw.srt");
        let output = dir.path().join("out.srt");
        std::fs::write(&input, "1\n00:00:00,000 --> 00:00:01,000\n   \n\n").unwrap();

        let reporter = CollectingReporter::new();
        let count = process_subtitle_file(&input, &output, &layout(12, 2), &reporter).unwrap();
        assert_eq!(count, 0);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
        assert!(reporter.messages()[0].starts_with("warning:"));
    }

    #[test]
    fn process_file_missing_input() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = process_subtitle_file(
            &dir.path().join("nope.srt"),
            &dir.path().join("out.srt"),
            &layout(12, 2),
            &CollectingReporter::new(),
        );
        assert!(matches!(result, Err(CoreError::MissingAsset(_))));
    }
}
