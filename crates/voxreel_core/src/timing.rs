use crate::types::{TimeMs, TimedBlock, Transcript};

/// Spread each block's duration evenly across its characters.
///
/// Block text is trimmed and newlines become spaces; blocks left empty
/// contribute neither characters nor timestamps. Character `i` of a block
/// with `k` characters lasting `d` ms is stamped `start + floor(i * d / k)`.
pub fn reconstruct(blocks: &[TimedBlock]) -> Transcript {
    let mut transcript = Transcript::default();

    for block in blocks {
        let text = normalize_block_text(&block.text);
        if text.is_empty() {
            continue;
        }

        let chars: Vec<char> = text.chars().collect();
        let count = chars.len() as i64;
        let duration = (block.end - block.start).0.max(0);

        for i in 0..count {
            transcript
                .timestamps
                .push(block.start + TimeMs(i * duration / count));
        }
        transcript.chars.extend(chars);
    }

    transcript
}

fn normalize_block_text(text: &str) -> String {
    text.trim().replace("\r\n", " ").replace(['\n', '\r'], " ")
}
