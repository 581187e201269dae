//! Captured-output truncation.
//!
//! Response bodies can be arbitrarily large. Execution rows keep the head of
//! the body, where status documents and error summaries usually sit, followed
//! by a marker saying how much was dropped.

/// Truncate `output` to at most `max_chars` characters, appending a marker
/// when anything was cut:
///
/// ```text
/// <first max_chars chars>
/// ...(N chars truncated)
/// ```
///
/// Counting is by `char`, so multi-byte sequences are never split.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        // Byte length bounds char count, so this is always within budget.
        return output.to_owned();
    }

    let total = output.chars().count();
    if total <= max_chars {
        return output.to_owned();
    }

    let cut = output
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(output.len());
    let omitted = total - max_chars;

    format!("{}\n...({omitted} chars truncated)", &output[..cut])
}
