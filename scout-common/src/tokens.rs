//! Token estimation for context budgeting
//!
//! The context extractor needs token counts compatible enough with the
//! analyzer's tokenizer to keep assembled context under the model's budget.
//! An exact tokenizer is not worth the dependency here; code and prose both
//! average close to four characters per token, and the extractor stops
//! admitting files at 90% of the budget anyway, which absorbs the error.

/// Characters per token assumed by the estimator
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of a text, rounding up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Truncate `text` to approximately `max_tokens` tokens on a character
/// boundary, appending the truncation sentinel when anything was cut.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> (String, bool) {
    let max_bytes = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }

    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = text[..cut].to_string();
    truncated.push_str("\n[… truncated …]");
    (truncated, true)
}
