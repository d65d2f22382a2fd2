//! Prompt assembly, token budgeting, and the extractive fallback.

use crate::node::TOKENS_PER_WORD;

/// Label used for leaf texts in cluster prompts.
pub(crate) const CHUNK_LABEL: &str = "Chunk";
/// Label used for summary texts in root prompts.
pub(crate) const SUMMARY_LABEL: &str = "Summary";

const FALLBACK_EMPTY: &str = "No content available.";

/// Concatenate labelled texts within the item and token budgets.
///
/// Texts are numbered from 1. The text that would overflow `max_tokens` is cut at a word
/// boundary and suffixed with `...`, and nothing after it is included. When no words fit,
/// its section holds only the ellipsis.
pub(crate) fn format_texts(
    texts: &[&str],
    label: &str,
    max_items: usize,
    max_tokens: usize,
) -> String {
    let mut sections = Vec::new();
    let mut used_tokens = 0.0_f64;
    let budget = max_tokens as f64;

    for (idx, text) in texts.iter().take(max_items).enumerate() {
        let text = text.trim();
        let words = count_words(text);
        let tokens = words as f64 * TOKENS_PER_WORD;

        if used_tokens + tokens > budget {
            let remaining_words = ((budget - used_tokens) / TOKENS_PER_WORD).floor() as usize;
            let truncated = truncate_words(text, remaining_words);
            sections.push(format!("[{label} {}]\n{truncated}...", idx + 1));
            break;
        }

        used_tokens += tokens;
        sections.push(format!("[{label} {}]\n{text}", idx + 1));
    }

    sections.join("\n\n")
}

/// Prompt asking for a summary of one cluster of related passages.
pub(crate) fn cluster_prompt(context: &str) -> String {
    format!(
        "System: You write concise, factual summaries of related document passages. \
Capture the main themes, key facts, and how the passages relate. Do not speculate. \
Output a single paragraph.\n\n\
Summarize the following passages:\n\n{context}\n\nSummary:"
    )
}

/// Prompt asking for an overview built from lower-level summaries.
pub(crate) fn root_prompt(context: &str) -> String {
    format!(
        "System: You write high-level overviews of documents. Combine the section summaries \
below into one overview covering the document's purpose, main topics, and conclusions. \
Do not speculate. Output a single paragraph.\n\n\
Section summaries:\n\n{context}\n\nOverview:"
    )
}

/// Deterministic summary from the first sentence of each of the first `max_texts` texts.
pub(crate) fn fallback_summary(texts: &[&str], max_texts: usize) -> String {
    let sentences: Vec<String> = texts
        .iter()
        .take(max_texts)
        .map(|text| text.trim())
        .filter_map(first_sentence)
        .collect();

    if sentences.is_empty() {
        FALLBACK_EMPTY.to_string()
    } else {
        sentences.join(" ")
    }
}

/// Leading sentence with its own terminator; a `.` is added when the text has none.
fn first_sentence(text: &str) -> Option<String> {
    let text = text.trim_start_matches(|c: char| matches!(c, '.' | '!' | '?') || c.is_whitespace());
    if text.is_empty() {
        return None;
    }
    Some(match text.find(['.', '!', '?']) {
        Some(end) => text[..=end].trim().to_string(),
        None => format!("{}.", text.trim_end()),
    })
}

fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}
