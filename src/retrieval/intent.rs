//! Query intent classification, level selection, and level boosting.

use crate::config::RetrievalConfig;
use crate::llm::LlmClient;
use serde::Serialize;

/// Kind of answer a query is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    /// Overview of a document or topic; favours upper levels.
    Summary,
    /// Specific facts; favours leaf chunks.
    Detail,
    /// Both; searches every configured level without boosting.
    Mixed,
}

fn intent_prompt(query: &str) -> String {
    format!(
        "Classify the user's question by the kind of answer it needs.\n\
SUMMARY: asks for an overview, the main points, or what a document is about.\n\
DETAIL: asks for a specific fact, number, name, definition, or quote.\n\
MIXED: needs both an overview and specific details.\n\n\
Question: {query}\n\n\
Answer with exactly one word: SUMMARY, DETAIL, or MIXED."
    )
}

/// Parse a classifier reply; `None` when no label can be identified.
pub fn parse_intent(reply: &str) -> Option<QueryIntent> {
    let upper = reply.trim().to_uppercase();
    let first = upper
        .split(|c: char| !c.is_ascii_alphabetic())
        .find(|word| !word.is_empty());
    let label = |word: &str| match word {
        "SUMMARY" => Some(QueryIntent::Summary),
        "DETAIL" => Some(QueryIntent::Detail),
        "MIXED" => Some(QueryIntent::Mixed),
        _ => None,
    };
    if let Some(intent) = first.and_then(label) {
        return Some(intent);
    }

    let mentioned: Vec<QueryIntent> = ["SUMMARY", "DETAIL", "MIXED"]
        .into_iter()
        .filter(|word| upper.contains(word))
        .filter_map(label)
        .collect();
    match mentioned.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Ask the LLM for the query intent; anything unusable means [`QueryIntent::Detail`].
pub async fn classify_intent(llm: Option<&dyn LlmClient>, query: &str) -> QueryIntent {
    let Some(llm) = llm else {
        return QueryIntent::Detail;
    };
    match llm.complete(&intent_prompt(query)).await {
        Ok(reply) => parse_intent(&reply).unwrap_or_else(|| {
            tracing::debug!(reply = %reply, "Unrecognised intent reply; defaulting to detail");
            QueryIntent::Detail
        }),
        Err(error) => {
            tracing::warn!(%error, "Intent classification failed; defaulting to detail");
            QueryIntent::Detail
        }
    }
}

/// Tree levels searched for `intent`, ascending and without duplicates.
pub fn select_levels(intent: QueryIntent, config: &RetrievalConfig) -> Vec<u32> {
    let mut levels = match intent {
        QueryIntent::Summary => config.summary_query_levels.clone(),
        QueryIntent::Detail => config.detail_query_levels.clone(),
        QueryIntent::Mixed => config
            .summary_query_levels
            .iter()
            .chain(&config.detail_query_levels)
            .copied()
            .collect(),
    };
    levels.sort_unstable();
    levels.dedup();
    levels
}

/// Apply the level boost for `intent` to a fused score.
pub fn boost_score(intent: QueryIntent, tree_level: u32, score: f32, config: &RetrievalConfig) -> f32 {
    match intent {
        QueryIntent::Summary if tree_level > 0 => {
            score * (1.0 + tree_level as f32 * (config.summary_boost_factor - 1.0) / 3.0)
        }
        QueryIntent::Detail if tree_level == 0 => score * config.detail_boost,
        _ => score,
    }
}
