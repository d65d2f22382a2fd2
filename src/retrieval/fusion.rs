//! Query variations and relative-score fusion of ranked lists.

use crate::llm::{LlmClient, LlmError};
use std::collections::HashMap;

fn variations_prompt(query: &str, count: usize) -> String {
    format!(
        "You are a helpful assistant that generates multiple search queries based on a \
single input query. Generate {count} search queries, one on each line, related to the \
following input query:\nQuery: {query}\nQueries:\n"
    )
}

/// Strip list markers such as `1.`, `2)`, `-` or `*` from a generated line.
fn strip_marker(line: &str) -> &str {
    let trimmed = line.trim();
    let without_digits = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = if without_digits.len() != trimmed.len() {
        without_digits.trim_start_matches(['.', ')', ':'])
    } else {
        trimmed.trim_start_matches(['-', '*', '•'])
    };
    rest.trim().trim_matches('"').trim()
}

/// Parse up to `count` distinct query variations from an LLM reply.
pub fn parse_variations(reply: &str, original: &str, count: usize) -> Vec<String> {
    let mut variations: Vec<String> = Vec::new();
    for line in reply.lines() {
        if variations.len() == count {
            break;
        }
        let candidate = strip_marker(line);
        if candidate.is_empty()
            || candidate.eq_ignore_ascii_case(original.trim())
            || variations.iter().any(|seen| seen == candidate)
        {
            continue;
        }
        variations.push(candidate.to_string());
    }
    variations
}

/// The original query followed by `num_queries - 1` LLM variations.
///
/// Without an LLM, or when only one query is requested, the original query is used alone.
pub async fn generate_queries(
    llm: Option<&dyn LlmClient>,
    query: &str,
    num_queries: usize,
) -> Result<Vec<String>, LlmError> {
    let mut queries = vec![query.to_string()];
    let wanted = num_queries.saturating_sub(1);
    let Some(llm) = llm else {
        return Ok(queries);
    };
    if wanted == 0 {
        return Ok(queries);
    }

    let reply = llm.complete(&variations_prompt(query, wanted)).await?;
    queries.extend(parse_variations(&reply, query, wanted));
    tracing::debug!(queries = queries.len(), "Generated query variations");
    Ok(queries)
}

/// One ranked list of `(candidate index, raw score)` with its fusion weight.
#[derive(Debug, Clone)]
pub struct WeightedRanking {
    /// Ranked candidates.
    pub hits: Vec<(usize, f32)>,
    /// Weight applied after normalisation.
    pub weight: f32,
}

/// Relative-score fusion.
///
/// Each list is min-max normalised (a list whose scores are all equal normalises to 1.0),
/// multiplied by its weight and divided by `num_queries`; scores of the same candidate are
/// summed across lists. Returns the best `top_k` candidates, highest first.
pub fn relative_score_fusion(
    rankings: &[WeightedRanking],
    num_queries: usize,
    top_k: usize,
) -> Vec<(usize, f32)> {
    let divisor = num_queries.max(1) as f32;
    let mut fused: HashMap<usize, f32> = HashMap::new();

    for ranking in rankings {
        if ranking.hits.is_empty() {
            continue;
        }
        let (min, max) = ranking
            .hits
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), (_, score)| {
                (min.min(*score), max.max(*score))
            });
        let span = max - min;
        for (idx, score) in &ranking.hits {
            let normalised = if span > 0.0 { (score - min) / span } else { 1.0 };
            *fused.entry(*idx).or_insert(0.0) += normalised * ranking.weight / divisor;
        }
    }

    let mut merged: Vec<(usize, f32)> = fused.into_iter().collect();
    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    merged.truncate(top_k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl LlmClient for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn variations_strip_markers_and_duplicates() {
        let reply = "1. revenue in 2023\n2) what was the revenue\n\n- revenue in 2023\nWhat was revenue?";
        let parsed = parse_variations(reply, "What was revenue?", 5);
        assert_eq!(parsed, vec!["revenue in 2023", "what was the revenue"]);
    }

    #[tokio::test]
    async fn generate_queries_keeps_original_first() {
        let llm = Canned("alpha\nbeta\ngamma");
        let queries = generate_queries(Some(&llm), "origin", 3).await.unwrap();
        assert_eq!(queries, vec!["origin", "alpha", "beta"]);

        let alone = generate_queries(None, "origin", 3).await.unwrap();
        assert_eq!(alone, vec!["origin"]);
        let single = generate_queries(Some(&llm), "origin", 1).await.unwrap();
        assert_eq!(single, vec!["origin"]);
    }

    #[test]
    fn fusion_normalises_and_weights() {
        let rankings = vec![
            WeightedRanking {
                hits: vec![(0, 0.9), (1, 0.5), (2, 0.1)],
                weight: 0.5,
            },
            WeightedRanking {
                hits: vec![(2, 8.0), (1, 4.0)],
                weight: 0.5,
            },
        ];

        let fused = relative_score_fusion(&rankings, 1, 10);

        let score = |idx: usize| fused.iter().find(|(i, _)| *i == idx).unwrap().1;
        assert!((score(0) - 0.5).abs() < 1e-6);
        assert!((score(1) - 0.25).abs() < 1e-6);
        assert!((score(2) - 0.5).abs() < 1e-6);
        assert_eq!(fused[0].0, 0);
    }

    #[test]
    fn equal_scores_normalise_to_one() {
        let rankings = vec![WeightedRanking {
            hits: vec![(3, 0.4), (4, 0.4)],
            weight: 1.0,
        }];
        let fused = relative_score_fusion(&rankings, 2, 1);
        assert_eq!(fused, vec![(3, 0.5)]);
    }
}
