//! Okapi BM25 keyword scoring over an in-memory candidate set.

use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// BM25 index over a fixed list of documents.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    docs: Vec<Vec<String>>,
    df: HashMap<String, usize>,
    avg_len: f32,
}

impl Bm25Index {
    /// Index `texts`; document `i` keeps index `i` in rankings.
    pub fn new<S: AsRef<str>>(texts: &[S]) -> Self {
        let docs: Vec<Vec<String>> = texts.iter().map(|text| tokenize(text.as_ref())).collect();
        let mut df = HashMap::new();
        for doc in &docs {
            let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for token in seen {
                *df.entry(token.to_string()).or_insert(0) += 1;
            }
        }
        let total_len: usize = docs.iter().map(Vec::len).sum();
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f32 / docs.len() as f32
        };
        Self { docs, df, avg_len }
    }

    /// Score of document `doc` for the query tokens.
    fn score(&self, query_tokens: &[String], doc: &[String]) -> f32 {
        if doc.is_empty() {
            return 0.0;
        }
        let doc_len = doc.len() as f32;
        let mut tf = HashMap::<&str, usize>::new();
        for token in doc {
            *tf.entry(token).or_insert(0) += 1;
        }

        let total_docs = self.docs.len() as f32;
        let mut score = 0.0;
        for token in query_tokens {
            if let Some(freq) = tf.get(token.as_str()) {
                let df_token = self.df.get(token).copied().unwrap_or(0) as f32;
                let idf = ((total_docs - df_token + 0.5) / (df_token + 0.5) + 1.0).ln();
                let freq = *freq as f32;
                let numerator = freq * (K1 + 1.0);
                let denominator =
                    freq + K1 * (1.0 - B + B * (doc_len / self.avg_len.max(1e-3)));
                score += idf * (numerator / denominator.max(1e-6));
            }
        }
        score
    }

    /// Documents with a positive score, best first, at most `top_k`.
    pub fn rank(&self, query: &str, top_k: usize) -> Vec<(usize, f32)> {
        let query_tokens = tokenize(query);
        let mut scored: Vec<(usize, f32)> = self
            .docs
            .iter()
            .enumerate()
            .map(|(idx, doc)| (idx, self.score(&query_tokens, doc)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }
}

/// Lowercased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}
