//! Level-aware hybrid retrieval over stored trees.
//!
//! A query is classified as summary, detail, or mixed; the intent decides which tree levels
//! are searched and how scores are boosted. Candidates are ranked by cosine similarity and,
//! when hybrid search is enabled, fused with BM25 over the original query plus LLM-generated
//! variations. Retrieval never fails: every error degrades to a simpler path.

pub mod bm25;
pub mod cache;
pub mod fusion;
pub mod intent;

pub use cache::NodeCache;
pub use intent::QueryIntent;

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::llm::{LlmClient, LlmError};
use crate::node::Node;
use crate::store::{StoreError, TreeStore};
use bm25::Bm25Index;
use fusion::WeightedRanking;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Failures inside the fusion path; always recovered by falling back to vector ranking.
#[derive(Debug, Error)]
pub(crate) enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("Query variation failed: {0}")]
    Variations(#[from] LlmError),
    #[error("Embedding provider returned {actual} vectors for {expected} queries")]
    QueryCount { expected: usize, actual: usize },
}

/// A retrieved node with its final score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredNode {
    /// The matching node.
    pub node: Node,
    /// Fused and boosted relevance score.
    pub score: f32,
}

/// Retriever bound to one store, embedder, and optional LLM.
pub struct LevelAwareRetriever {
    store: Arc<dyn TreeStore>,
    embedder: Arc<dyn EmbeddingClient>,
    llm: Option<Arc<dyn LlmClient>>,
    config: RetrievalConfig,
    cache: Option<Arc<NodeCache>>,
}

impl LevelAwareRetriever {
    /// Retriever without LLM or cache: intent defaults to detail and no variations are made.
    pub fn new(
        store: Arc<dyn TreeStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm: None,
            config,
            cache: None,
        }
    }

    /// Use `llm` for intent classification and query variations.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Read nodes through a shared cache.
    pub fn with_cache(mut self, cache: Arc<NodeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Rank the nodes of `notebook_id` for `query`, best first.
    pub async fn retrieve(
        &self,
        query: &str,
        notebook_id: &str,
        source_ids: Option<&[String]>,
    ) -> Vec<ScoredNode> {
        let intent = intent::classify_intent(self.llm.as_deref(), query).await;
        let levels = intent::select_levels(intent, &self.config);
        tracing::debug!(?intent, ?levels, notebook_id, "Selected query levels");

        let candidates = self.candidates(notebook_id, &levels, source_ids).await;
        if candidates.is_empty() {
            tracing::debug!(notebook_id, "No candidate nodes");
            return Vec::new();
        }

        let top_k = self.config.similarity_top_k;
        let ranked = if self.config.hybrid_enabled {
            match self.hybrid_rank(query, &candidates).await {
                Ok(ranked) => ranked,
                Err(error) => {
                    tracing::warn!(%error, "Hybrid ranking failed; using vector ranking");
                    self.vector_only(query, &candidates).await
                }
            }
        } else {
            self.vector_only(query, &candidates).await
        };

        let mut results: Vec<ScoredNode> = ranked
            .into_iter()
            .filter_map(|(idx, score)| {
                let node = candidates.get(idx)?;
                Some(ScoredNode {
                    score: intent::boost_score(intent, node.tree_level, score, &self.config),
                    node: node.clone(),
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);

        tracing::info!(
            notebook_id,
            ?intent,
            candidates = candidates.len(),
            results = results.len(),
            "Retrieval completed"
        );
        results
    }

    async fn candidates(
        &self,
        notebook_id: &str,
        levels: &[u32],
        source_ids: Option<&[String]>,
    ) -> Vec<Node> {
        let flat = match source_ids {
            Some(ids) if !ids.is_empty() => self.any_without_tree(ids).await,
            _ => false,
        };
        if flat {
            tracing::debug!(notebook_id, "Some sources have no tree; using flat retrieval");
            return self.fetch_levels(notebook_id, &[0], source_ids).await;
        }

        let nodes = self.fetch_levels(notebook_id, levels, source_ids).await;
        if nodes.is_empty() && levels != [0] {
            return self.fetch_levels(notebook_id, &[0], source_ids).await;
        }
        nodes
    }

    async fn any_without_tree(&self, source_ids: &[String]) -> bool {
        for source_id in source_ids {
            match self.store.has_tree(source_id).await {
                Ok(true) => {}
                Ok(false) => return true,
                Err(error) => {
                    tracing::warn!(source_id = %source_id, %error, "Tree lookup failed");
                    return true;
                }
            }
        }
        false
    }

    async fn fetch_levels(
        &self,
        notebook_id: &str,
        levels: &[u32],
        source_ids: Option<&[String]>,
    ) -> Vec<Node> {
        if let Some(cache) = &self.cache {
            let cached = cache
                .get_or_load(notebook_id, || self.load_notebook(notebook_id))
                .await;
            match cached {
                Ok(nodes) => {
                    return nodes
                        .iter()
                        .filter(|node| levels.contains(&node.tree_level))
                        .filter(|node| {
                            source_ids.is_none_or(|ids| ids.iter().any(|id| *id == node.source_id))
                        })
                        .cloned()
                        .collect();
                }
                Err(error) => {
                    tracing::warn!(notebook_id, %error, "Node cache load failed; reading store directly");
                }
            }
        }

        let mut nodes = Vec::new();
        for level in levels {
            match self
                .store
                .get_nodes_by_tree_level(notebook_id, *level, source_ids)
                .await
            {
                Ok(found) => nodes.extend(found),
                Err(error) => tracing::warn!(notebook_id, level, %error, "Failed to fetch level"),
            }
        }
        nodes
    }

    /// Every node of the notebook at any level a query may select.
    async fn load_notebook(&self, notebook_id: &str) -> Result<Vec<Node>, StoreError> {
        let mut levels: Vec<u32> = std::iter::once(0)
            .chain(self.config.summary_query_levels.iter().copied())
            .chain(self.config.detail_query_levels.iter().copied())
            .collect();
        levels.sort_unstable();
        levels.dedup();

        let mut nodes = Vec::new();
        for level in levels {
            nodes.extend(
                self.store
                    .get_nodes_by_tree_level(notebook_id, level, None)
                    .await?,
            );
        }
        Ok(nodes)
    }

    async fn vector_only(&self, query: &str, candidates: &[Node]) -> Vec<(usize, f32)> {
        match self.embedder.embed_one(query).await {
            Ok(vector) => vector_rank(&vector, candidates, self.config.similarity_top_k),
            Err(error) => {
                tracing::warn!(%error, "Query embedding failed; using keyword ranking");
                let texts: Vec<&str> = candidates.iter().map(|node| node.text.as_str()).collect();
                Bm25Index::new(&texts).rank(query, self.config.similarity_top_k)
            }
        }
    }

    async fn hybrid_rank(
        &self,
        query: &str,
        candidates: &[Node],
    ) -> Result<Vec<(usize, f32)>, RetrievalError> {
        let top_k = self.config.similarity_top_k;
        let queries =
            fusion::generate_queries(self.llm.as_deref(), query, self.config.num_queries).await?;
        let vectors = self.embedder.embed_batch(queries.clone()).await?;
        if vectors.len() != queries.len() {
            return Err(RetrievalError::QueryCount {
                expected: queries.len(),
                actual: vectors.len(),
            });
        }

        let texts: Vec<&str> = candidates.iter().map(|node| node.text.as_str()).collect();
        let keyword_index = Bm25Index::new(&texts);
        let mut rankings = Vec::with_capacity(queries.len() * 2);
        for (text, vector) in queries.iter().zip(&vectors) {
            rankings.push(WeightedRanking {
                hits: vector_rank(vector, candidates, top_k),
                weight: self.config.vector_weight,
            });
            rankings.push(WeightedRanking {
                hits: keyword_index.rank(text, top_k),
                weight: self.config.keyword_weight,
            });
        }

        Ok(fusion::relative_score_fusion(&rankings, queries.len(), top_k))
    }
}

/// Cosine ranking of candidates with an embedding, best first, at most `top_k`.
pub fn vector_rank(query: &[f32], candidates: &[Node], top_k: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(idx, node)| {
            let embedding = node.embedding.as_deref()?;
            Some((idx, cosine_similarity(query, embedding)))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(top_k);
    scored
}

/// Cosine similarity; mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Builds a fresh retriever per request; only the node cache is shared.
#[derive(Clone)]
pub struct RetrieverFactory {
    store: Arc<dyn TreeStore>,
    embedder: Arc<dyn EmbeddingClient>,
    llm: Option<Arc<dyn LlmClient>>,
    config: RetrievalConfig,
    cache: Arc<NodeCache>,
}

impl RetrieverFactory {
    /// Factory with a cache using `config.cache_ttl()`.
    pub fn new(
        store: Arc<dyn TreeStore>,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Option<Arc<dyn LlmClient>>,
        config: RetrievalConfig,
    ) -> Self {
        let cache = Arc::new(NodeCache::new(config.cache_ttl()));
        Self {
            store,
            embedder,
            llm,
            config,
            cache,
        }
    }

    /// A new retriever sharing this factory's cache.
    pub fn retriever(&self) -> LevelAwareRetriever {
        let retriever = LevelAwareRetriever::new(
            Arc::clone(&self.store),
            Arc::clone(&self.embedder),
            self.config.clone(),
        )
        .with_cache(Arc::clone(&self.cache));
        match &self.llm {
            Some(llm) => retriever.with_llm(Arc::clone(llm)),
            None => retriever,
        }
    }

    /// The shared cache, e.g. to invalidate a notebook after a rebuild.
    pub fn cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }
}
