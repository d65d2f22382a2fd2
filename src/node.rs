//! Tree node records, clusters, and build results shared across the pipeline.
//!
//! Nodes are immutable once produced: every transformation (re-tagging a chunk as level 0,
//! stamping the tree root) returns a new record instead of mutating a shared one, so that
//! nodes of different levels never alias each other.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Words-to-tokens ratio used for all token estimates.
pub const TOKENS_PER_WORD: f64 = 1.3;

/// Kind of node stored in a retrieval tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Original document chunk (always level 0).
    Chunk,
    /// Abstractive summary of a cluster or of other summaries (level 1 and above).
    Summary,
}

impl NodeType {
    /// Stable lowercase label used in store payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Summary => "summary",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chunk" => Ok(Self::Chunk),
            "summary" => Ok(Self::Summary),
            _ => Err(()),
        }
    }
}

/// A unit of text with an embedding, tagged with its position in a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier of the node.
    pub id: String,
    /// Chunk text or summary text.
    pub text: String,
    /// Embedding vector, when one has been computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Tree level (0 = leaf chunk).
    pub tree_level: u32,
    /// Source document the node belongs to.
    pub source_id: String,
    /// Notebook the source belongs to.
    pub notebook_id: String,
    /// Chunk or summary.
    pub node_type: NodeType,
    /// Cluster that produced this summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<usize>,
    /// Ordered ids of the nodes this summary was built from.
    #[serde(default)]
    pub child_node_ids: Vec<String>,
    /// Id of the root shared by every node of one tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_root_id: Option<String>,
    /// Estimated token count of `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

impl Node {
    /// Build a level-0 chunk node.
    pub fn chunk(
        id: impl Into<String>,
        text: impl Into<String>,
        embedding: Option<Vec<f32>>,
        source_id: impl Into<String>,
        notebook_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            tree_level: 0,
            source_id: source_id.into(),
            notebook_id: notebook_id.into(),
            node_type: NodeType::Chunk,
            cluster_id: None,
            child_node_ids: Vec::new(),
            tree_root_id: None,
            token_count: None,
        }
    }

    /// Build a summary node for `tree_level` from the given children.
    pub fn summary(
        text: String,
        tree_level: u32,
        source_id: &str,
        notebook_id: &str,
        cluster_id: Option<usize>,
        child_node_ids: Vec<String>,
    ) -> Self {
        let token_count = Some(estimate_tokens(&text));
        Self {
            id: generate_node_id(),
            text,
            embedding: None,
            tree_level: tree_level.max(1),
            source_id: source_id.to_string(),
            notebook_id: notebook_id.to_string(),
            node_type: NodeType::Summary,
            cluster_id,
            child_node_ids,
            tree_root_id: None,
            token_count,
        }
    }

    /// Re-tag an input chunk as a level-0 leaf of the given source.
    pub fn into_leaf(self, source_id: &str, notebook_id: &str) -> Self {
        Self {
            tree_level: 0,
            node_type: NodeType::Chunk,
            cluster_id: None,
            child_node_ids: Vec::new(),
            tree_root_id: None,
            source_id: source_id.to_string(),
            notebook_id: notebook_id.to_string(),
            token_count: self.token_count.or_else(|| Some(estimate_tokens(&self.text))),
            ..self
        }
    }

    /// Return a copy carrying the given embedding.
    pub fn with_embedding(self, embedding: Vec<f32>) -> Self {
        Self {
            embedding: Some(embedding),
            ..self
        }
    }

    /// Return a copy stamped with the tree root id.
    pub fn with_tree_root(self, root_id: &str) -> Self {
        Self {
            tree_root_id: Some(root_id.to_string()),
            ..self
        }
    }

    /// Whether this node is a non-empty embedding holder.
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|vector| !vector.is_empty())
    }
}

/// Soft grouping of nodes at one level.
///
/// `members` are indices into the slice of nodes that was clustered; `member_ids` and
/// `probabilities` are aligned with them.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Position of the cluster within the level.
    pub cluster_id: usize,
    /// Indices of member nodes in the clustered slice.
    pub members: Vec<usize>,
    /// Ids of member nodes, aligned with `members`.
    pub member_ids: Vec<String>,
    /// Membership probability of each member, aligned with `members`.
    pub probabilities: Vec<f64>,
    /// Mean of the members' reduced embeddings.
    pub centroid: Option<Vec<f64>>,
}

impl Cluster {
    /// Cluster holding every node with probability 1.0.
    pub fn single(nodes: &[Node]) -> Self {
        Self {
            cluster_id: 0,
            members: (0..nodes.len()).collect(),
            member_ids: nodes.iter().map(|node| node.id.clone()).collect(),
            probabilities: vec![1.0; nodes.len()],
            centroid: None,
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Outcome of one tree build invocation.
#[derive(Debug, Clone, Serialize)]
pub struct TreeBuildResult {
    /// Whether the build completed.
    pub success: bool,
    /// Source the tree was built for.
    pub source_id: String,
    /// Notebook of the source.
    pub notebook_id: String,
    /// Total number of nodes across all levels, including chunks.
    pub total_nodes: usize,
    /// Node count per level.
    pub levels: BTreeMap<u32, usize>,
    /// Highest level produced.
    pub max_level: u32,
    /// Every summary node produced (levels 1 and above).
    pub summary_nodes: Vec<Node>,
    /// Input chunks as level-0 leaves, stamped with the root id.
    #[serde(skip)]
    pub leaf_nodes: Vec<Node>,
    /// Id of the root node, when the tree has one.
    pub tree_root_id: Option<String>,
    /// Wall-clock duration of the build.
    #[serde(with = "duration_secs")]
    pub build_time: Duration,
    /// Failure description for unsuccessful builds.
    pub error: Option<String>,
}

impl TreeBuildResult {
    /// Build a failed result carrying the error message.
    pub fn failure(
        source_id: &str,
        notebook_id: &str,
        build_time: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            source_id: source_id.to_string(),
            notebook_id: notebook_id.to_string(),
            total_nodes: 0,
            levels: BTreeMap::new(),
            max_level: 0,
            summary_nodes: Vec::new(),
            leaf_nodes: Vec::new(),
            tree_root_id: None,
            build_time,
            error: Some(error.into()),
        }
    }

    /// Summary nodes grouped by level, in level order.
    pub fn nodes_by_level(&self) -> BTreeMap<u32, Vec<Node>> {
        let mut grouped: BTreeMap<u32, Vec<Node>> = BTreeMap::new();
        for node in &self.summary_nodes {
            grouped.entry(node.tree_level).or_default().push(node.clone());
        }
        grouped
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Estimate the token count of `text` as `words * 1.3`, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * TOKENS_PER_WORD).ceil() as usize
}

/// Fresh random identifier for a node.
pub fn generate_node_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_uses_word_ratio() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }

    #[test]
    fn into_leaf_clears_tree_links() {
        let node = Node {
            tree_level: 3,
            node_type: NodeType::Summary,
            child_node_ids: vec!["x".into()],
            tree_root_id: Some("r".into()),
            ..Node::chunk("a", "text here", None, "old", "nb")
        };
        let leaf = node.into_leaf("src", "nb-2");
        assert_eq!(leaf.tree_level, 0);
        assert_eq!(leaf.node_type, NodeType::Chunk);
        assert!(leaf.child_node_ids.is_empty());
        assert!(leaf.tree_root_id.is_none());
        assert_eq!(leaf.source_id, "src");
        assert_eq!(leaf.notebook_id, "nb-2");
    }

    #[test]
    fn summary_never_sits_at_level_zero() {
        let node = Node::summary("text".into(), 0, "s", "n", Some(0), vec![]);
        assert_eq!(node.tree_level, 1);
        assert_eq!(node.node_type, NodeType::Summary);
    }

    #[test]
    fn node_type_parses_payload_labels() {
        assert_eq!("summary".parse::<NodeType>(), Ok(NodeType::Summary));
        assert_eq!(" Chunk ".parse::<NodeType>(), Ok(NodeType::Chunk));
        assert!("root".parse::<NodeType>().is_err());
    }

    #[test]
    fn nodes_by_level_groups_summaries() {
        let mut result = TreeBuildResult::failure("s", "n", Duration::ZERO, "x");
        result.summary_nodes = vec![
            Node::summary("a".into(), 1, "s", "n", Some(0), vec![]),
            Node::summary("b".into(), 2, "s", "n", None, vec![]),
            Node::summary("c".into(), 1, "s", "n", Some(1), vec![]),
        ];
        let grouped = result.nodes_by_level();
        assert_eq!(grouped[&1].len(), 2);
        assert_eq!(grouped[&2].len(), 1);
    }
}
