#![deny(missing_docs)]

//! Hierarchical RAPTOR retrieval trees for notebook document chat.

/// Recursive soft clustering of node embeddings.
pub mod clustering;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Prompt-completion client abstraction and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Tree build metrics helpers.
pub mod metrics;
/// Node, cluster, and build result records.
pub mod node;
/// Level-aware hybrid retrieval.
pub mod retrieval;
/// Tree node and source status persistence.
pub mod store;
/// Cluster and root summarization.
pub mod summarizer;
/// Multi-level tree construction.
pub mod tree;
/// Background tree build worker.
pub mod worker;
