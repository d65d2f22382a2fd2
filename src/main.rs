use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use raptor_rag::{
    config::{Config, ConfigError},
    embedding::{EmbeddingClient, embedding_client_from_config},
    llm::llm_client_from_config,
    logging,
    node::{Node, generate_node_id},
    retrieval::RetrieverFactory,
    store::{QdrantService, QdrantTreeStore, TreeStore},
    summarizer::Summarizer,
    tree::{TreeBuilder, persist_tree},
};
use serde::Deserialize;
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "raptor",
    about = "Build and query hierarchical RAPTOR retrieval trees"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a tree from a JSON array of chunks.
    Build {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        source_id: String,
        #[arg(long)]
        notebook_id: String,
        /// Write the tree to Qdrant.
        #[arg(long)]
        persist: bool,
    },
    /// Retrieve ranked nodes from stored trees.
    Query {
        #[arg(long)]
        notebook_id: String,
        #[arg(long = "source-id")]
        source_ids: Vec<String>,
        query: String,
    },
    /// Print per-level node counts of a source.
    Stats {
        #[arg(long)]
        source_id: String,
    },
}

#[derive(Deserialize)]
struct ChunkInput {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    // Log settings may come from `.env`, so it is read before tracing starts.
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Command::Build {
            input,
            source_id,
            notebook_id,
            persist,
        } => build(&config, &input, &source_id, &notebook_id, persist).await,
        Command::Query {
            notebook_id,
            source_ids,
            query,
        } => run_query(&config, &notebook_id, &source_ids, &query).await,
        Command::Stats { source_id } => stats(&config, &source_id).await,
    }
}

async fn build(
    config: &Config,
    input: &Path,
    source_id: &str,
    notebook_id: &str,
    persist: bool,
) -> Result<()> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("failed to read chunks at {}", input.display()))?;
    let inputs: Vec<ChunkInput> =
        serde_json::from_str(&content).context("failed to parse chunk json")?;
    if inputs.is_empty() {
        bail!("no chunks in {}", input.display());
    }

    let embedder = embedding_client_from_config(config).context("failed to create embedder")?;
    let chunks = embed_missing(embedder.as_ref(), inputs, source_id, notebook_id).await?;

    let summarizer = match llm_client_from_config(config).context("failed to create LLM client")? {
        Some(llm) => Summarizer::new(llm, config.raptor.summarizer.clone()),
        None => {
            tracing::warn!("LLM_MODEL not set; summaries will be extractive");
            Summarizer::extractive(config.raptor.summarizer.clone())
        }
    };
    let builder = TreeBuilder::new(&config.raptor, summarizer, embedder);
    let result = builder.build_tree(chunks, source_id, notebook_id).await;
    if !result.success {
        bail!(
            "tree build failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut persisted = None;
    if persist {
        let store = qdrant_store(config).await?;
        persisted = Some(
            persist_tree(&store, &result)
                .await
                .context("failed to persist tree")?,
        );
    }

    let summary = json!({
        "source_id": result.source_id,
        "notebook_id": result.notebook_id,
        "total_nodes": result.total_nodes,
        "levels": result.levels,
        "max_level": result.max_level,
        "tree_root_id": result.tree_root_id,
        "build_time_secs": result.build_time.as_secs_f64(),
        "persisted_summaries": persisted,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn embed_missing(
    embedder: &dyn EmbeddingClient,
    inputs: Vec<ChunkInput>,
    source_id: &str,
    notebook_id: &str,
) -> Result<Vec<Node>> {
    let missing: Vec<String> = inputs
        .iter()
        .filter(|input| input.embedding.is_none())
        .map(|input| input.text.clone())
        .collect();
    let expected = missing.len();
    let vectors = if missing.is_empty() {
        Vec::new()
    } else {
        embedder
            .embed_batch(missing)
            .await
            .context("failed to embed chunks")?
    };
    if vectors.len() != expected {
        bail!("embedder returned {} vectors for {expected} chunks", vectors.len());
    }
    let mut vectors = vectors.into_iter();

    let mut chunks = Vec::with_capacity(inputs.len());
    for input in inputs {
        let embedding = match input.embedding {
            Some(embedding) => Some(embedding),
            None => vectors.next(),
        };
        chunks.push(Node::chunk(
            input.id.unwrap_or_else(generate_node_id),
            input.text,
            embedding,
            source_id,
            notebook_id,
        ));
    }
    Ok(chunks)
}

async fn run_query(
    config: &Config,
    notebook_id: &str,
    source_ids: &[String],
    query: &str,
) -> Result<()> {
    let store = qdrant_store(config).await?;
    let embedder = embedding_client_from_config(config).context("failed to create embedder")?;
    let llm = llm_client_from_config(config).context("failed to create LLM client")?;
    let factory = RetrieverFactory::new(
        Arc::new(store),
        embedder,
        llm,
        config.raptor.retrieval.clone(),
    );

    let filter = (!source_ids.is_empty()).then_some(source_ids);
    let results = factory.retriever().retrieve(query, notebook_id, filter).await;
    let rendered: Vec<_> = results
        .iter()
        .map(|hit| {
            json!({
                "score": hit.score,
                "id": hit.node.id,
                "tree_level": hit.node.tree_level,
                "source_id": hit.node.source_id,
                "node_type": hit.node.node_type,
                "text": hit.node.text,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

async fn stats(config: &Config, source_id: &str) -> Result<()> {
    let store = qdrant_store(config).await?;
    let stats = store
        .get_tree_stats(source_id)
        .await
        .context("failed to read tree stats")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn qdrant_store(config: &Config) -> Result<QdrantTreeStore> {
    let url = config
        .qdrant_url
        .as_deref()
        .ok_or_else(|| ConfigError::MissingVariable("QDRANT_URL".to_string()))?;
    let service = QdrantService::new(url, config.qdrant_api_key.clone())
        .context("failed to create Qdrant client")?;
    let store = QdrantTreeStore::new(service, config.qdrant_collection_name.clone());
    store
        .ensure_collection(config.embedding_dimension as u64)
        .await
        .context("failed to prepare Qdrant collection")?;
    Ok(store)
}
