//! Writing a finished build into a [`TreeStore`].

use crate::node::TreeBuildResult;
use crate::store::{StoreError, TreeStore};

/// Replace the source's summary levels with the nodes of `result`.
///
/// Existing levels 1 and above are deleted first, every summary level is written with the
/// root id, and the leaves are upserted at level 0 so they carry the same root. Returns the
/// number of summary nodes written.
pub async fn persist_tree(
    store: &dyn TreeStore,
    result: &TreeBuildResult,
) -> Result<usize, StoreError> {
    let source_id = result.source_id.as_str();
    let notebook_id = result.notebook_id.as_str();
    let root_id = result.tree_root_id.as_deref();

    let deleted = store.delete_tree_nodes(source_id, 1).await?;
    tracing::debug!(source_id, deleted, "Removed previous summary levels");

    let mut written = 0;
    for (level, nodes) in result.nodes_by_level() {
        written += store
            .add_tree_nodes(&nodes, notebook_id, source_id, level, root_id)
            .await?;
    }

    if !result.leaf_nodes.is_empty() {
        store
            .add_tree_nodes(&result.leaf_nodes, notebook_id, source_id, 0, root_id)
            .await?;
    }

    tracing::info!(source_id, summaries = written, leaves = result.leaf_nodes.len(), "Persisted tree");
    Ok(written)
}
