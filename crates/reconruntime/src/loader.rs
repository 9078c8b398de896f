//! Reading and writing workflow documents on disk.

use reconcore::{FlowError, WorkflowDocument, WorkflowGraph};
use std::fs;
use std::path::{Path, PathBuf};

/// Load one workflow document and turn it into a runnable graph.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowGraph, FlowError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let document = WorkflowDocument::from_json(&content)?;
    let graph = document.into_graph()?;
    tracing::debug!(
        "Loaded workflow {} ({} nodes) from {}",
        graph.id,
        graph.nodes.len(),
        path.display()
    );
    Ok(graph)
}

/// Export a graph as a pretty-printed document.
pub fn save_workflow(graph: &WorkflowGraph, path: impl AsRef<Path>) -> Result<(), FlowError> {
    let json = WorkflowDocument::export(graph).to_json_pretty()?;
    fs::write(path, json)?;
    Ok(())
}

/// File name the export uses for a workflow, e.g. `subdomain-recon-workflow.json`.
pub fn export_file_name(graph: &WorkflowGraph) -> String {
    let slug = graph
        .name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    format!("{}-workflow.json", slug)
}

/// Loads every `*.json` workflow in a directory.
pub struct WorkflowLoader {
    dir: PathBuf,
}

impl WorkflowLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Files that fail to parse are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<WorkflowGraph>, FlowError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut graphs = Vec::with_capacity(paths.len());
        for path in paths {
            match load_workflow(&path) {
                Ok(graph) => graphs.push(graph),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(graphs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcore::{Connection, NodeStatus, WorkflowNode};

    fn sample() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("Subdomain Recon").with_id("wf-recon");
        graph
            .add_node(WorkflowNode::new("enum", "subfinder").with_config("domain", "example.com"))
            .unwrap();
        graph.add_node(WorkflowNode::new("scan", "nuclei")).unwrap();
        graph.connect(Connection::new("enum", "scan")).unwrap();
        graph
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = sample();
        graph.nodes[0].status = NodeStatus::Completed;
        let path = dir.path().join(export_file_name(&graph));
        save_workflow(&graph, &path).unwrap();

        let loaded = load_workflow(&path).unwrap();
        assert_eq!(loaded.id, "wf-recon");
        assert_eq!(loaded.connections, graph.connections);
        assert!(loaded.nodes.iter().all(|n| n.status == NodeStatus::Idle));
    }

    #[test]
    fn test_load_all_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        save_workflow(&sample(), dir.path().join("good.json")).unwrap();
        fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let graphs = WorkflowLoader::new(dir.path()).load_all().unwrap();
        assert_eq!(graphs.len(), 1);
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name(&sample()), "subdomain-recon-workflow.json");
    }
}
